//! Attempt flow driven by the player: start, record items, finish.

use chrono::{SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::grading::{Gradebook, GradebookError};
use crate::models::{AnswerValue, Instance, ItemType, Session, SessionItem};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("{0} {1} not found")]
    NotFound(&'static str, i64),
    #[error("no attempts left")]
    NoAttemptsLeft,
    #[error("session belongs to another user")]
    NotOwner,
    #[error("session already finished")]
    SessionClosed,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gradebook(#[from] GradebookError),
}

#[derive(Deserialize, Debug, Clone)]
pub struct NewItem {
    pub pagetitle: Option<String>,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub question: Option<String>,
    pub answercorrect: Option<AnswerValue>,
    #[serde(default, deserialize_with = "crate::models::deserialize_user_answer")]
    pub answeruser: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
pub struct RecordedItem {
    pub item: SessionItem,
    pub correct: bool,
}

#[derive(Serialize, Debug, Clone)]
pub struct FinishedSession {
    pub session: Session,
    pub grade: f64,
}

async fn open_session(store: &dyn Store, session_id: i64, user: i64) -> Result<Session, FlowError> {
    let session = store
        .get_session(session_id)
        .await?
        .ok_or(FlowError::NotFound("session", session_id))?;
    if session.userid != user {
        return Err(FlowError::NotOwner);
    }
    if session.is_closed() {
        return Err(FlowError::SessionClosed);
    }
    Ok(session)
}

pub async fn start_session(store: &dyn Store, instance_id: i64, user: i64) -> Result<Session, FlowError> {
    let instance = Instance::read(store, instance_id)
        .await?
        .ok_or(FlowError::NotFound("instance", instance_id))?;
    if instance.attempts_exhausted(user) {
        tracing::info!(user, instance = instance_id, "attempt refused, limit reached");
        return Err(FlowError::NoAttemptsLeft);
    }

    let mut session = Session::new(user, instance_id, instance.next_attempt_number(user));
    session.timestart = Some(Utc::now().trunc_subsecs(0));
    session.write(store).await?;
    tracing::info!(user, instance = instance_id, attempt = session.attemptnumber, "session started");
    Ok(session)
}

/// Returns the user's unfinished session for the instance, or starts one.
pub async fn resume_or_start(store: &dyn Store, instance_id: i64, user: i64) -> Result<Session, FlowError> {
    let open = store
        .sessions_for_user(user, instance_id)
        .await?
        .into_iter()
        .filter(|s| !s.is_closed())
        .max_by_key(|s| s.attemptnumber);
    match open {
        Some(session) => {
            tracing::debug!(user, instance = instance_id, attempt = session.attemptnumber, "session resumed");
            Ok(session)
        }
        None => start_session(store, instance_id, user).await,
    }
}

pub async fn record_item(
    store: &dyn Store,
    session_id: i64,
    user: i64,
    new: NewItem,
) -> Result<RecordedItem, FlowError> {
    open_session(store, session_id, user).await?;
    let mut item = SessionItem {
        id: None,
        sessionid: session_id,
        pagetitle: new.pagetitle,
        item_type: new.item_type,
        question: new.question,
        answercorrect: new.answercorrect,
        answeruser: new.answeruser,
    };
    item.write(store).await?;
    let correct = item.is_correct();
    tracing::debug!(session = session_id, item = ?item.id, correct, "item recorded");
    Ok(RecordedItem { item, correct })
}

pub async fn finish_session(
    store: &dyn Store,
    gradebook: &dyn Gradebook,
    session_id: i64,
    user: i64,
    totalscore: f64,
) -> Result<FinishedSession, FlowError> {
    let mut session = open_session(store, session_id, user).await?;
    let instance = store
        .get_instance(session.modid)
        .await?
        .ok_or(FlowError::NotFound("instance", session.modid))?;

    session.timestop = Some(Utc::now().trunc_subsecs(0));
    session.totalscore = totalscore;
    session.write(store).await?;

    if let (Some(limit), Some(spent)) = (instance.time_limit(), session.time()) {
        if spent > limit {
            tracing::warn!(session = session_id, spent, limit, "session finished past its time limit");
        }
    }

    let grade = session
        .write_totalscore(store, gradebook, instance.policygrades)
        .await?;
    session.items = store.items_for_session(session_id).await?;
    Ok(FinishedSession { session, grade })
}
