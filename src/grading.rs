//! Grade aggregation and gradebook write-back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::models::{GradePolicy, Instance, Session};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum GradebookError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("gradebook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("session has not been written yet")]
    Unsaved,
    #[error("instance {0} not found")]
    MissingInstance(i64),
}

/// One raw grade for one user, as handed to the host gradebook.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GradeItem {
    pub userid: i64,
    pub rawgrade: f64,
    pub feedback: String,
}

#[async_trait]
pub trait Gradebook: Send + Sync {
    async fn update_grade(&self, instance: &Instance, grade: GradeItem) -> Result<(), GradebookError>;
}

/// Collapses `history` into one grade.
///
/// `history` holds every persisted session of the user for the instance,
/// including the one that produced `current`.
pub fn aggregate(policy: GradePolicy, current: f64, history: &[f64]) -> f64 {
    match policy {
        GradePolicy::Average => history.iter().sum::<f64>() / history.len().max(1) as f64,
        GradePolicy::Best => history.iter().copied().fold(current, f64::max),
        GradePolicy::Worst => history.iter().copied().fold(current, f64::min),
        GradePolicy::Last => current,
    }
}

impl Session {
    /// Recomputes the user's grade for this session's instance and pushes it.
    pub async fn write_totalscore(
        &self,
        store: &dyn Store,
        gradebook: &dyn Gradebook,
        policy: GradePolicy,
    ) -> Result<f64, GradebookError> {
        if self.id.is_none() {
            return Err(GradebookError::Unsaved);
        }
        let history: Vec<f64> = store
            .sessions_for_user(self.userid, self.modid)
            .await?
            .iter()
            .map(|s| s.totalscore)
            .collect();
        let score = aggregate(policy, self.totalscore, &history);

        let instance = store
            .get_instance(self.modid)
            .await?
            .ok_or(GradebookError::MissingInstance(self.modid))?;

        tracing::info!(user = self.userid, instance = self.modid, ?policy, score, "writing grade");
        gradebook
            .update_grade(
                &instance,
                GradeItem {
                    userid: self.userid,
                    rawgrade: score,
                    feedback: String::new(),
                },
            )
            .await?;
        Ok(score)
    }
}

#[derive(Serialize, Debug)]
struct GradePayload<'a> {
    course: i64,
    instance: i64,
    name: &'a str,
    hidden: bool,
    #[serde(flatten)]
    grade: GradeItem,
}

/// Posts grades as JSON to `<base_url>/grades`.
#[derive(Clone)]
pub struct HttpGradebook {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGradebook {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Gradebook for HttpGradebook {
    async fn update_grade(&self, instance: &Instance, grade: GradeItem) -> Result<(), GradebookError> {
        let payload = GradePayload {
            course: instance.course,
            instance: instance.id.unwrap_or_default(),
            name: &instance.name,
            hidden: instance.hidegrade,
            grade,
        };
        self.client
            .post(format!("{}/grades", self.base_url))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Keeps every grade it receives; used when no host gradebook is configured.
#[derive(Clone, Default)]
pub struct MemoryGradebook {
    grades: Arc<Mutex<Vec<(i64, GradeItem)>>>,
}

impl MemoryGradebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(instance id, grade)` pairs in arrival order.
    pub fn grades(&self) -> Vec<(i64, GradeItem)> {
        self.grades.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Gradebook for MemoryGradebook {
    async fn update_grade(&self, instance: &Instance, grade: GradeItem) -> Result<(), GradebookError> {
        tracing::debug!(instance = ?instance.id, user = grade.userid, rawgrade = grade.rawgrade, "grade recorded");
        if let Ok(mut g) = self.grades.lock() {
            g.push((instance.id.unwrap_or_default(), grade));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn policies_over_history() {
        let history = [70.0, 90.0, 50.0];
        assert_eq!(aggregate(GradePolicy::Average, 90.0, &history), 70.0);
        assert_eq!(aggregate(GradePolicy::Best, 90.0, &history), 90.0);
        assert_eq!(aggregate(GradePolicy::Worst, 90.0, &history), 50.0);
        assert_eq!(aggregate(GradePolicy::Last, 90.0, &history), 90.0);
    }

    #[test]
    fn average_of_nothing_does_not_divide_by_zero() {
        assert_eq!(aggregate(GradePolicy::Average, 40.0, &[]), 0.0);
    }

    #[tokio::test]
    async fn write_totalscore_pushes_policy_result() {
        let store = MemoryStore::new();
        let gradebook = MemoryGradebook::new();

        let mut inst = Instance::new(1, "Geometry");
        inst.policygrades = GradePolicy::Average;
        inst.write(&store).await.unwrap();
        let id = inst.id.unwrap();

        let mut last = None;
        for (attempt, score) in [(1, 70.0), (2, 50.0), (3, 90.0)] {
            let mut s = Session::new(5, id, attempt);
            s.totalscore = score;
            s.write(&store).await.unwrap();
            last = Some(s);
        }
        // another user's attempt must not leak in
        let mut other = Session::new(6, id, 1);
        other.totalscore = 0.0;
        other.write(&store).await.unwrap();

        let last = last.unwrap();
        for (policy, expected) in [
            (GradePolicy::Average, 70.0),
            (GradePolicy::Best, 90.0),
            (GradePolicy::Worst, 50.0),
            (GradePolicy::Last, 90.0),
        ] {
            let score = last.write_totalscore(&store, &gradebook, policy).await.unwrap();
            assert_eq!(score, expected, "{policy:?}");
        }

        let grades = gradebook.grades();
        assert_eq!(grades.len(), 4);
        assert!(grades.iter().all(|(inst, g)| *inst == id && g.userid == 5 && g.feedback.is_empty()));
    }

    #[tokio::test]
    async fn unsaved_session_is_rejected() {
        let store = MemoryStore::new();
        let s = Session::new(1, 1, 1);
        let err = s
            .write_totalscore(&store, &MemoryGradebook::new(), GradePolicy::Last)
            .await
            .unwrap_err();
        assert!(matches!(err, GradebookError::Unsaved));
    }
}
