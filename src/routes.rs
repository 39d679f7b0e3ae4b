use axum::{
    extract::{FromRequestParts, Multipart, Path, Query, State},
    response::{Html, Redirect},
    routing::{get, post, put},
    Json, Router,
};
use http::{request::Parts, StatusCode};
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::{
    archive::ArchiveError,
    html, listing,
    models::{Course, GradePolicy, Instance, Session, ViewMode, ATTEMPT_MAX},
    report::{self, ReportKind},
    runtime::{self, FinishedSession, FlowError, NewItem, RecordedItem},
    strings, AppState,
};

/// Header carrying the authenticated host user.
pub const USER_HEADER: &str = "x-user-id";

/// Page opened inside the unpacked project.
pub const START_PAGE: &str = "index.html";

type HttpError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    let content = ServeDir::new(state.files.www_root.clone());
    Router::new()
        // course pages
        .route("/course/:course_id", get(course_listing))
        .route("/api/courses/:course_id", put(put_course))
        // instance lifecycle
        .route("/api/drafts", post(upload_draft))
        .route("/api/instances", post(create_instance))
        .route(
            "/api/instances/:id",
            get(get_instance).put(update_instance).delete(delete_instance),
        )
        // attempts
        .route("/api/instances/:id/sessions", post(start_session))
        .route("/view/:instance_id", get(view_activity))
        .route("/player/:session_id", get(player_shell))
        .route("/api/sessions/:id/items", post(record_item))
        .route("/api/sessions/:id/finish", post(finish_session))
        .route("/report/:instance_id", get(instance_report))
        // unpacked projects
        .nest_service("/content", content)
        .with_state(state)
}

/// Host user id taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub i64);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .map(CurrentUser)
            .ok_or_else(|| (StatusCode::UNAUTHORIZED, format!("{USER_HEADER} header required")))
    }
}

// --- course pages ---

async fn course_listing(
    State(st): State<AppState>,
    Path(course_id): Path<i64>,
) -> Result<Html<String>, HttpError> {
    let course = st
        .store
        .get_course(course_id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("course not found"))?;
    let activities = st.store.course_activities(course_id).await.map_err(e500)?;
    Ok(Html(listing::render(&course, &activities)))
}

#[derive(Deserialize, Debug)]
struct CourseForm {
    fullname: String,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "topics".into()
}

async fn put_course(
    State(st): State<AppState>,
    Path(course_id): Path<i64>,
    Json(form): Json<CourseForm>,
) -> Result<Json<Course>, HttpError> {
    let course = Course { id: course_id, fullname: form.fullname, format: form.format };
    st.store.upsert_course(&course).await.map_err(e500)?;
    Ok(Json(course))
}

// --- instance lifecycle ---

#[derive(Serialize, Debug)]
struct DraftCreated {
    draft_id: Uuid,
    filename: String,
}

async fn upload_draft(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    mut mp: Multipart,
) -> Result<Json<DraftCreated>, HttpError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = mp.next_field().await.map_err(e400)? {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or("project.zip").to_string();
            let bytes = field.bytes().await.map_err(e400)?.to_vec();
            upload = Some((filename, bytes));
        }
    }
    let (filename, bytes) = upload.ok_or_else(|| e400("file is required"))?;

    let draft_id = Uuid::new_v4();
    let staged = st.drafts.stage(user, draft_id, &filename, &bytes).map_err(e500)?;
    Ok(Json(DraftCreated { draft_id, filename: staged.filename }))
}

#[derive(Deserialize, Debug)]
struct InstanceForm {
    course: Option<i64>,
    name: Option<String>,
    projectsubject: Option<String>,
    policyattempts: Option<i32>,
    policytime: Option<i32>,
    policygrades: Option<GradePolicy>,
    policyview: Option<ViewMode>,
    policyview_width: Option<i32>,
    policyview_height: Option<i32>,
    hidegrade: Option<bool>,
    section: Option<i32>,
    visible: Option<bool>,
    draft_id: Option<Uuid>,
}

impl InstanceForm {
    fn apply(&self, inst: &mut Instance) -> Result<(), HttpError> {
        if let Some(attempts) = self.policyattempts {
            if !(0..=ATTEMPT_MAX).contains(&attempts) {
                return Err(e400(format!("policyattempts must be between 0 and {ATTEMPT_MAX}")));
            }
            inst.policyattempts = attempts;
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(e400("name must not be empty"));
            }
            inst.name = name.clone();
        }
        if let Some(subject) = &self.projectsubject {
            inst.projectsubject = Some(subject.clone());
        }
        if let Some(v) = self.policytime {
            inst.policytime = v;
        }
        if let Some(v) = self.policygrades {
            inst.policygrades = v;
        }
        if let Some(v) = self.policyview {
            inst.policyview = v;
        }
        if let Some(v) = self.policyview_width {
            inst.policyview_width = v;
        }
        if let Some(v) = self.policyview_height {
            inst.policyview_height = v;
        }
        if let Some(v) = self.hidegrade {
            inst.hidegrade = v;
        }
        Ok(())
    }
}

/// Stores the staged archive and unpacks it off the async runtime.
async fn attach_project(st: &AppState, inst: Instance, user: i64, draft: Uuid) -> Result<Instance, HttpError> {
    let files = st.files.clone();
    let drafts = st.drafts.clone();
    tokio::task::spawn_blocking(move || {
        let mut inst = inst;
        files.write_projectdata(&mut inst, drafts.as_ref(), user, draft)?;
        files.write_projecturl(&mut inst)?;
        Ok::<_, ArchiveError>(inst)
    })
    .await
    .map_err(e500)?
    .map_err(archive_err)
}

async fn detach_project(st: &AppState, inst: Instance) -> Result<Instance, HttpError> {
    let files = st.files.clone();
    tokio::task::spawn_blocking(move || {
        let mut inst = inst;
        files.delete_projecturl(&mut inst)?;
        files.delete_projectdata(&mut inst)?;
        Ok::<_, ArchiveError>(inst)
    })
    .await
    .map_err(e500)?
    .map_err(archive_err)
}

async fn create_instance(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(form): Json<InstanceForm>,
) -> Result<Json<Instance>, HttpError> {
    let course = form.course.ok_or_else(|| e400("course is required"))?;
    let name = form.name.clone().ok_or_else(|| e400("name is required"))?;
    let mut inst = Instance::new(course, name);
    form.apply(&mut inst)?;

    inst.write(st.store.as_ref()).await.map_err(e500)?;
    let id = inst.id.unwrap_or_default();
    st.store
        .add_course_module(course, id, form.section.unwrap_or(0), form.visible.unwrap_or(true))
        .await
        .map_err(e500)?;

    if let Some(draft) = form.draft_id {
        inst = attach_project(&st, inst, user, draft).await?;
        inst.write(st.store.as_ref()).await.map_err(e500)?;
    }
    tracing::info!(instance = id, course, "instance created");
    Ok(Json(inst))
}

async fn get_instance(
    State(st): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Instance>, HttpError> {
    let inst = Instance::read(st.store.as_ref(), id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("instance not found"))?;
    Ok(Json(inst))
}

async fn update_instance(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(form): Json<InstanceForm>,
) -> Result<Json<Instance>, HttpError> {
    let mut inst = st
        .store
        .get_instance(id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("instance not found"))?;
    form.apply(&mut inst)?;
    if let Some(draft) = form.draft_id {
        inst = attach_project(&st, inst, user, draft).await?;
    }
    inst.write(st.store.as_ref()).await.map_err(e500)?;
    Ok(Json(inst))
}

async fn delete_instance(
    State(st): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, HttpError> {
    let inst = st
        .store
        .get_instance(id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("instance not found"))?;
    let inst = detach_project(&st, inst).await?;
    inst.delete(st.store.as_ref()).await.map_err(e500)?;
    tracing::info!(instance = id, "instance deleted");
    Ok(Json(serde_json::json!({ "ok": true })))
}

// --- attempts ---

async fn start_session(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<Json<Session>, HttpError> {
    let session = runtime::start_session(st.store.as_ref(), id, user)
        .await
        .map_err(flow_err)?;
    Ok(Json(session))
}

async fn record_item(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(item): Json<NewItem>,
) -> Result<Json<RecordedItem>, HttpError> {
    let recorded = runtime::record_item(st.store.as_ref(), id, user, item)
        .await
        .map_err(flow_err)?;
    Ok(Json(recorded))
}

#[derive(Deserialize, Debug)]
struct FinishReq {
    totalscore: f64,
}

async fn finish_session(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<FinishReq>,
) -> Result<Json<FinishedSession>, HttpError> {
    if !req.totalscore.is_finite() {
        return Err(e400("totalscore must be a number"));
    }
    let finished = runtime::finish_session(st.store.as_ref(), st.gradebook.as_ref(), id, user, req.totalscore)
        .await
        .map_err(flow_err)?;
    Ok(Json(finished))
}

/// Entry point linked from the course page: resumes the user's open
/// attempt or starts a new one, then hands over to the player.
async fn view_activity(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(instance_id): Path<i64>,
) -> Result<Redirect, HttpError> {
    let session = runtime::resume_or_start(st.store.as_ref(), instance_id, user)
        .await
        .map_err(flow_err)?;
    let sid = session.id.ok_or_else(|| e500("session was not saved"))?;
    Ok(Redirect::to(&format!("/player/{sid}")))
}

async fn player_shell(
    State(st): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(session_id): Path<i64>,
) -> Result<Html<String>, HttpError> {
    let session = st
        .store
        .get_session(session_id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("session not found"))?;
    if session.userid != user {
        return Err((StatusCode::FORBIDDEN, "session belongs to another user".into()));
    }
    let inst = st
        .store
        .get_instance(session.modid)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("instance not found"))?;
    let base = inst
        .projecturl
        .clone()
        .ok_or_else(|| e400("instance has no unpacked project"))?;
    let launch_url = format!("{base}{START_PAGE}");

    let bridge = serde_json::json!({
        "sessionId": session_id,
        "userId": user,
        "itemsUrl": format!("/api/sessions/{session_id}/items"),
        "finishUrl": format!("/api/sessions/{session_id}/finish"),
        "timeLimit": inst.time_limit(),
    })
    .to_string()
    .replace("</", "<\\/");

    let launch = html::escape(&launch_url);
    let frame = match inst.policyview {
        ViewMode::Inline => format!("<iframe id='vc' src='{launch}'></iframe>"),
        ViewMode::NewTab => format!(
            "<p class='launch'><a href='{launch}' target='_blank' rel='opener'>{}</a></p>\
             <script>window.open('{launch}', '_blank');</script>",
            html::escape(strings::get("opennewtab"))
        ),
        ViewMode::Popup => {
            let features = format!(
                "width={},height={},resizable=yes,scrollbars=yes",
                inst.policyview_width, inst.policyview_height
            );
            format!(
                "<p class='launch'><a href='#' onclick=\"window.open('{launch}', 'visualclass', '{features}');return false;\">{}</a></p>\
                 <script>window.open('{launch}', 'visualclass', '{features}');</script>",
                html::escape(strings::get("openpopup"))
            )
        }
    };

    let page = format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>{title}</title>
  <style>
    html,body,iframe{{height:100%;width:100%;margin:0;padding:0;border:0}}
    .bar{{position:fixed;top:0;left:0;right:0;height:36px;background:#eee;border-bottom:1px solid #ddd;display:flex;align-items:center;padding:0 8px;z-index:2}}
    iframe{{position:absolute;top:36px;left:0;right:0;bottom:0}}
    .launch{{margin-top:48px;padding:0 8px}}
  </style>
</head>
<body>
<div class='bar'>{title} &middot; attempt {attempt} <span id='status'></span></div>
{frame}
<script>
window.VisualClass = {bridge};
</script>
</body>
</html>"#,
        title = html::escape(&inst.name),
        attempt = session.attemptnumber,
        frame = frame,
        bridge = bridge,
    );
    Ok(Html(page))
}

#[derive(Deserialize, Debug)]
struct ReportQuery {
    #[serde(rename = "type", default)]
    kind: ReportKind,
}

async fn instance_report(
    State(st): State<AppState>,
    Path(instance_id): Path<i64>,
    Query(q): Query<ReportQuery>,
) -> Result<Html<String>, HttpError> {
    let inst = Instance::read(st.store.as_ref(), instance_id)
        .await
        .map_err(e500)?
        .ok_or_else(|| e404("instance not found"))?;
    Ok(Html(report::render(&inst, q.kind)))
}

// --- helpers ---
fn e400<T: ToString>(msg: T) -> HttpError {
    (StatusCode::BAD_REQUEST, msg.to_string())
}

fn e404<T: Into<String>>(msg: T) -> HttpError {
    (StatusCode::NOT_FOUND, msg.into())
}

fn e500<E: std::fmt::Display>(e: E) -> HttpError {
    tracing::error!(error=%e, "internal error");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn archive_err(e: ArchiveError) -> HttpError {
    match e {
        ArchiveError::NoArchive | ArchiveError::NoStagedFile | ArchiveError::Zip(_) => e400(e),
        other => e500(other),
    }
}

fn flow_err(e: FlowError) -> HttpError {
    match e {
        FlowError::NotFound(..) => e404(e.to_string()),
        FlowError::NoAttemptsLeft | FlowError::NotOwner => (StatusCode::FORBIDDEN, e.to_string()),
        FlowError::SessionClosed => (StatusCode::CONFLICT, e.to_string()),
        other => e500(other),
    }
}
