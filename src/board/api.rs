use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::db::{self, DbHandle};
use super::models::*;
use super::notify::{InviteNotice, Notifier, dispatch_invite};
use super::session::{CurrentUser, SessionResolver, SqliteSessionResolver};
use super::teams::IssuedInvite;
use super::validation::{self, *};
use super::ws::{BoardEvent, WsMessage, broadcast_message};
use super::{comments, issues, labels, projects, query, statuses, subtasks, teams};
use crate::errors::{BoardError, BoardResult};

/// Capacity of the WebSocket broadcast channel.
const WS_CHANNEL_CAPACITY: usize = 256;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<BoardEvent>,
    pub sessions: Arc<dyn SessionResolver>,
    pub notifier: Arc<dyn Notifier>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// State with the SQLite session resolver over the same database.
    pub fn new(db: DbHandle, notifier: Arc<dyn Notifier>) -> Self {
        let (ws_tx, _) = broadcast::channel(WS_CHANNEL_CAPACITY);
        Self {
            sessions: Arc::new(SqliteSessionResolver::new(db.clone())),
            db,
            ws_tx,
            notifier,
        }
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct TeamNameRequest {
    pub name: String,
}

#[derive(Deserialize)]
pub struct InviteRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ChangeRoleRequest {
    pub role: TeamRole,
}

#[derive(Deserialize)]
pub struct ProjectListParams {
    pub team_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateLabelRequest {
    pub name: String,
    pub color: String,
}

#[derive(Deserialize)]
pub struct ReorderStatusesRequest {
    pub statuses: Vec<StatusPosition>,
}

#[derive(Deserialize)]
pub struct WipLimitRequest {
    pub wip_limit: i64,
}

#[derive(Deserialize)]
pub struct CreateIssueRequest {
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<i64>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub labels: Vec<i64>,
}

#[derive(Deserialize)]
pub struct MoveIssueRequest {
    pub status_id: i64,
    pub order: i64,
}

#[derive(Deserialize)]
pub struct CreateSubtaskRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct UpdateSubtaskRequest {
    pub subtask_id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub completed: Option<bool>,
}

#[derive(Deserialize)]
pub struct ReorderSubtasksRequest {
    pub subtask_ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

#[derive(Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// Query string of `GET /api/issues`. Id lists are comma separated.
#[derive(Deserialize)]
pub struct SearchParams {
    pub project_id: i64,
    pub status_ids: Option<String>,
    pub assignee_id: Option<i64>,
    pub priority: Option<Priority>,
    pub label_ids: Option<String>,
    pub search: Option<String>,
    pub has_due: Option<bool>,
    pub due_from: Option<String>,
    pub due_to: Option<String>,
    pub sort: Option<IssueSort>,
    pub order: Option<SortOrder>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

/// What the inviter sees; the token only travels in the notification.
#[derive(Serialize)]
pub struct InviteResponse {
    pub id: i64,
    pub team_id: i64,
    pub email: String,
    pub expires_at: String,
}

impl From<&IssuedInvite> for InviteResponse {
    fn from(issued: &IssuedInvite) -> Self {
        Self {
            id: issued.invite.id,
            team_id: issued.invite.team_id,
            email: issued.invite.email.clone(),
            expires_at: issued.invite.expires_at.clone(),
        }
    }
}

// ── Payload validation ────────────────────────────────────────────────

/// Search range bounds must parse; issue payloads fall back to no due date.
fn due_bound(value: Option<&str>) -> BoardResult<()> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) if issues::parse_optional_date(Some(raw)).is_none() => {
            Err(BoardError::invalid(format!("invalid due date bound: {raw}")))
        }
        _ => Ok(()),
    }
}

fn id_list(field: &str, raw: Option<&str>) -> BoardResult<Vec<i64>> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| BoardError::invalid(format!("{field}: not an id: {part}")))
        })
        .collect()
}

impl CreateIssueRequest {
    fn into_new_issue(self) -> BoardResult<NewIssue> {
        optional_text("description", self.description.as_deref(), DESCRIPTION_MAX)?;
        Ok(NewIssue {
            title: required_text("title", &self.title, TITLE_MAX)?,
            description: self.description,
            assignee_id: self.assignee_id,
            due_date: self.due_date,
            priority: self.priority,
            labels: self.labels,
        })
    }
}

fn validated_issue_update(mut update: IssueUpdate) -> BoardResult<IssueUpdate> {
    update.title = update
        .title
        .as_deref()
        .map(|t| required_text("title", t, TITLE_MAX))
        .transpose()?;
    if let Some(description) = &update.description {
        optional_text("description", description.as_deref(), DESCRIPTION_MAX)?;
    }
    Ok(update)
}

fn validated_new_project(mut input: NewProject) -> BoardResult<NewProject> {
    input.name = required_text("name", &input.name, PROJECT_NAME_MAX)?;
    optional_text("description", input.description.as_deref(), PROJECT_DESCRIPTION_MAX)?;
    Ok(input)
}

fn validated_project_update(mut update: ProjectUpdate) -> BoardResult<ProjectUpdate> {
    update.name = update
        .name
        .as_deref()
        .map(|n| required_text("name", n, PROJECT_NAME_MAX))
        .transpose()?;
    if let Some(description) = &update.description {
        optional_text("description", description.as_deref(), PROJECT_DESCRIPTION_MAX)?;
    }
    Ok(update)
}

fn validated_new_status(input: NewStatus) -> BoardResult<NewStatus> {
    hex_color(&input.color)?;
    validation::wip_limit(input.wip_limit)?;
    let name = required_text("name", &input.name, STATUS_NAME_MAX)?;
    Ok(NewStatus { name, ..input })
}

impl SearchParams {
    fn into_query(self) -> BoardResult<IssueQuery> {
        due_bound(self.due_from.as_deref())?;
        due_bound(self.due_to.as_deref())?;
        Ok(IssueQuery {
            project_id: self.project_id,
            status_ids: id_list("status_ids", self.status_ids.as_deref())?,
            assignee_id: self.assignee_id,
            priority: self.priority,
            label_ids: id_list("label_ids", self.label_ids.as_deref())?,
            search: self.search,
            has_due: self.has_due,
            due_from: self.due_from,
            due_to: self.due_to,
            sort: self.sort.unwrap_or_default(),
            order: self.order.unwrap_or_default(),
            page: self.page.unwrap_or_else(default_page),
            page_size: self.page_size.unwrap_or_else(default_page_size),
        })
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    NotFound(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(e: BoardError) -> Self {
        match e {
            BoardError::NotFound => ApiError::NotFound(e.to_string()),
            BoardError::Forbidden => ApiError::Forbidden(e.to_string()),
            e if e.is_internal() => {
                tracing::error!(error = %e, "Request failed");
                ApiError::Internal("Internal server error".into())
            }
            e => ApiError::BadRequest(e.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/teams", get(list_teams).post(create_team))
        .route("/api/teams/{id}", patch(rename_team).delete(delete_team))
        .route("/api/teams/{id}/leave", post(leave_team))
        .route("/api/teams/{id}/invites", post(invite_member))
        .route(
            "/api/teams/{id}/invites/{invite_id}/resend",
            post(resend_invite),
        )
        .route(
            "/api/teams/{id}/members/{member_id}/role",
            post(change_role),
        )
        .route(
            "/api/teams/{id}/members/{member_id}/kick",
            post(kick_member),
        )
        .route("/api/teams/{id}/activity", get(team_activity))
        .route("/api/invites/{token}", get(invite_info))
        .route("/api/invites/{token}/accept", post(accept_invite))
        .route("/api/projects", get(list_projects).post(create_project))
        .route(
            "/api/projects/{id}",
            get(project_detail)
                .patch(update_project)
                .delete(delete_project),
        )
        .route("/api/projects/{id}/archive", post(archive_project))
        .route("/api/projects/{id}/favorite", post(toggle_favorite))
        .route("/api/projects/{id}/board", get(get_board))
        .route(
            "/api/projects/{id}/labels",
            get(list_labels).post(create_label),
        )
        .route(
            "/api/projects/{id}/statuses",
            get(list_statuses)
                .post(create_status)
                .patch(reorder_statuses),
        )
        .route(
            "/api/projects/{id}/statuses/{status_id}",
            patch(update_wip_limit),
        )
        .route("/api/issues", get(search_issues).post(create_issue))
        .route(
            "/api/issues/{id}",
            get(get_issue).patch(update_issue).delete(delete_issue),
        )
        .route("/api/issues/{id}/move", post(move_issue))
        .route(
            "/api/issues/{id}/subtasks",
            post(create_subtask).patch(update_subtask),
        )
        .route("/api/issues/{id}/subtasks/order", put(reorder_subtasks))
        .route(
            "/api/issues/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/api/comments/{id}",
            patch(update_comment).delete(delete_comment),
        )
        .route("/health", get(health_check))
}

async fn health_check() -> &'static str {
    "ok"
}

fn send_invite(state: &SharedState, issued: &IssuedInvite) {
    let notice = InviteNotice {
        email: issued.invite.email.clone(),
        team_name: issued.team_name.clone(),
        token: issued.invite.token.clone(),
        invited_by: issued.invited_by.clone(),
    };
    dispatch_invite(state.notifier.clone(), notice);
}

// ── Teams ─────────────────────────────────────────────────────────────

async fn list_teams(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
) -> Result<impl IntoResponse, ApiError> {
    let teams = state.db.read(move |conn| teams::list_teams(conn, user.id)).await?;
    Ok(Json(teams))
}

async fn create_team(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<TeamNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required_text("name", &req.name, TEAM_NAME_MAX)?;
    let team = state
        .db
        .write(move |conn| teams::create_team(conn, user.id, &name))
        .await?;
    Ok((StatusCode::CREATED, Json(team)))
}

async fn rename_team(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<TeamNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required_text("name", &req.name, TEAM_NAME_MAX)?;
    let team = state
        .db
        .write(move |conn| teams::rename_team(conn, id, user.id, &name))
        .await?;
    Ok(Json(team))
}

async fn delete_team(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .write(move |conn| teams::delete_team(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn leave_team(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .write(move |conn| teams::leave_team(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn invite_member(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<InviteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = validation::email(&req.email)?;
    let issued = state
        .db
        .write(move |conn| teams::invite_member(conn, id, user.id, &email))
        .await?;
    send_invite(&state, &issued);
    Ok((StatusCode::CREATED, Json(InviteResponse::from(&issued))))
}

async fn resend_invite(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path((id, invite_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state
        .db
        .write(move |conn| teams::resend_invite(conn, id, invite_id, user.id))
        .await?;
    send_invite(&state, &issued);
    Ok(Json(InviteResponse::from(&issued)))
}

async fn change_role(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path((id, member_id)): Path<(i64, i64)>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .db
        .write(move |conn| teams::change_role(conn, id, member_id, user.id, req.role))
        .await?;
    Ok(Json(member))
}

async fn kick_member(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path((id, member_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let member = state
        .db
        .write(move |conn| teams::kick_member(conn, id, member_id, user.id))
        .await?;
    Ok(Json(member))
}

async fn team_activity(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let activity = state
        .db
        .read(move |conn| teams::list_activity(conn, id, user.id))
        .await?;
    Ok(Json(activity))
}

async fn invite_info(
    State(state): State<SharedState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let info = state
        .db
        .read(move |conn| teams::invite_info(conn, &token))
        .await?;
    Ok(Json(info))
}

async fn accept_invite(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let team_id = state
        .db
        .write(move |conn| teams::accept_invite(conn, &token, user.id))
        .await?;
    Ok(Json(serde_json::json!({"team_id": team_id})))
}

// ── Projects ──────────────────────────────────────────────────────────

async fn list_projects(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ProjectListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let projects = state
        .db
        .read(move |conn| projects::list_projects(conn, user.id, params.team_id))
        .await?;
    Ok(Json(projects))
}

async fn create_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewProject>,
) -> Result<impl IntoResponse, ApiError> {
    let input = validated_new_project(req)?;
    let project = state
        .db
        .write(move |conn| projects::create_project(conn, user.id, input))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn project_detail(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .read(move |conn| projects::project_detail(conn, id, user.id))
        .await?;
    Ok(Json(project))
}

async fn toggle_favorite(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let favorite = state
        .db
        .write(move |conn| projects::toggle_favorite(conn, id, user.id))
        .await?;
    Ok(Json(favorite))
}

async fn update_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ProjectUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let update = validated_project_update(req)?;
    let project = state
        .db
        .write(move |conn| projects::update_project(conn, id, user.id, update))
        .await?;
    Ok(Json(project))
}

async fn archive_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .db
        .write(move |conn| projects::toggle_archive(conn, id, user.id))
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .write(move |conn| projects::soft_delete_project(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_board(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let board = state
        .db
        .read(move |conn| query::get_board(conn, id, user.id))
        .await?;
    Ok(Json(board))
}

// ── Labels & statuses ─────────────────────────────────────────────────

async fn list_labels(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let labels = state
        .db
        .read(move |conn| labels::list_labels(conn, id, user.id))
        .await?;
    Ok(Json(labels))
}

async fn create_label(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CreateLabelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = required_text("name", &req.name, LABEL_NAME_MAX)?;
    hex_color(&req.color)?;
    let label = state
        .db
        .write(move |conn| labels::create_label(conn, id, user.id, &name, &req.color))
        .await?;
    broadcast_message(
        &state.ws_tx,
        id,
        &WsMessage::LabelCreated {
            label: label.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(label)))
}

async fn list_statuses(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let statuses = state
        .db
        .read(move |conn| statuses::list_statuses(conn, id, user.id))
        .await?;
    Ok(Json(statuses))
}

async fn create_status(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<NewStatus>,
) -> Result<impl IntoResponse, ApiError> {
    let input = validated_new_status(req)?;
    let status = state
        .db
        .write(move |conn| statuses::create_status(conn, id, user.id, input))
        .await?;
    broadcast_message(
        &state.ws_tx,
        id,
        &WsMessage::StatusCreated {
            status: status.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(status)))
}

async fn reorder_statuses(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ReorderStatusesRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for pair in &req.statuses {
        non_negative("position", pair.position)?;
    }
    let statuses = state
        .db
        .write(move |conn| statuses::reorder_statuses(conn, id, user.id, &req.statuses))
        .await?;
    broadcast_message(
        &state.ws_tx,
        id,
        &WsMessage::StatusesReordered {
            statuses: statuses.clone(),
        },
    );
    Ok(Json(statuses))
}

async fn update_wip_limit(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path((id, status_id)): Path<(i64, i64)>,
    Json(req): Json<WipLimitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validation::wip_limit(req.wip_limit)?;
    let status = state
        .db
        .write(move |conn| statuses::update_wip_limit(conn, id, status_id, user.id, req.wip_limit))
        .await?;
    broadcast_message(
        &state.ws_tx,
        id,
        &WsMessage::StatusUpdated {
            status: status.clone(),
        },
    );
    Ok(Json(status))
}

// ── Issues ────────────────────────────────────────────────────────────

async fn search_issues(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, ApiError> {
    let query = params.into_query()?;
    let page = state
        .db
        .read(move |conn| query::search_issues(conn, user.id, &query))
        .await?;
    Ok(Json(page))
}

async fn create_issue(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<CreateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let project_id = req.project_id;
    let input = req.into_new_issue()?;
    let issue = state
        .db
        .write(move |conn| issues::create_issue(conn, project_id, user.id, input))
        .await?;
    broadcast_message(
        &state.ws_tx,
        issue.project_id,
        &WsMessage::IssueCreated {
            issue: issue.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(issue)))
}

async fn get_issue(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = state
        .db
        .read(move |conn| query::issue_detail(conn, id, user.id))
        .await?;
    Ok(Json(detail))
}

async fn update_issue(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<IssueUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let update = validated_issue_update(req)?;
    let updated = state
        .db
        .write(move |conn| issues::update_issue(conn, id, user.id, update))
        .await?;
    broadcast_message(
        &state.ws_tx,
        updated.issue.project_id,
        &WsMessage::IssueUpdated {
            issue: updated.issue.clone(),
        },
    );
    Ok(Json(updated))
}

async fn move_issue(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<MoveIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    non_negative("order", req.order)?;
    let outcome = state
        .db
        .write(move |conn| issues::move_issue(conn, id, user.id, req.status_id, req.order))
        .await?;
    broadcast_message(
        &state.ws_tx,
        outcome.issue.project_id,
        &WsMessage::IssueMoved {
            issue_id: outcome.issue.id,
            from_status_id: outcome.from_status_id,
            to_status_id: outcome.to_status_id,
            status_order: outcome.issue.status_order,
        },
    );
    Ok(Json(outcome))
}

async fn delete_issue(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let issue = state
        .db
        .write(move |conn| issues::soft_delete_issue(conn, id, user.id))
        .await?;
    broadcast_message(
        &state.ws_tx,
        issue.project_id,
        &WsMessage::IssueDeleted { issue_id: issue.id },
    );
    Ok(StatusCode::NO_CONTENT)
}

// ── Subtasks ──────────────────────────────────────────────────────────

async fn create_subtask(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CreateSubtaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let title = required_text("title", &req.title, TITLE_MAX)?;
    let subtask = state
        .db
        .write(move |conn| subtasks::create_subtask(conn, id, user.id, &title))
        .await?;
    Ok((StatusCode::CREATED, Json(subtask)))
}

async fn update_subtask(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSubtaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update = SubtaskUpdate {
        title: req
            .title
            .as_deref()
            .map(|t| required_text("title", t, TITLE_MAX))
            .transpose()?,
        completed: req.completed,
    };
    let subtask = state
        .db
        .write(move |conn| subtasks::update_subtask(conn, id, req.subtask_id, user.id, update))
        .await?;
    Ok(Json(subtask))
}

async fn reorder_subtasks(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<ReorderSubtasksRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let subtasks = state
        .db
        .write(move |conn| subtasks::reorder_subtasks(conn, id, user.id, &req.subtask_ids))
        .await?;
    Ok(Json(subtasks))
}

// ── Comments ──────────────────────────────────────────────────────────

async fn list_comments(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = params.page.unwrap_or_else(default_page);
    let page_size = params.page_size.unwrap_or_else(default_page_size);
    let comments = state
        .db
        .read(move |conn| comments::list_comments(conn, id, user.id, page, page_size))
        .await?;
    Ok(Json(comments))
}

async fn create_comment(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = required_text("content", &req.content, COMMENT_MAX)?;
    let (comment, project_id) = state
        .db
        .write(move |conn| {
            let comment = comments::create_comment(conn, id, user.id, &content)?;
            let issue = db::active_issue(conn, id)?.ok_or(BoardError::NotFound)?;
            Ok((comment, issue.project_id))
        })
        .await?;
    broadcast_message(
        &state.ws_tx,
        project_id,
        &WsMessage::CommentCreated {
            issue_id: id,
            comment: comment.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn update_comment(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
    Json(req): Json<CommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let content = required_text("content", &req.content, COMMENT_MAX)?;
    let comment = state
        .db
        .write(move |conn| comments::update_comment(conn, id, user.id, &content))
        .await?;
    Ok(Json(comment))
}

async fn delete_comment(
    State(state): State<SharedState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .db
        .write(move |conn| comments::soft_delete_comment(conn, id, user.id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::notify::LogNotifier;
    use crate::board::session::{create_user, issue_session};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        state: SharedState,
        owner: String,
        member: String,
        outsider: String,
    }

    fn test_app() -> TestApp {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let (owner, member, outsider) = {
            let guard = db.lock_sync().unwrap();
            let conn = guard.conn();
            let token = |email: &str| {
                let user = create_user(conn, email, None).unwrap();
                issue_session(conn, user.id, 1).unwrap()
            };
            (
                token("owner@example.com"),
                token("member@example.com"),
                token("outsider@example.com"),
            )
        };
        let notifier = Arc::new(LogNotifier::new("http://localhost:3000", "no-reply@example.com"));
        let state = Arc::new(AppState::new(db, notifier));
        TestApp {
            app: api_router().with_state(state.clone()),
            state,
            owner,
            member,
            outsider,
        }
    }

    async fn body_json(body: Body) -> Value {
        let bytes = body.collect().await.unwrap().to_bytes();
        if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        }
    }

    impl TestApp {
        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            (status, body_json(response.into_body()).await)
        }

        /// Team "Core" owned by `owner`, a project in it, and `member`
        /// joined through an invite. Returns (team id, project id).
        async fn board(&self) -> (i64, i64) {
            let (status, team) = self
                .send("POST", "/api/teams", Some(&self.owner), Some(json!({"name": "Core"})))
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let team_id = team["id"].as_i64().unwrap();

            let (status, project) = self
                .send(
                    "POST",
                    "/api/projects",
                    Some(&self.owner),
                    Some(json!({"team_id": team_id, "name": "Board"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let project_id = project["id"].as_i64().unwrap();

            let (status, _) = self
                .send(
                    "POST",
                    &format!("/api/teams/{team_id}/invites"),
                    Some(&self.owner),
                    Some(json!({"email": "Member@Example.com"})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            let token = self.invite_token("member@example.com");
            let (status, _) = self
                .send("POST", &format!("/api/invites/{token}/accept"), Some(&self.member), None)
                .await;
            assert_eq!(status, StatusCode::OK);

            (team_id, project_id)
        }

        fn invite_token(&self, email: &str) -> String {
            let guard = self.state.db.lock_sync().unwrap();
            guard
                .conn()
                .query_row(
                    "SELECT token FROM team_invites WHERE email = ?1",
                    [email],
                    |row| row.get(0),
                )
                .unwrap()
        }

        async fn statuses(&self, project_id: i64) -> Vec<Value> {
            let (_, statuses) = self
                .send(
                    "GET",
                    &format!("/api/projects/{project_id}/statuses"),
                    Some(&self.owner),
                    None,
                )
                .await;
            statuses.as_array().unwrap().clone()
        }

        async fn create_issue(&self, project_id: i64, title: &str) -> i64 {
            let (status, issue) = self
                .send(
                    "POST",
                    "/api/issues",
                    Some(&self.owner),
                    Some(json!({"project_id": project_id, "title": title})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            issue["id"].as_i64().unwrap()
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let t = test_app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = t.app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_requires_session() {
        let t = test_app();
        let (status, body) = t.send("GET", "/api/teams", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Unauthorized");

        let (status, _) = t.send("GET", "/api/teams", Some("bogus"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_session_cookie_is_accepted() {
        let t = test_app();
        let request = Request::builder()
            .uri("/api/teams")
            .header("cookie", format!("authjs.session-token={}", t.owner))
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_new_project_board_has_default_columns() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        t.create_issue(project_id, "First").await;

        let (status, board) = t
            .send("GET", &format!("/api/projects/{project_id}/board"), Some(&t.member), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = board["columns"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["status"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Backlog", "In Progress", "Done"]);
        assert_eq!(board["columns"][0]["issues"][0]["title"], "First");
        assert_eq!(board["columns"][0]["issues"][0]["status_order"], 0);
    }

    #[tokio::test]
    async fn test_access_errors_map_to_status_codes() {
        let t = test_app();
        let (team_id, project_id) = t.board().await;

        let (status, _) = t
            .send("GET", &format!("/api/projects/{project_id}/board"), Some(&t.outsider), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = t
            .send(
                "POST",
                "/api/projects",
                Some(&t.member),
                Some(json!({"team_id": team_id, "name": "Nope"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Forbidden");
    }

    #[tokio::test]
    async fn test_payload_validation() {
        let t = test_app();
        let (_, project_id) = t.board().await;

        let (status, body) = t
            .send(
                "POST",
                "/api/issues",
                Some(&t.owner),
                Some(json!({"project_id": project_id, "title": "   "})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("title"));

        let (status, _) = t
            .send(
                "POST",
                &format!("/api/projects/{project_id}/labels"),
                Some(&t.owner),
                Some(json!({"name": "bug", "color": "red"})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = t
            .send(
                "POST",
                "/api/issues",
                Some(&t.owner),
                Some(json!({"project_id": project_id, "title": "x", "due_date": "someday"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(body["due_date"].is_null());
    }

    #[tokio::test]
    async fn test_move_respects_wip_limit() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let first = t.create_issue(project_id, "X").await;
        let second = t.create_issue(project_id, "Y").await;
        let in_progress = t.statuses(project_id).await[1]["id"].as_i64().unwrap();

        let (status, updated) = t
            .send(
                "PATCH",
                &format!("/api/projects/{project_id}/statuses/{in_progress}"),
                Some(&t.owner),
                Some(json!({"wip_limit": 1})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["wip_limit"], 1);

        let (status, outcome) = t
            .send(
                "POST",
                &format!("/api/issues/{first}/move"),
                Some(&t.owner),
                Some(json!({"status_id": in_progress, "order": 0})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["to_status_id"], in_progress);

        let (status, body) = t
            .send(
                "POST",
                &format!("/api/issues/{second}/move"),
                Some(&t.owner),
                Some(json!({"status_id": in_progress, "order": 0})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("WIP limit"));

        let (_, detail) = t
            .send("GET", &format!("/api/issues/{second}"), Some(&t.member), None)
            .await;
        assert_eq!(detail["status"]["name"], "Backlog");
        assert_eq!(detail["status_order"], 0);
    }

    #[tokio::test]
    async fn test_update_issue_records_history() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let id = t.create_issue(project_id, "Before").await;

        let (status, updated) = t
            .send(
                "PATCH",
                &format!("/api/issues/{id}"),
                Some(&t.owner),
                Some(json!({"title": "After", "priority": "HIGH"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["title"], "After");

        let (_, detail) = t.send("GET", &format!("/api/issues/{id}"), Some(&t.member), None).await;
        let fields: Vec<&str> = detail["histories"]
            .as_array()
            .unwrap()
            .iter()
            .map(|h| h["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields.len(), 2);
        assert!(fields.contains(&"title"));
        assert!(fields.contains(&"priority"));
    }

    #[tokio::test]
    async fn test_search_with_query_string() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        t.create_issue(project_id, "Login crash").await;
        t.create_issue(project_id, "Dark mode").await;

        let (status, page) = t
            .send(
                "GET",
                &format!("/api/issues?project_id={project_id}&search=login&sort=priority&order=asc"),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
        assert_eq!(page["items"][0]["title"], "Login crash");

        let (status, _) = t
            .send(
                "GET",
                &format!("/api/issues?project_id={project_id}&status_ids=1,abc"),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t
            .send(
                "GET",
                &format!("/api/issues?project_id={project_id}&due_from=someday"),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_out_of_range_page_is_rejected_and_server_keeps_serving() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let id = t.create_issue(project_id, "Paged").await;

        let (status, _) = t
            .send(
                "GET",
                &format!("/api/issues?project_id={project_id}&page={}", i64::MAX),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t
            .send(
                "GET",
                &format!("/api/issues/{id}/comments?page={}", i64::MAX),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, page) = t
            .send(
                "GET",
                &format!("/api/issues?project_id={project_id}"),
                Some(&t.member),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);
    }

    #[tokio::test]
    async fn test_project_detail_and_favorite_toggle() {
        let t = test_app();
        let (_, project_id) = t.board().await;

        let (status, project) = t
            .send("GET", &format!("/api/projects/{project_id}"), Some(&t.member), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(project["name"], "Board");

        let (status, _) = t
            .send("GET", &format!("/api/projects/{project_id}"), Some(&t.outsider), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let favorite_uri = format!("/api/projects/{project_id}/favorite");
        let (status, body) = t.send("POST", &favorite_uri, Some(&t.member), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"favorite": true}));

        let (_, listed) = t.send("GET", "/api/projects", Some(&t.member), None).await;
        assert_eq!(listed[0]["id"], project_id);
        assert_eq!(listed[0]["favorite"], true);
        let (_, listed) = t.send("GET", "/api/projects", Some(&t.owner), None).await;
        assert_eq!(listed[0]["favorite"], false);

        let (_, body) = t.send("POST", &favorite_uri, Some(&t.member), None).await;
        assert_eq!(body, json!({"favorite": false}));

        let (status, _) = t.send("POST", &favorite_uri, Some(&t.outsider), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_issue_then_not_found() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let id = t.create_issue(project_id, "Doomed").await;

        let (status, _) = t.send("DELETE", &format!("/api/issues/{id}"), Some(&t.owner), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = t.send("GET", &format!("/api/issues/{id}"), Some(&t.member), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_comments_and_subtasks() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let id = t.create_issue(project_id, "Work").await;

        let (status, comment) = t
            .send(
                "POST",
                &format!("/api/issues/{id}/comments"),
                Some(&t.member),
                Some(json!({"content": "on it"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let comment_id = comment["id"].as_i64().unwrap();

        let (_, page) = t
            .send("GET", &format!("/api/issues/{id}/comments"), Some(&t.owner), None)
            .await;
        assert_eq!(page["total"], 1);

        let (status, _) = t
            .send("DELETE", &format!("/api/comments/{comment_id}"), Some(&t.owner), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let mut ids = Vec::new();
        for title in ["one", "two"] {
            let (status, subtask) = t
                .send(
                    "POST",
                    &format!("/api/issues/{id}/subtasks"),
                    Some(&t.member),
                    Some(json!({"title": title})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            ids.push(subtask["id"].as_i64().unwrap());
        }
        ids.reverse();
        let (status, ordered) = t
            .send(
                "PUT",
                &format!("/api/issues/{id}/subtasks/order"),
                Some(&t.member),
                Some(json!({"subtask_ids": ids})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ordered[0]["title"], "two");

        let (status, done) = t
            .send(
                "PATCH",
                &format!("/api/issues/{id}/subtasks"),
                Some(&t.owner),
                Some(json!({"subtask_id": ids[0], "completed": true})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["completed"], true);
    }

    #[tokio::test]
    async fn test_invite_lookup_is_public() {
        let t = test_app();
        let (team_id, _) = t.board().await;
        t.send(
            "POST",
            &format!("/api/teams/{team_id}/invites"),
            Some(&t.owner),
            Some(json!({"email": "new@example.com"})),
        )
        .await;
        let token = t.invite_token("new@example.com");

        let (status, info) = t.send("GET", &format!("/api/invites/{token}"), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["team_name"], "Core");
        assert_eq!(info["email"], "new@example.com");

        let (status, _) = t.send("GET", "/api/invites/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_owner_cannot_leave() {
        let t = test_app();
        let (team_id, _) = t.board().await;
        let (status, _) = t
            .send("POST", &format!("/api/teams/{team_id}/leave"), Some(&t.owner), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = t
            .send("POST", &format!("/api/teams/{team_id}/leave"), Some(&t.member), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, teams) = t.send("GET", "/api/teams", Some(&t.member), None).await;
        assert!(teams.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_are_broadcast_to_the_project() {
        let t = test_app();
        let (_, project_id) = t.board().await;
        let mut rx = t.state.ws_tx.subscribe();

        let id = t.create_issue(project_id, "Live").await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.project_id, project_id);
        let msg: Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(msg["type"], "IssueCreated");
        assert_eq!(msg["data"]["issue"]["id"], id);
    }
}
