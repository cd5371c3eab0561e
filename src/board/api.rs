use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{MethodRouter, get},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use super::auth::{Actor, MaybeActor, RequireActor, TokenVerifier};
use super::db::DbHandle;
use super::models::*;
use crate::config::ServiceConfig;
use crate::errors::BoardError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub verifier: TokenVerifier,
    pub config: ServiceConfig,
}

impl AppState {
    pub fn new(db: DbHandle, config: ServiceConfig) -> Result<Self> {
        let verifier = TokenVerifier::from_config(&config)?;
        Ok(Self {
            db,
            verifier,
            config,
        })
    }
}

pub type SharedState = Arc<AppState>;

// ── List query types ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct WorkspaceListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectListQuery {
    pub workspace_id: Option<i64>,
    pub status: Option<ProjectStatus>,
    pub priority: Option<Priority>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketListQuery {
    pub project_id: Option<i64>,
    pub status: Option<TicketStatus>,
    pub priority: Option<Priority>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub ticket_id: Option<i64>,
    pub status: Option<TaskStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Unprocessable(String),
    Unauthorized(String),
    Internal(String),
}

impl ApiError {
    fn from_board(err: &BoardError) -> Self {
        match err {
            BoardError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            BoardError::Validation { .. } => ApiError::Unprocessable(err.to_string()),
            BoardError::Unauthorized(_) => ApiError::Unauthorized(err.to_string()),
            BoardError::LockPoisoned => {
                error!(error = %err, "request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Unauthorized(msg) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    [(header::WWW_AUTHENTICATE, "Bearer")],
                    Json(json!({"error": msg})),
                )
                    .into_response();
            }
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<BoardError> for ApiError {
    fn from(err: BoardError) -> Self {
        Self::from_board(&err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match BoardError::find(&err) {
            Some(board) => Self::from_board(board),
            None => {
                error!(error = %format!("{:#}", err), "request failed");
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::Unprocessable(rejection.body_text())
    }
}

// ── Router ────────────────────────────────────────────────────────────

/// Mounts a collection at `base` and `base/`, and its items at `base/{id}`.
fn collection(
    router: Router<SharedState>,
    base: &str,
    root: MethodRouter<SharedState>,
    item: MethodRouter<SharedState>,
) -> Router<SharedState> {
    router
        .route(base, root.clone())
        .route(&format!("{}/", base), root)
        .route(&format!("{}/{{id}}", base), item)
}

pub fn api_router() -> Router<SharedState> {
    let router = Router::new()
        .route("/", get(root))
        .route("/health", get(health_check));
    let router = collection(
        router,
        "/api/workspaces",
        get(list_workspaces).post(create_workspace),
        get(get_workspace)
            .patch(update_workspace)
            .delete(delete_workspace),
    );
    let router = collection(
        router,
        "/api/projects",
        get(list_projects).post(create_project),
        get(get_project).patch(update_project).delete(delete_project),
    );
    let router = collection(
        router,
        "/api/tickets",
        get(list_tickets).post(create_ticket),
        get(get_ticket).patch(update_ticket).delete(delete_ticket),
    );
    collection(
        router,
        "/api/tasks",
        get(list_tasks).post(create_task),
        get(get_task).patch(update_task).delete(delete_task),
    )
}

// ── Response mapping ──────────────────────────────────────────────────

/// Audit columns are only shown to authenticated callers.
fn present<T: Serialize>(value: &T, actor: Option<Actor>) -> Result<Json<Value>, ApiError> {
    let mut value = serde_json::to_value(value).map_err(anyhow::Error::from)?;
    if actor.is_none() {
        redact_audit(&mut value);
    }
    Ok(Json(value))
}

fn redact_audit(value: &mut Value) {
    if let Some(object) = value.as_object_mut() {
        if let Some(Value::Array(items)) = object.get_mut("items") {
            items.iter_mut().for_each(redact_audit);
        }
        object.remove("created_by");
        object.remove("updated_by");
    }
}

fn parent_filter(field: &str, value: Option<i64>) -> Result<Option<i64>, ApiError> {
    check_positive(field, value)?;
    Ok(value)
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn root(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "message": format!("Welcome to {}", state.config.project_name)
    }))
}

async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "env": state.config.env,
        "version": state.config.version,
    }))
}

// Workspaces

async fn create_workspace(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    payload: Result<Json<NewWorkspace>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    new.validate()?;
    let workspace = state
        .db
        .call(move |db| db.create_workspace(&new, actor.id()))
        .await?;
    Ok((StatusCode::CREATED, Json(workspace)))
}

async fn list_workspaces(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    query: Result<Query<WorkspaceListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let page = PageRequest::new(query.limit, query.offset)?;
    let workspaces = state.db.call(move |db| db.list_workspaces(page)).await?;
    present(&workspaces, actor)
}

async fn get_workspace(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let workspace = state
        .db
        .call(move |db| db.get_workspace(id))
        .await?
        .ok_or(BoardError::not_found(EntityKind::Workspace, id))?;
    present(&workspace, actor)
}

async fn update_workspace(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<WorkspacePatch>, JsonRejection>,
) -> Result<Json<Workspace>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    patch.validate()?;
    let workspace = state
        .db
        .call(move |db| db.update_workspace(id, &patch, actor.id()))
        .await?;
    Ok(Json(workspace))
}

async fn delete_workspace(
    State(state): State<SharedState>,
    RequireActor(_actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.db.call(move |db| db.delete_workspace(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Projects

async fn create_project(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    payload: Result<Json<NewProject>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    new.validate()?;
    let project = state
        .db
        .call(move |db| db.create_project(&new, actor.id()))
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

async fn list_projects(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    query: Result<Query<ProjectListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let page = PageRequest::new(query.limit, query.offset)?;
    let filter = ListFilter {
        parent_id: parent_filter("workspace_id", query.workspace_id)?,
        status: query.status,
        priority: query.priority,
    };
    let projects = state
        .db
        .call(move |db| db.list_projects(&filter, page))
        .await?;
    present(&projects, actor)
}

async fn get_project(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let project = state
        .db
        .call(move |db| db.get_project(id))
        .await?
        .ok_or(BoardError::not_found(EntityKind::Project, id))?;
    present(&project, actor)
}

async fn update_project(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ProjectPatch>, JsonRejection>,
) -> Result<Json<Project>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    patch.validate()?;
    let project = state
        .db
        .call(move |db| db.update_project(id, &patch, actor.id()))
        .await?;
    Ok(Json(project))
}

async fn delete_project(
    State(state): State<SharedState>,
    RequireActor(_actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.db.call(move |db| db.delete_project(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Tickets

async fn create_ticket(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    payload: Result<Json<NewTicket>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    new.validate()?;
    let ticket = state
        .db
        .call(move |db| db.create_ticket(&new, actor.id()))
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn list_tickets(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    query: Result<Query<TicketListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let page = PageRequest::new(query.limit, query.offset)?;
    let filter = ListFilter {
        parent_id: parent_filter("project_id", query.project_id)?,
        status: query.status,
        priority: query.priority,
    };
    let tickets = state
        .db
        .call(move |db| db.list_tickets(&filter, page))
        .await?;
    present(&tickets, actor)
}

async fn get_ticket(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let ticket = state
        .db
        .call(move |db| db.get_ticket(id))
        .await?
        .ok_or(BoardError::not_found(EntityKind::Ticket, id))?;
    present(&ticket, actor)
}

async fn update_ticket(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<TicketPatch>, JsonRejection>,
) -> Result<Json<Ticket>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    patch.validate()?;
    let ticket = state
        .db
        .call(move |db| db.update_ticket(id, &patch, actor.id()))
        .await?;
    Ok(Json(ticket))
}

async fn delete_ticket(
    State(state): State<SharedState>,
    RequireActor(_actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.db.call(move |db| db.delete_ticket(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Tasks

async fn create_task(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    payload: Result<Json<NewTask>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new) = payload?;
    new.validate()?;
    let task = state
        .db
        .call(move |db| db.create_task(&new, actor.id()))
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn list_tasks(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    query: Result<Query<TaskListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let page = PageRequest::new(query.limit, query.offset)?;
    let filter = ListFilter {
        parent_id: parent_filter("ticket_id", query.ticket_id)?,
        status: query.status,
        priority: None,
    };
    let tasks = state.db.call(move |db| db.list_tasks(&filter, page)).await?;
    present(&tasks, actor)
}

async fn get_task(
    State(state): State<SharedState>,
    MaybeActor(actor): MaybeActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(id) = id?;
    let task = state
        .db
        .call(move |db| db.get_task(id))
        .await?
        .ok_or(BoardError::not_found(EntityKind::Task, id))?;
    present(&task, actor)
}

async fn update_task(
    State(state): State<SharedState>,
    RequireActor(actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<TaskPatch>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Path(id) = id?;
    let Json(patch) = payload?;
    patch.validate()?;
    let task = state
        .db
        .call(move |db| db.update_task(id, &patch, actor.id()))
        .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    RequireActor(_actor): RequireActor,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(id) = id?;
    state.db.call(move |db| db.delete_task(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::auth::TokenIssuer;
    use crate::board::db::BoardDb;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use jsonwebtoken::Algorithm;
    use tower::ServiceExt;

    const SECRET: &str = "api-test-secret";

    fn test_app_with_db() -> (Router, DbHandle) {
        let config = ServiceConfig {
            secret_key: SECRET.into(),
            ..Default::default()
        };
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let state = Arc::new(AppState::new(db.clone(), config).unwrap());
        (api_router().with_state(state), db)
    }

    fn test_app() -> Router {
        test_app_with_db().0
    }

    fn token(actor: i64) -> String {
        TokenIssuer::new(SECRET, Algorithm::HS256, 30)
            .issue(Actor(actor))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        actor: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(actor) = actor {
            builder = builder.header("authorization", format!("Bearer {}", token(actor)));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, collection: &str, body: Value) -> Value {
        let (status, value) =
            send(app, "POST", &format!("/api/{}/", collection), Some(1), Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "create {} failed: {}", collection, value);
        value
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let request = Request::builder()
            .method("GET")
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = body_json(response.into_body()).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["env"], "development");
        assert_eq!(body["version"], "1.0.0");
    }

    #[tokio::test]
    async fn test_root_welcome() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Welcome to Kanban Service");
    }

    #[tokio::test]
    async fn test_hierarchy_end_to_end() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        let project = create(
            &app,
            "projects",
            json!({"workspace_id": ws["id"], "name": "Launch"}),
        )
        .await;
        assert_eq!(project["status"], "PLANNING");
        assert_eq!(project["priority"], "MEDIUM");

        let ticket = create(
            &app,
            "tickets",
            json!({"project_id": project["id"], "title": "Fix bug", "priority": "HIGH"}),
        )
        .await;
        assert_eq!(ticket["status"], "OPEN");
        assert_eq!(ticket["created_by"], 1);

        let task = create(
            &app,
            "tasks",
            json!({"ticket_id": ticket["id"], "title": "Write patch"}),
        )
        .await;
        assert_eq!(task["status"], "TODO");
        assert!(task["completed_at"].is_null());

        let (status, done) = send(
            &app,
            "PATCH",
            &format!("/api/tasks/{}", task["id"]),
            Some(2),
            Some(json!({"status": "DONE"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["status"], "DONE");
        assert!(done["completed_at"].is_string());
        assert_eq!(done["updated_by"], 2);
        assert_eq!(done["title"], "Write patch");

        let (status, _) = send(
            &app,
            "DELETE",
            &format!("/api/workspaces/{}", ws["id"]),
            Some(1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        for (collection, entity) in [
            ("workspaces", &ws),
            ("projects", &project),
            ("tickets", &ticket),
            ("tasks", &task),
        ] {
            let (status, body) = send(
                &app,
                "GET",
                &format!("/api/{}/{}", collection, entity["id"]),
                None,
                None,
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{} survived cascade", collection);
            assert!(body["error"].as_str().unwrap().contains("not found"));
        }
    }

    #[tokio::test]
    async fn test_create_with_missing_parent_is_404() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/projects/",
            Some(1),
            Some(json!({"workspace_id": 999, "name": "Ghost"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Workspace 999 not found");

        let (_, list) = send(&app, "GET", "/api/projects", None, None).await;
        assert_eq!(list["total"], 0);
    }

    #[tokio::test]
    async fn test_create_requires_token() {
        let app = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/workspaces")
            .header("content-type", "application/json")
            .body(Body::from(json!({"name": "Acme"}).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
    }

    #[tokio::test]
    async fn test_patch_without_token_is_401() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        let (status, _) = send(
            &app,
            "PATCH",
            &format!("/api/workspaces/{}", ws["id"]),
            None,
            Some(json!({"name": "Renamed"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, fetched) = send(&app, "GET", &format!("/api/workspaces/{}", ws["id"]), Some(1), None).await;
        assert_eq!(fetched["name"], "Acme");
    }

    #[tokio::test]
    async fn test_invalid_token_is_401() {
        let app = test_app();
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/workspaces/1")
            .header("authorization", "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_anonymous_reads_hide_audit_fields() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        assert_eq!(ws["created_by"], 1);

        let (status, list) = send(&app, "GET", "/api/workspaces/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list["total"], 1);
        let item = &list["items"][0];
        assert_eq!(item["name"], "Acme");
        assert!(item.get("created_by").is_none());
        assert!(item.get("updated_by").is_none());

        let (_, single) = send(&app, "GET", &format!("/api/workspaces/{}", ws["id"]), None, None).await;
        assert!(single.get("created_by").is_none());

        let (_, authed) = send(&app, "GET", "/api/workspaces", Some(5), None).await;
        assert_eq!(authed["items"][0]["created_by"], 1);
    }

    #[tokio::test]
    async fn test_validation_errors_are_422() {
        let app = test_app();
        let too_long = "x".repeat(101);
        for body in [
            json!({"name": ""}),
            json!({"name": too_long}),
            json!({"description": "missing name"}),
            json!({"name": 5}),
        ] {
            let (status, _) = send(&app, "POST", "/api/workspaces", Some(1), Some(body.clone())).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "body {}", body);
        }

        let (status, _) = send(
            &app,
            "POST",
            "/api/tickets",
            Some(1),
            Some(json!({"project_id": 1, "title": "t", "status": "NOT_A_STATUS"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _) = send(
            &app,
            "POST",
            "/api/tickets",
            Some(1),
            Some(json!({"project_id": 0, "title": "t"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_malformed_json_is_422() {
        let app = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/workspaces")
            .header("authorization", format!("Bearer {}", token(1)))
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_client_cannot_set_server_fields() {
        let app = test_app();
        let ws = create(
            &app,
            "workspaces",
            json!({"name": "Acme", "id": 500, "created_by": 99, "created_at": "2000-01-01T00:00:00Z"}),
        )
        .await;
        assert_ne!(ws["id"], 500);
        assert_eq!(ws["created_by"], 1);
        assert_ne!(ws["created_at"], "2000-01-01T00:00:00Z");
    }

    #[tokio::test]
    async fn test_patch_null_clears_nullable_field() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        let project = create(&app, "projects", json!({"workspace_id": ws["id"], "name": "Launch"})).await;
        let ticket = create(
            &app,
            "tickets",
            json!({"project_id": project["id"], "title": "Fix bug", "assignee_id": 4, "description": "crash"}),
        )
        .await;

        let (status, patched) = send(
            &app,
            "PATCH",
            &format!("/api/tickets/{}", ticket["id"]),
            Some(1),
            Some(json!({"assignee_id": null})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(patched["assignee_id"].is_null());
        assert_eq!(patched["description"], "crash");
    }

    #[tokio::test]
    async fn test_patch_missing_is_404() {
        let app = test_app();
        let (status, body) = send(
            &app,
            "PATCH",
            "/api/projects/42",
            Some(1),
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Project 42 not found");
    }

    #[tokio::test]
    async fn test_delete_twice_is_404() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        let uri = format!("/api/workspaces/{}", ws["id"]);
        let (first, _) = send(&app, "DELETE", &uri, Some(1), None).await;
        let (second, _) = send(&app, "DELETE", &uri, Some(1), None).await;
        assert_eq!(first, StatusCode::NO_CONTENT);
        assert_eq!(second, StatusCode::NOT_FOUND);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_project_and_ticket_delete() {
        let (app, db) = test_app_with_db();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        let project = create(
            &app,
            "projects",
            json!({"workspace_id": ws["id"], "name": "Launch"}),
        )
        .await;
        let ticket = create(
            &app,
            "tickets",
            json!({"project_id": project["id"], "title": "Checkout"}),
        )
        .await;
        for title in ["a", "b", "c"] {
            create(
                &app,
                "tasks",
                json!({"ticket_id": ticket["id"], "title": title}),
            )
            .await;
        }

        let project_uri = format!("/api/projects/{}", project["id"]);
        let ticket_uri = format!("/api/tickets/{}", ticket["id"]);
        let ((project_status, _), (ticket_status, _)) = tokio::join!(
            send(&app, "DELETE", &project_uri, Some(1), None),
            send(&app, "DELETE", &ticket_uri, Some(1), None),
        );
        assert_eq!(project_status, StatusCode::NO_CONTENT);
        assert!(
            matches!(
                ticket_status,
                StatusCode::NO_CONTENT | StatusCode::NOT_FOUND
            ),
            "ticket delete answered {}",
            ticket_status
        );

        let leftovers = db
            .call(|db| {
                let mut leftovers = Vec::new();
                for kind in EntityKind::ALL {
                    leftovers.push((kind, db.count(kind)?, db.orphans(kind)?));
                }
                Ok(leftovers)
            })
            .await
            .unwrap();
        for (kind, count, orphans) in leftovers {
            assert!(orphans.is_empty(), "orphaned {} rows: {:?}", kind, orphans);
            let expected = if kind == EntityKind::Workspace { 1 } else { 0 };
            assert_eq!(count, expected, "{} rows left", kind);
        }
    }

    #[tokio::test]
    async fn test_list_filters_and_paging() {
        let app = test_app();
        let ws = create(&app, "workspaces", json!({"name": "Acme"})).await;
        for i in 0..5 {
            let priority = if i % 2 == 0 { "HIGH" } else { "LOW" };
            create(
                &app,
                "projects",
                json!({"workspace_id": ws["id"], "name": format!("p{}", i), "priority": priority}),
            )
            .await;
        }

        let (status, page) = send(
            &app,
            "GET",
            &format!("/api/projects?workspace_id={}&limit=2&offset=1", ws["id"]),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 5);
        assert_eq!(page["limit"], 2);
        assert_eq!(page["offset"], 1);
        assert_eq!(page["items"].as_array().unwrap().len(), 2);
        assert_eq!(page["items"][0]["name"], "p3");

        let (_, high) = send(&app, "GET", "/api/projects/?priority=HIGH", None, None).await;
        assert_eq!(high["total"], 3);

        let (_, none) = send(&app, "GET", "/api/projects?status=ACTIVE", None, None).await;
        assert_eq!(none["total"], 0);
    }

    #[tokio::test]
    async fn test_bad_query_is_422() {
        let app = test_app();
        for uri in [
            "/api/workspaces?limit=0",
            "/api/workspaces?limit=101",
            "/api/workspaces?offset=-1",
            "/api/tickets?status=SHIPPED",
            "/api/tasks?limit=abc",
            "/api/projects?workspace_id=0",
        ] {
            let (status, _) = send(&app, "GET", uri, None, None).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_non_numeric_id_is_422() {
        let app = test_app();
        let (status, _) = send(&app, "GET", "/api/tickets/abc", None, None).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_redact_audit_handles_pages_and_entities() {
        let mut page = json!({
            "total": 1,
            "items": [{"id": 1, "created_by": 3, "updated_by": null}],
            "limit": 20,
            "offset": 0
        });
        redact_audit(&mut page);
        assert_eq!(page["items"][0], json!({"id": 1}));
        assert_eq!(page["total"], 1);
    }
}
