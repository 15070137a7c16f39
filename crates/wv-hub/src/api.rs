use axum::{
    extract::{Path, Query, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{error, info, warn};
use wv_core::{Member, TaskRecord, Team};
use wv_ingest::{
    IngestionSync, MemberSyncReport, PartialSync, SyncError, SyncReport, TaskSource,
    TaskSyncReport, TeamSyncReport,
};
use wv_storage::{StorageError, WorkloadStore};
use wv_workload::{RawWorkloadQuery, WorkloadAggregator, WorkloadError, WorkloadView};

pub struct AppState {
    store: Arc<Mutex<WorkloadStore>>,
    aggregator: WorkloadAggregator,
    ingestion: IngestionSync<Arc<dyn TaskSource>>,
    api_token: Option<String>,
    sync_gate: AsyncMutex<()>,
}

impl AppState {
    pub fn new(
        store: Arc<Mutex<WorkloadStore>>,
        aggregator: WorkloadAggregator,
        ingestion: IngestionSync<Arc<dyn TaskSource>>,
        api_token: Option<String>,
    ) -> Self {
        Self {
            store,
            aggregator,
            ingestion,
            api_token: api_token.filter(|token| !token.trim().is_empty()),
            sync_gate: AsyncMutex::new(()),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.api_token.is_some()
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid credentials")]
    Unauthorized,
    #[error("an ingestion run is already in progress")]
    Busy,
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    PartialSync(#[from] PartialSync),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Busy => StatusCode::CONFLICT,
            ApiError::Workload(WorkloadError::Storage(err)) | ApiError::Storage(err) => {
                storage_status(err)
            }
            ApiError::Workload(_) => StatusCode::BAD_REQUEST,
            ApiError::Sync(err) => sync_status(err),
            ApiError::PartialSync(partial) => sync_status(&partial.error),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthorized => "unauthorized",
            ApiError::Busy => "sync_in_progress",
            ApiError::Workload(WorkloadError::Storage(err)) | ApiError::Storage(err) => {
                storage_kind(err)
            }
            ApiError::Workload(err) => err.kind(),
            ApiError::Sync(err) => err.kind(),
            ApiError::PartialSync(partial) => partial.error.kind(),
        }
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn storage_kind(err: &StorageError) -> &'static str {
    match err {
        StorageError::NotFound { .. } => "not_found",
        _ => "storage_error",
    }
}

fn sync_status(err: &SyncError) -> StatusCode {
    match err {
        SyncError::Configuration(_) | SyncError::Storage { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SyncError::UpstreamUnavailable { .. }
        | SyncError::UpstreamEmpty { .. }
        | SyncError::PaginationLimit { .. } => StatusCode::BAD_GATEWAY,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    committed: Option<SyncReport>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        if status.is_server_error() {
            error!(event = "api_error", kind, status = status.as_u16(), error = %self);
        } else {
            warn!(event = "api_rejected", kind, status = status.as_u16(), error = %self);
        }

        let message = self.to_string();
        let committed = match self {
            ApiError::PartialSync(partial) => Some(partial.committed),
            _ => None,
        };
        (
            status,
            Json(ErrorBody {
                kind,
                message,
                committed,
            }),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/workload", get(workload))
        .route("/workload/:assignee", get(assignee_workload))
        .route("/tasks", get(tasks))
        .route("/members", get(members))
        .route("/teams", get(teams))
        .route("/sync", post(sync_all))
        .route("/sync/teams", post(sync_teams))
        .route("/sync/members", post(sync_members))
        .route("/sync/tasks", post(sync_tasks))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let api = Router::new().route("/login", post(login)).merge(protected);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest("/api", api)
        .with_state(state)
}

async fn require_token(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let Some(expected) = state.api_token.as_deref() else {
        return next.run(request).await;
    };
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    if presented != Some(expected) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// `token` is null and `auth_disabled` true when the hub runs without an API
/// token; `/api` routes then accept requests without credentials.
#[derive(Debug, Serialize)]
struct LoginResponse {
    token: Option<String>,
    auth_disabled: bool,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let admin = match state.store.lock().get_admin_by_username(body.username.trim()) {
        Ok(admin) => admin,
        Err(StorageError::NotFound { .. }) => return Err(ApiError::Unauthorized),
        Err(err) => return Err(err.into()),
    };
    if !admin.verify_password(&body.password) {
        return Err(ApiError::Unauthorized);
    }

    info!(event = "admin_login", username = %admin.username);
    Ok(Json(LoginResponse {
        token: state.api_token.clone(),
        auth_disabled: !state.auth_enabled(),
    }))
}

async fn workload(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawWorkloadQuery>,
) -> Result<Json<WorkloadView>, ApiError> {
    Ok(Json(state.aggregator.compute_raw(&raw)?))
}

async fn assignee_workload(
    State(state): State<Arc<AppState>>,
    Path(assignee): Path<String>,
    Query(mut raw): Query<RawWorkloadQuery>,
) -> Result<Json<WorkloadView>, ApiError> {
    raw.assignee = Some(assignee);
    Ok(Json(state.aggregator.compute_raw(&raw)?))
}

async fn tasks(
    State(state): State<Arc<AppState>>,
    Query(raw): Query<RawWorkloadQuery>,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    let query = state.aggregator.parse_query(&raw)?;
    Ok(Json(state.aggregator.tasks(&query)?))
}

async fn members(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Member>>, ApiError> {
    Ok(Json(state.store.lock().list_members()?))
}

async fn teams(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Team>>, ApiError> {
    Ok(Json(state.store.lock().list_teams()?))
}

async fn sync_all(State(state): State<Arc<AppState>>) -> Result<Json<SyncReport>, ApiError> {
    let _running = state.sync_gate.try_lock().map_err(|_| ApiError::Busy)?;
    Ok(Json(state.ingestion.sync_all().await?))
}

async fn sync_teams(State(state): State<Arc<AppState>>) -> Result<Json<TeamSyncReport>, ApiError> {
    let _running = state.sync_gate.try_lock().map_err(|_| ApiError::Busy)?;
    Ok(Json(state.ingestion.sync_teams().await?))
}

async fn sync_members(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MemberSyncReport>, ApiError> {
    let _running = state.sync_gate.try_lock().map_err(|_| ApiError::Busy)?;
    Ok(Json(state.ingestion.sync_members().await?))
}

async fn sync_tasks(State(state): State<Arc<AppState>>) -> Result<Json<TaskSyncReport>, ApiError> {
    let _running = state.sync_gate.try_lock().map_err(|_| ApiError::Busy)?;
    Ok(Json(state.ingestion.sync_tasks().await?))
}
