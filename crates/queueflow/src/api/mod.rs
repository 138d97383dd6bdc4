use std::collections::BTreeMap;
use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admin::{StatusRepo, StatusSummary};
use crate::error::JobInputError;
use crate::jobs::{Job, JobInput, JobLog, JobState, JobsRepo, SubmitDefaults};
use crate::settings::SettingsRepo;
use crate::workers::{Worker, WorkersRepo};

#[derive(Clone)]
pub struct ApiState {
    pub jobs: JobsRepo,
    pub workers: WorkersRepo,
    pub settings: SettingsRepo,
    pub status: StatusRepo,
    pub log: JobLog,
}

impl ApiState {
    pub fn new(pool: sqlx::SqlitePool, log: JobLog) -> Self {
        Self {
            jobs: JobsRepo::new(pool.clone()),
            workers: WorkersRepo::new(pool.clone()),
            settings: SettingsRepo::new(pool.clone()),
            status: StatusRepo::new(pool),
            log,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        // Inspect
        .route("/status", get(status))
        .route("/jobs", get(list_jobs).post(enqueue_job))
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/logs", get(job_logs))
        .route("/workers", get(list_workers))
        // DLQ
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id/retry", post(retry_dlq))
        // Settings
        .route("/config", get(list_config))
        .route("/config/:key", put(set_config))
        // Health
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    (status, Json(ErrorBody { error: msg.into() }))
}

fn internal_err(e: anyhow::Error) -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, format!("internal error: {e}"))
}

fn job_not_found(id: &str) -> ApiError {
    error(StatusCode::NOT_FOUND, format!("job not found: {id}"))
}

// Validation failures surface from the repo wrapped in anyhow.
fn submit_err(e: anyhow::Error) -> ApiError {
    match e.downcast_ref::<JobInputError>() {
        Some(busy @ JobInputError::InProgress(_)) => {
            error(StatusCode::CONFLICT, busy.to_string())
        }
        Some(input) => error(StatusCode::BAD_REQUEST, input.to_string()),
        None => internal_err(e),
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub summary: StatusSummary,
    pub workers: Vec<Worker>,
}

pub async fn status(State(state): State<ApiState>) -> Result<Json<StatusResponse>, ApiError> {
    let summary = state.status.summary().await.map_err(internal_err)?;
    let workers = state.workers.list().await.map_err(internal_err)?;
    Ok(Json(StatusResponse { summary, workers }))
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub state: Option<String>,
}

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(q): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let filter = match q.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            JobState::from_str(raw).map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?,
        ),
        None => None,
    };

    let jobs = state.jobs.list(filter).await.map_err(internal_err)?;
    Ok(Json(jobs))
}

pub async fn enqueue_job(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    let input =
        JobInput::from_value(body).map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let defaults = SubmitDefaults {
        max_retries: state.settings.max_retries().await.map_err(internal_err)?,
        ..SubmitDefaults::default()
    };
    let new_job = input
        .into_new_job(&defaults)
        .map_err(|e| error(StatusCode::BAD_REQUEST, e.to_string()))?;

    let job = state.jobs.upsert(new_job).await.map_err(submit_err)?;
    Ok((StatusCode::CREATED, Json(job)))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.jobs.get(&id).await.map_err(internal_err)? {
        Some(job) => Ok(Json(job)),
        None => Err(job_not_found(&id)),
    }
}

/// Raw log bytes. A job that exists but has not run yet has an empty log.
pub async fn job_logs(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let bytes = state
        .log
        .read(&id)
        .await
        .map_err(|e| internal_err(e.into()))?;

    let bytes = match bytes {
        Some(b) => b,
        None => {
            if state.jobs.get(&id).await.map_err(internal_err)?.is_none() {
                return Err(job_not_found(&id));
            }
            Vec::new()
        }
    };

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        bytes,
    )
        .into_response())
}

pub async fn list_workers(State(state): State<ApiState>) -> Result<Json<Vec<Worker>>, ApiError> {
    let workers = state.workers.list().await.map_err(internal_err)?;
    Ok(Json(workers))
}

pub async fn list_dlq(State(state): State<ApiState>) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.jobs.dlq_list().await.map_err(internal_err)?;
    Ok(Json(jobs))
}

pub async fn retry_dlq(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.jobs.dlq_retry(&id).await.map_err(internal_err)? {
        Some(job) => Ok(Json(job)),
        None => Err(error(
            StatusCode::NOT_FOUND,
            format!("no dead job with id {id}"),
        )),
    }
}

pub async fn list_config(
    State(state): State<ApiState>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let values = state.settings.list().await.map_err(internal_err)?;
    Ok(Json(values))
}

#[derive(Debug, Deserialize)]
pub struct SetConfigRequest {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

pub async fn set_config(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Json(body): Json<SetConfigRequest>,
) -> Result<Json<ConfigEntry>, ApiError> {
    if key.trim().is_empty() {
        return Err(error(StatusCode::BAD_REQUEST, "config key must not be empty"));
    }
    state
        .settings
        .set(&key, &body.value)
        .await
        .map_err(internal_err)?;

    Ok(Json(ConfigEntry {
        key: key.trim().to_string(),
        value: body.value,
    }))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
