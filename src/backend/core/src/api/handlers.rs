//! API request handlers.
//!
//! Handlers return `Result<impl IntoResponse, PortalError>` so queue and
//! validation errors map onto HTTP statuses through `PortalError`.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, AppState};
use crate::error::{ErrorCode, PortalError};
use crate::jobs::{
    recommendations, ClearReport, Job, JobError, JobId, JobState, QueueLimits, QueueStats,
    Recommendation,
};
use crate::registration::{RegistrationOutcome, RegistrationRequest};

// ═══════════════════════════════════════════════════════════════════════════════
// Health & Metrics
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "accepting_jobs": !state.queue.is_shutting_down(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.metrics.render(),
    )
}

pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error_with_code("route not found", "NOT_FOUND")),
    )
}

// ═══════════════════════════════════════════════════════════════════════════════
// Registration
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobState,
}

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<impl IntoResponse, PortalError> {
    let Json(request) = payload.map_err(|rejection| {
        PortalError::new(ErrorCode::InvalidJson, rejection.body_text())
    })?;
    request.validate()?;

    let key = request.idempotency_key();
    let username = request.username.clone();
    let job_id = state.queue.submit(request, key)?;

    tracing::info!(job_id = %job_id, username = %username, "Registration queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::success(SubmitResponse {
            job_id,
            status: JobState::Pending,
        })),
    ))
}

/// Public view of a registration job. The payload is never exposed.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: JobId,
    pub state: JobState,
    pub cancelled: bool,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl From<&Job<RegistrationRequest, RegistrationOutcome>> for JobView {
    fn from(job: &Job<RegistrationRequest, RegistrationOutcome>) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            cancelled: job.is_cancelled(),
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            result: job
                .result
                .as_ref()
                .and_then(|outcome| serde_json::to_value(outcome).ok()),
            error: job.error.clone(),
        }
    }
}

fn parse_job_id(raw: &str) -> Result<JobId, PortalError> {
    raw.parse()
        .map_err(|_| PortalError::invalid_field("job_id", "must be a UUID"))
}

pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, PortalError> {
    let id = parse_job_id(&job_id)?;
    let view = state.queue.inspect(id, |job| JobView::from(job))?;
    Ok(Json(ApiResponse::success(view)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Admin
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct QueueStatsView {
    pub queue: String,
    pub stats: QueueStats,
    pub limits: QueueLimits,
    pub clear_enabled: bool,
    pub recommendations: Vec<Recommendation>,
}

pub async fn queue_stats(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.queue.snapshot();
    let limits = state.queue.limits();

    Json(ApiResponse::success(QueueStatsView {
        queue: state.queue.config().name.clone(),
        stats,
        limits,
        clear_enabled: state.queue.config().allow_clear,
        recommendations: recommendations(&stats, &limits),
    }))
}

pub async fn queue_clear(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<ClearReport>>, PortalError> {
    let report = state.queue.clear()?;
    tracing::warn!(
        jobs_removed = report.jobs_removed(),
        dedup_entries = report.dedup_entries,
        "Queue cleared by operator"
    );
    Ok(Json(ApiResponse::success(report)))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, PortalError> {
    let id = parse_job_id(&job_id)?;
    state.queue.cancel(id)?;
    tracing::info!(job_id = %id, "Job cancelled by operator");

    let view = state.queue.inspect(id, |job| JobView::from(job))?;
    Ok(Json(ApiResponse::success(view)))
}
