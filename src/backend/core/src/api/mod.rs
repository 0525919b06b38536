//! HTTP API for the registration portal.
//!
//! # Routes
//!
//! | Method | Path                       | Auth  |
//! |--------|----------------------------|-------|
//! | GET    | `/health`                  |       |
//! | GET    | `/metrics`                 |       |
//! | POST   | `/api/register`            |       |
//! | GET    | `/api/register/:job_id`    |       |
//! | GET    | `/api/admin/queue-stats`   | admin |
//! | POST   | `/api/admin/queue-clear`   | admin |
//! | DELETE | `/api/admin/jobs/:job_id`  | admin |
//!
//! Admin routes require `Authorization: Bearer <token>` when an admin token
//! is configured.

mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::registration::RegistrationQueue;
use crate::telemetry::MetricsRegistry;

pub use handlers::{JobView, QueueStatsView, SubmitResponse};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: RegistrationQueue,
    pub metrics: MetricsRegistry,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(queue: RegistrationQueue, metrics: MetricsRegistry) -> Self {
        Self {
            queue,
            metrics,
            admin_token: None,
        }
    }

    pub fn with_admin_token(mut self, token: Option<String>) -> Self {
        self.admin_token = token.map(Arc::from);
        self
    }
}

/// Build the API router.
///
/// ```rust,ignore
/// let state = AppState::new(queue, telemetry.metrics).with_admin_token(config.admin.token);
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        .route("/queue-stats", get(handlers::queue_stats))
        .route("/queue-clear", post(handlers::queue_clear))
        .route("/jobs/:job_id", delete(handlers::cancel_job))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route("/api/register", post(handlers::register))
        .route("/api/register/:job_id", get(handlers::job_status))
        .nest("/api/admin", admin)
        .fallback(handlers::not_found)
        .layer(axum_middleware::from_fn(middleware::request_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// API response wrapper.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code.into()),
        }
    }
}
