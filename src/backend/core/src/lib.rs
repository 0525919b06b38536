#![allow(clippy::result_large_err)]
//! # Portal Core
//!
//! Backend of the game portal's public registration flow.
//!
//! ## Architecture
//!
//! - **Jobs**: Bounded in-process job queue with deduplication, retries and backpressure
//! - **Registration**: Account creation and verification mail, run as queue jobs
//! - **API**: Axum routes for registration and queue administration
//! - **Telemetry**: Structured logging and Prometheus metrics
//! - **Config**: File and environment configuration

pub mod api;
pub mod config;
pub mod error;
pub mod jobs;
pub mod registration;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, PortalError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::config::Config;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, PortalError, Result};
    pub use crate::jobs::{
        BackoffStrategy, Job, JobContext, JobError, JobHandler, JobId, JobQueue, JobState,
        QueueConfig, QueueError, QueueStats, ReleasePolicy, RetryPolicy,
    };
    pub use crate::registration::{
        AccountStore, InMemoryAccountStore, LogMailer, Mailer, RegistrationHandler,
        RegistrationOutcome, RegistrationQueue, RegistrationRequest,
    };
}
