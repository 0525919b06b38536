//! Background job queue for Portal Core.
//!
//! This module provides a bounded, in-process job queue with:
//!
//! - **Job Definitions**: Typed payloads, lifecycle states, retry and backoff policies
//! - **Deduplication**: Idempotency keys reserved per submission with configurable release
//! - **Scheduler**: Bounded-concurrency admission in submission order
//! - **Stats**: Consistent snapshots and operator recommendations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                              Job Queue                                       │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  submit(payload, key)                                                        │
//! │         │                                                                    │
//! │         ▼                                                                    │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    ┌─────────────┐  │
//! │  │   Dedup     │    │  Job Store  │    │  Scheduler  │    │   Handler   │  │
//! │  │   Index     │───▶│  (pending   │───▶│  (admit ≤   │───▶│  (tokio     │  │
//! │  │             │    │   by seq)   │    │  capacity)  │    │   task)     │  │
//! │  └─────────────┘    └─────────────┘    └─────────────┘    └─────────────┘  │
//! │                            ▲                                     │         │
//! │                            └──────── settle / retry ─────────────┘         │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use portal_core::jobs::{JobContext, JobError, JobHandler, JobQueue, QueueConfig};
//!
//! struct SendWelcome;
//!
//! #[async_trait]
//! impl JobHandler<String, ()> for SendWelcome {
//!     async fn handle(&self, ctx: &JobContext, email: &String) -> Result<(), JobError> {
//!         // Do work...
//!         Ok(())
//!     }
//! }
//!
//! let queue = JobQueue::new(QueueConfig::default(), SendWelcome)?;
//! let job_id = queue.submit("alice@example.com".to_string(), "user_alice")?;
//! ```

pub mod dedup;
pub mod job;
pub mod queue;
pub mod stats;
pub mod store;
mod worker;

pub use dedup::{DedupEntry, DedupIndex, ReleasePolicy};
pub use job::{
    BackoffStrategy, Job, JobContext, JobError, JobErrorKind, JobHandler, JobId, JobState,
    RetryPolicy, MAX_BACKOFF_DELAY,
};
pub use queue::{ClearReport, JobQueue, PurgeReport, QueueConfig, QueueError};
pub use stats::{recommendations, QueueLimits, QueueStats, Recommendation, Severity};
pub use store::StateCounts;
