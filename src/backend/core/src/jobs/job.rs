//! Job definitions and traits.
//!
//! This module provides the core abstractions for queued jobs:
//!
//! - **Job**: The record the queue keeps for every submission
//! - **JobState**: Lifecycle states and the allowed transitions between them
//! - **JobHandler**: The async business logic invoked by the worker pool
//! - **RetryPolicy**: Attempt ceiling and backoff strategy between attempts

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::PortalError;

// ═══════════════════════════════════════════════════════════════════════════════
// Job Identification
// ═══════════════════════════════════════════════════════════════════════════════

/// Unique identifier for a job instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Create a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job State
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──admit──▶ Processing ──ok──▶ Completed
///    ▲                   │
///    └──retry (backoff)──┤
///                        └──exhausted──▶ Failed
/// Pending ──cancel──▶ Failed (Cancelled)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker slot (or for its retry delay to elapse)
    Pending,
    /// A worker is running the handler
    Processing,
    /// Handler succeeded
    Completed,
    /// Retries exhausted, fatal error, or cancelled
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Check whether the scheduler may move a job from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Error
// ═══════════════════════════════════════════════════════════════════════════════

/// What produced a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The handler returned an error
    Handler,
    /// The attempt exceeded the configured job timeout
    Timeout,
    /// The handler panicked
    Panicked,
    /// The job was cancelled before it was admitted
    Cancelled,
}

/// Error recorded against a job attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    /// Error category
    pub kind: JobErrorKind,
    /// Error message
    pub message: String,
    /// Whether another attempt may succeed
    pub retryable: bool,
    /// Optional machine-readable code
    pub code: Option<String>,
}

impl JobError {
    /// Create a new retryable error.
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Handler,
            message: message.into(),
            retryable: true,
            code: None,
        }
    }

    /// Create a new non-retryable (fatal) error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Handler,
            message: message.into(),
            retryable: false,
            code: None,
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            kind: JobErrorKind::Timeout,
            message: format!("attempt exceeded {}ms", limit.as_millis()),
            retryable: true,
            code: Some("JOB_TIMEOUT".to_string()),
        }
    }

    pub fn panicked(message: impl Into<String>) -> Self {
        Self {
            kind: JobErrorKind::Panicked,
            message: message.into(),
            retryable: true,
            code: Some("JOB_PANICKED".to_string()),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: JobErrorKind::Cancelled,
            message: "cancelled before processing".to_string(),
            retryable: false,
            code: Some("JOB_CANCELLED".to_string()),
        }
    }

    /// Add an error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == JobErrorKind::Cancelled
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = &self.code {
            write!(f, " (code: {})", code)?;
        }
        Ok(())
    }
}

impl std::error::Error for JobError {}

impl From<PortalError> for JobError {
    fn from(error: PortalError) -> Self {
        Self {
            kind: JobErrorKind::Handler,
            message: error.user_message().to_string(),
            retryable: error.is_retryable(),
            code: Some(error.code().to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Backoff Strategy
// ═══════════════════════════════════════════════════════════════════════════════

/// Longest delay a retry may wait before becoming eligible again.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Strategy for calculating the delay before a failed job becomes eligible again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Retry immediately
    None,
    /// Fixed delay between retries
    Fixed {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    /// Linear increase in delay (initial + increment * retry)
    Linear {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        increment: Duration,
    },
    /// Exponential increase in delay (initial * multiplier^retry), capped at `max`
    Exponential {
        #[serde(with = "humantime_serde")]
        initial: Duration,
        #[serde(with = "humantime_serde")]
        max: Duration,
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffStrategy {
    /// Calculate the delay for a given retry number (0-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Fixed { delay } => *delay,
            Self::Linear { initial, increment } => {
                initial.saturating_add(increment.saturating_mul(retry))
            }
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let secs = initial.as_secs_f64() * multiplier.powi(retry as i32);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }

    /// Create a fixed backoff strategy.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed { delay }
    }

    /// Create an exponential backoff strategy with sensible defaults.
    pub fn exponential() -> Self {
        Self::default()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for job retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,
    /// Backoff strategy for calculating delays
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Create a policy with a specific attempt ceiling.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Check if another attempt should be made after `attempts` have run.
    pub fn should_retry(&self, attempts: u32, error: &JobError) -> bool {
        error.retryable && attempts < self.max_attempts
    }

    /// Delay before the next attempt, given how many attempts have run.
    pub fn next_retry_delay(&self, attempts: u32) -> Duration {
        self.backoff.delay_for_retry(attempts.saturating_sub(1))
    }

    /// Upper bound on the delay any retry under this policy waits.
    ///
    /// Exponential backoff is bounded by its configured `max`.
    pub fn longest_delay(&self) -> Duration {
        if self.max_attempts < 2 {
            return Duration::ZERO;
        }
        match &self.backoff {
            BackoffStrategy::Exponential { max, .. } => *max,
            backoff => backoff
                .delay_for_retry(0)
                .max(backoff.delay_for_retry(self.max_attempts - 2)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Record
// ═══════════════════════════════════════════════════════════════════════════════

/// A queued job and its lifecycle bookkeeping.
///
/// The payload is present while the job waits. The worker takes it for the
/// duration of an attempt and hands it back only if the job is retried.
/// Terminal jobs no longer hold it.
#[derive(Debug, Clone)]
pub struct Job<P, R> {
    /// Unique job identifier
    pub id: JobId,
    /// Caller-supplied deduplication key
    pub idempotency_key: String,
    /// Business data for the handler
    pub payload: Option<P>,
    /// Current state
    pub state: JobState,
    /// Number of attempts started so far
    pub attempts: u32,
    /// Attempt ceiling
    pub max_attempts: u32,
    /// When the job was submitted
    pub created_at: DateTime<Utc>,
    /// When the latest attempt started
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state
    pub finished_at: Option<DateTime<Utc>>,
    /// Handler output on success
    pub result: Option<R>,
    /// Last attempt error
    pub error: Option<JobError>,
    pub(crate) seq: u64,
    pub(crate) ready_at: Instant,
    pub(crate) settled_at: Option<Instant>,
}

impl<P, R> Job<P, R> {
    pub(crate) fn new(
        id: JobId,
        idempotency_key: String,
        payload: P,
        max_attempts: u32,
        seq: u64,
        now: Instant,
    ) -> Self {
        Self {
            id,
            idempotency_key,
            payload: Some(payload),
            state: JobState::Pending,
            attempts: 0,
            max_attempts,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
            seq,
            ready_at: now,
            settled_at: None,
        }
    }

    /// Position in submission order.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether this job was cancelled rather than executed.
    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Failed && self.error.as_ref().is_some_and(JobError::is_cancelled)
    }

    /// Whether a pending job may be admitted at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        self.state == JobState::Pending && self.ready_at <= now
    }

    /// Time between the start of the latest attempt and the terminal transition.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Mark as processing and take the payload for the worker.
    pub(crate) fn mark_processing(&mut self) -> Option<P> {
        debug_assert!(self.state.can_transition_to(JobState::Processing));
        self.state = JobState::Processing;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
        self.payload.take()
    }

    pub(crate) fn mark_completed(&mut self, result: R, now: Instant) {
        debug_assert!(self.state.can_transition_to(JobState::Completed));
        self.state = JobState::Completed;
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
        self.settled_at = Some(now);
    }

    /// Return to pending with the payload restored, eligible again at `ready_at`.
    pub(crate) fn mark_retry(&mut self, error: JobError, payload: P, ready_at: Instant) {
        debug_assert!(self.state.can_transition_to(JobState::Pending));
        self.state = JobState::Pending;
        self.error = Some(error);
        self.payload = Some(payload);
        self.ready_at = ready_at;
    }

    pub(crate) fn mark_failed(&mut self, error: JobError, now: Instant) {
        debug_assert!(self.state.can_transition_to(JobState::Failed));
        self.state = JobState::Failed;
        self.error = Some(error);
        self.payload = None;
        self.finished_at = Some(Utc::now());
        self.settled_at = Some(now);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Context
// ═══════════════════════════════════════════════════════════════════════════════

/// Context passed to handlers for each attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    idempotency_key: String,
    attempt: u32,
    max_attempts: u32,
}

impl JobContext {
    pub fn new(job_id: JobId, idempotency_key: impl Into<String>, attempt: u32, max_attempts: u32) -> Self {
        Self {
            job_id,
            idempotency_key: idempotency_key.into(),
            attempt,
            max_attempts,
        }
    }

    /// Get the job ID.
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    /// Get the current attempt number (1-indexed).
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failure of this attempt will be final.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Log a message associated with this job.
    pub fn log_info(&self, message: &str) {
        tracing::info!(
            job_id = %self.job_id,
            key = %self.idempotency_key,
            attempt = self.attempt,
            message
        );
    }

    /// Log a warning associated with this job.
    pub fn log_warn(&self, message: &str) {
        tracing::warn!(
            job_id = %self.job_id,
            key = %self.idempotency_key,
            attempt = self.attempt,
            message
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Handler
// ═══════════════════════════════════════════════════════════════════════════════

/// Business logic run by the worker pool for every admitted job.
#[async_trait]
pub trait JobHandler<P, R>: Send + Sync + 'static {
    /// Name used in logs and metric labels.
    fn name(&self) -> &'static str {
        "job"
    }

    /// Run one attempt.
    ///
    /// # Errors
    ///
    /// Return `JobError::retryable()` for transient failures that should be
    /// retried, and `JobError::fatal()` for permanent failures.
    async fn handle(&self, ctx: &JobContext, payload: &P) -> Result<R, JobError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);

        let uuid = Uuid::new_v4();
        let id = JobId::from_uuid(uuid);
        assert_eq!(id.0, uuid);
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
    }

    #[test]
    fn test_job_state() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Processing.is_terminal());

        assert!(JobState::Pending.can_transition_to(JobState::Processing));
        assert!(JobState::Processing.can_transition_to(JobState::Pending));
        assert!(!JobState::Completed.can_transition_to(JobState::Pending));
        assert!(!JobState::Failed.can_transition_to(JobState::Processing));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));

        assert_eq!("Processing".parse::<JobState>().unwrap(), JobState::Processing);
        assert!("running".parse::<JobState>().is_err());
    }

    #[test]
    fn test_backoff_fixed() {
        let backoff = BackoffStrategy::fixed(Duration::from_millis(250));
        assert_eq!(backoff.delay_for_retry(0), Duration::from_millis(250));
        assert_eq!(backoff.delay_for_retry(5), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_exponential() {
        let backoff = BackoffStrategy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(100),
            multiplier: 2.0,
        };
        assert_eq!(backoff.delay_for_retry(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for_retry(3), Duration::from_secs(8));
        // Should cap at max
        assert_eq!(backoff.delay_for_retry(10), Duration::from_secs(100));
        assert_eq!(backoff.delay_for_retry(5000), Duration::from_secs(100));
    }

    #[test]
    fn test_backoff_linear() {
        let backoff = BackoffStrategy::Linear {
            initial: Duration::from_secs(5),
            increment: Duration::from_secs(3),
        };
        assert_eq!(backoff.delay_for_retry(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_retry(2), Duration::from_secs(11));

        let huge = BackoffStrategy::Linear {
            initial: Duration::MAX,
            increment: Duration::MAX,
        };
        assert_eq!(huge.delay_for_retry(3), Duration::MAX);
    }

    #[test]
    fn test_longest_delay() {
        let linear = RetryPolicy::with_attempts(4).with_backoff(BackoffStrategy::Linear {
            initial: Duration::from_secs(1),
            increment: Duration::from_secs(2),
        });
        assert_eq!(linear.longest_delay(), Duration::from_secs(5));

        let exponential = RetryPolicy::with_attempts(3).with_backoff(BackoffStrategy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::MAX,
            multiplier: 2.0,
        });
        assert_eq!(exponential.longest_delay(), Duration::MAX);

        let single = RetryPolicy::no_retry().with_backoff(BackoffStrategy::fixed(Duration::MAX));
        assert_eq!(single.longest_delay(), Duration::ZERO);
    }

    #[test]
    fn test_backoff_deserialize_humantime() {
        let backoff: BackoffStrategy =
            serde_json::from_str(r#"{"type":"fixed","delay":"500ms"}"#).unwrap();
        assert_eq!(backoff, BackoffStrategy::fixed(Duration::from_millis(500)));
    }

    #[test]
    fn test_retry_policy() {
        let policy = RetryPolicy::with_attempts(3);

        let retryable_error = JobError::retryable("temporary failure");
        let fatal_error = JobError::fatal("permanent failure");

        assert!(policy.should_retry(1, &retryable_error));
        assert!(policy.should_retry(2, &retryable_error));
        assert!(!policy.should_retry(3, &retryable_error));

        assert!(!policy.should_retry(1, &fatal_error));
        assert!(!RetryPolicy::no_retry().should_retry(1, &retryable_error));
    }

    #[test]
    fn test_retry_delay_uses_first_step_after_first_attempt() {
        let policy = RetryPolicy::with_attempts(4).with_backoff(BackoffStrategy::Linear {
            initial: Duration::from_secs(1),
            increment: Duration::from_secs(1),
        });
        assert_eq!(policy.next_retry_delay(1), Duration::from_secs(1));
        assert_eq!(policy.next_retry_delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_job_lifecycle() {
        let now = Instant::now();
        let mut job: Job<String, u32> =
            Job::new(JobId::new(), "user_alice".into(), "payload".into(), 2, 0, now);
        assert!(job.is_ready(now));

        let payload = job.mark_processing().unwrap();
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.attempts, 1);
        assert!(job.payload.is_none());

        job.mark_retry(JobError::retryable("flaky"), payload, now + Duration::from_secs(1));
        assert_eq!(job.state, JobState::Pending);
        assert!(!job.is_ready(now));
        assert!(job.is_ready(now + Duration::from_secs(1)));

        job.mark_processing();
        job.mark_completed(7, now);
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.result, Some(7));
        assert!(job.error.is_none());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_cancelled_job() {
        let now = Instant::now();
        let mut job: Job<(), ()> = Job::new(JobId::new(), "k".into(), (), 1, 0, now);
        job.mark_failed(JobError::cancelled(), now);
        assert!(job.is_cancelled());
        assert!(job.is_terminal());
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_job_error() {
        let error = JobError::retryable("network timeout").with_code("TIMEOUT");
        assert!(error.retryable);
        assert_eq!(error.code, Some("TIMEOUT".to_string()));
        assert_eq!(error.to_string(), "network timeout (code: TIMEOUT)");

        let timeout = JobError::timeout(Duration::from_millis(1500));
        assert_eq!(timeout.kind, JobErrorKind::Timeout);
        assert!(timeout.message.contains("1500ms"));
    }
}
