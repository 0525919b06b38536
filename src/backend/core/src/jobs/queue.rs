//! Bounded in-process job queue with deduplication and backpressure.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::dedup::{DedupIndex, ReleasePolicy};
use super::job::{Job, JobHandler, JobId, JobState, RetryPolicy, MAX_BACKOFF_DELAY};
use super::stats::{QueueLimits, QueueStats};
use super::store::JobStore;
use crate::telemetry::QueueMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for a job queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue name, used in logs and metric labels
    pub name: String,
    /// Maximum number of jobs processing at once
    pub max_concurrency: usize,
    /// Maximum number of unfinished (pending + processing) jobs
    pub max_pending: usize,
    /// Attempt ceiling and backoff between attempts
    pub retry: RetryPolicy,
    /// How long an idempotency key stays reserved after submission
    #[serde(with = "humantime_serde")]
    pub dedup_cooldown: Duration,
    /// When a reserved idempotency key is released
    pub dedup_release: ReleasePolicy,
    /// Per-attempt time limit
    #[serde(with = "humantime_serde")]
    pub job_timeout: Option<Duration>,
    /// How long terminal jobs stay queryable
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Interval of the background sweeper (None disables it)
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
    /// Whether `clear()` is permitted
    pub allow_clear: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: "registration".to_string(),
            max_concurrency: 5,
            max_pending: 1000,
            retry: RetryPolicy::default(),
            dedup_cooldown: Duration::from_secs(5),
            dedup_release: ReleasePolicy::default(),
            job_timeout: None,
            retention: Duration::from_secs(3600),
            sweep_interval: Some(Duration::from_secs(30)),
            allow_clear: false,
        }
    }
}

impl QueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_dedup(mut self, cooldown: Duration, release: ReleasePolicy) -> Self {
        self.dedup_cooldown = cooldown;
        self.dedup_release = release;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_clear_enabled(mut self, allow_clear: bool) -> Self {
        self.allow_clear = allow_clear;
        self
    }

    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_concurrency == 0 {
            return Err(QueueError::InvalidConfig("max_concurrency must be at least 1".into()));
        }
        if self.max_pending == 0 {
            return Err(QueueError::InvalidConfig("max_pending must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(QueueError::InvalidConfig("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.longest_delay() > MAX_BACKOFF_DELAY {
            return Err(QueueError::InvalidConfig(format!(
                "retry backoff may not exceed {}s",
                MAX_BACKOFF_DELAY.as_secs()
            )));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::InvalidConfig("job_timeout must be positive".into()));
        }
        if self.sweep_interval.is_some_and(|t| t.is_zero()) {
            return Err(QueueError::InvalidConfig("sweep_interval must be positive".into()));
        }
        Ok(())
    }

    pub fn limits(&self) -> QueueLimits {
        QueueLimits {
            max_concurrency: self.max_concurrency,
            max_pending: self.max_pending,
            max_attempts: self.retry.max_attempts,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors and Reports
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors returned by queue operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("a job with this idempotency key is already queued: {existing}")]
    DuplicateSubmission { existing: JobId },

    #[error("queue is full ({limit} unfinished jobs)")]
    QueueFull { limit: usize },

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {id} is {state} and cannot be cancelled")]
    NotCancellable { id: JobId, state: JobState },

    #[error("clearing the queue is disabled")]
    ClearDisabled,

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("invalid queue configuration: {0}")]
    InvalidConfig(String),
}

/// What a `clear()` call removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub dedup_entries: usize,
}

impl ClearReport {
    pub fn jobs_removed(&self) -> usize {
        self.pending + self.completed + self.failed + self.cancelled
    }
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub dedup_entries: usize,
    pub jobs_evicted: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared State
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything guarded by the queue lock.
pub(crate) struct QueueState<P, R> {
    pub(crate) store: JobStore<P, R>,
    pub(crate) dedup: DedupIndex,
    pub(crate) total_processed: u64,
}

pub(crate) struct Shared<P, R> {
    pub(crate) config: QueueConfig,
    pub(crate) handler: Arc<dyn JobHandler<P, R>>,
    pub(crate) state: Mutex<QueueState<P, R>>,
    pub(crate) shutdown: CancellationToken,
    /// Signalled whenever a job leaves the unfinished set
    pub(crate) settled: Notify,
}

impl<P, R> Shared<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    pub(crate) fn publish_depth(&self, state: &QueueState<P, R>) {
        QueueMetrics::set_depth(
            &self.config.name,
            state.store.pending_len(),
            state.store.processing(),
        );
    }

    pub(crate) fn purge_expired(&self) -> PurgeReport {
        let now = Instant::now();
        let mut state = self.state.lock();
        let QueueState { store, dedup, .. } = &mut *state;

        let dedup_entries = dedup.purge_expired(now, |id| store.is_settled(id));
        let jobs_evicted = store.evict_settled(self.config.retention, now);
        // Keys whose jobs were just evicted are settled from now on.
        let dedup_entries = dedup_entries + dedup.purge_expired(now, |id| store.is_settled(id));

        if dedup_entries > 0 || jobs_evicted > 0 {
            tracing::debug!(
                queue = %self.config.name,
                dedup_entries,
                jobs_evicted,
                "Purged expired queue entries"
            );
        }
        PurgeReport {
            dedup_entries,
            jobs_evicted,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Job Queue
// ═══════════════════════════════════════════════════════════════════════════════

/// A bounded, deduplicating job queue that runs `handler` for every job.
///
/// Cloning is cheap; all clones share the same queue. Operations that may
/// start work (`submit`, `spawn_sweeper`) must be called from inside a
/// tokio runtime.
pub struct JobQueue<P, R> {
    shared: Arc<Shared<P, R>>,
}

impl<P, R> Clone for JobQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, R> std::fmt::Debug for JobQueue<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.shared.config.name)
            .field("max_concurrency", &self.shared.config.max_concurrency)
            .field("max_pending", &self.shared.config.max_pending)
            .finish()
    }
}

impl<P, R> JobQueue<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Create a queue that runs `handler` for every admitted job.
    pub fn new<H>(config: QueueConfig, handler: H) -> Result<Self, QueueError>
    where
        H: JobHandler<P, R>,
    {
        Self::with_handler(config, Arc::new(handler))
    }

    pub fn with_handler(
        config: QueueConfig,
        handler: Arc<dyn JobHandler<P, R>>,
    ) -> Result<Self, QueueError> {
        config.validate()?;

        tracing::info!(
            queue = %config.name,
            handler = handler.name(),
            max_concurrency = config.max_concurrency,
            max_pending = config.max_pending,
            max_attempts = config.retry.max_attempts,
            "Job queue created"
        );

        let dedup = DedupIndex::new(config.dedup_cooldown, config.dedup_release);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                handler,
                state: Mutex::new(QueueState {
                    store: JobStore::new(),
                    dedup,
                    total_processed: 0,
                }),
                shutdown: CancellationToken::new(),
                settled: Notify::new(),
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    pub fn limits(&self) -> QueueLimits {
        self.shared.config.limits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Submit a job.
    ///
    /// # Errors
    ///
    /// - `DuplicateSubmission` while another job holds an active reservation for `idempotency_key`
    /// - `QueueFull` when `max_pending` unfinished jobs already exist
    /// - `ShuttingDown` after `shutdown()`
    pub fn submit(&self, payload: P, idempotency_key: impl Into<String>) -> Result<JobId, QueueError> {
        let key = idempotency_key.into();
        let config = &self.shared.config;

        if self.is_shutting_down() {
            QueueMetrics::rejected(&config.name, "shutting_down");
            return Err(QueueError::ShuttingDown);
        }

        let id = JobId::new();
        {
            let now = Instant::now();
            let mut state = self.shared.state.lock();
            let QueueState { store, dedup, .. } = &mut *state;

            if let Err(existing) = dedup.check_and_reserve(&key, id, now, |j| store.is_settled(j)) {
                drop(state);
                tracing::debug!(key = %key, existing = %existing, "Duplicate submission rejected");
                QueueMetrics::rejected(&config.name, "duplicate");
                return Err(QueueError::DuplicateSubmission { existing });
            }

            if store.unfinished() >= config.max_pending {
                dedup.release_if_owned(&key, id);
                drop(state);
                tracing::warn!(
                    queue = %config.name,
                    limit = config.max_pending,
                    "Queue full, submission rejected"
                );
                QueueMetrics::rejected(&config.name, "queue_full");
                return Err(QueueError::QueueFull {
                    limit: config.max_pending,
                });
            }

            store.insert(id, key, payload, config.retry.max_attempts, now);
            self.shared.publish_depth(&state);
        }

        tracing::debug!(queue = %config.name, job_id = %id, "Job enqueued");
        QueueMetrics::submitted(&config.name);

        self.shared.dispatch();
        Ok(id)
    }

    /// Look up a job by id.
    pub fn get(&self, id: JobId) -> Result<Job<P, R>, QueueError>
    where
        P: Clone,
        R: Clone,
    {
        self.shared
            .state
            .lock()
            .store
            .get(id)
            .cloned()
            .ok_or(QueueError::NotFound(id))
    }

    /// Inspect a job without cloning it.
    pub fn inspect<T>(&self, id: JobId, f: impl FnOnce(&Job<P, R>) -> T) -> Result<T, QueueError> {
        let state = self.shared.state.lock();
        state.store.get(id).map(f).ok_or(QueueError::NotFound(id))
    }

    /// Jobs in `state`, in submission order.
    pub fn list_by_state(&self, state: JobState) -> Vec<Job<P, R>>
    where
        P: Clone,
        R: Clone,
    {
        self.shared
            .state
            .lock()
            .store
            .list_by_state(state)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Cancel a pending job and release its idempotency key.
    pub fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let now = Instant::now();
        {
            let mut state = self.shared.state.lock();
            let QueueState { store, dedup, .. } = &mut *state;
            let key = match store.cancel(id, now) {
                None => return Err(QueueError::NotFound(id)),
                Some(Err(current)) => {
                    return Err(QueueError::NotCancellable { id, state: current })
                }
                Some(Ok(job)) => job.idempotency_key.clone(),
            };
            dedup.release_if_owned(&key, id);
            self.shared.publish_depth(&state);
        }

        tracing::info!(queue = %self.shared.config.name, job_id = %id, state = "failed", "Job cancelled");
        QueueMetrics::cancelled(&self.shared.config.name);
        self.shared.settled.notify_waiters();
        Ok(())
    }

    /// Remove every pending and terminal job, and every idempotency
    /// reservation not held by a processing job.
    pub fn clear(&self) -> Result<ClearReport, QueueError> {
        if !self.shared.config.allow_clear {
            return Err(QueueError::ClearDisabled);
        }

        let report = {
            let mut state = self.shared.state.lock();
            let QueueState { store, dedup, .. } = &mut *state;
            let removed = store.clear_idle();
            let dedup_entries = dedup.retain(|_, entry| {
                store
                    .get(entry.job_id)
                    .is_some_and(|job| job.state == JobState::Processing)
            });
            self.shared.publish_depth(&state);
            ClearReport {
                pending: removed.pending,
                completed: removed.completed,
                failed: removed.failed,
                cancelled: removed.cancelled,
                dedup_entries,
            }
        };

        tracing::warn!(
            queue = %self.shared.config.name,
            jobs_removed = report.jobs_removed(),
            dedup_entries = report.dedup_entries,
            "Queue cleared"
        );
        self.shared.settled.notify_waiters();
        Ok(report)
    }

    /// Consistent point-in-time counts.
    pub fn snapshot(&self) -> QueueStats {
        let state = self.shared.state.lock();
        let counts = state.store.counts();
        QueueStats {
            pending: counts.pending,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            cancelled: counts.cancelled,
            total_processed: state.total_processed,
        }
    }

    /// Drop expired idempotency reservations and evict terminal jobs past retention.
    pub fn purge_expired(&self) -> PurgeReport {
        self.shared.purge_expired()
    }

    /// Start the background sweeper if a sweep interval is configured.
    ///
    /// The sweeper stops on `shutdown()` or when the last queue handle is dropped.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        self.shared
            .config
            .sweep_interval
            .map(|interval| self.shared.spawn_sweeper(interval))
    }

    /// Stop admitting jobs and cancel retry timers and the sweeper.
    ///
    /// Running handlers are not interrupted.
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        let stats = self.snapshot();
        tracing::info!(
            queue = %self.shared.config.name,
            pending = stats.pending,
            processing = stats.processing,
            "Job queue shutting down"
        );
    }

    /// Wait until no job is processing. Returns false if `timeout` elapsed first.
    pub async fn drain(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_until(|state| state.store.processing() == 0))
            .await
            .is_ok()
    }

    /// Wait until every submitted job reached a terminal state.
    pub async fn wait_idle(&self) {
        self.wait_until(|state| state.store.unfinished() == 0).await
    }

    async fn wait_until(&self, done: impl Fn(&QueueState<P, R>) -> bool) {
        loop {
            let notified = self.shared.settled.notified();
            if done(&*self.shared.state.lock()) {
                return;
            }
            notified.await;
        }
    }
}
