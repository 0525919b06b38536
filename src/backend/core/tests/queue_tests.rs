//! Integration tests for the job queue.
//!
//! Tests cover:
//! - Concurrency ceiling and admission order
//! - Idempotency key deduplication under each release policy
//! - Backpressure and cancellation
//! - Retry bounds and retry position
//! - Snapshot consistency across cancel and clear
//! - Shutdown behavior

use async_trait::async_trait;
use parking_lot::Mutex;
use portal_core::jobs::{
    BackoffStrategy, JobContext, JobError, JobErrorKind, JobHandler, JobId, JobQueue, JobState,
    QueueConfig, QueueError, ReleasePolicy, RetryPolicy,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Handler
// ============================================================================

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    AlwaysFail,
    FailFirstAttempt,
}

/// Observations shared between a test and its handler.
#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicU32,
    order: Mutex<Vec<u32>>,
}

impl Probe {
    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn order(&self) -> Vec<u32> {
        self.order.lock().clone()
    }
}

struct ProbeHandler {
    probe: Arc<Probe>,
    delay: Duration,
    behavior: Behavior,
}

#[async_trait]
impl JobHandler<u32, u32> for ProbeHandler {
    async fn handle(&self, ctx: &JobContext, payload: &u32) -> Result<u32, JobError> {
        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.peak.fetch_max(active, Ordering::SeqCst);
        self.probe.calls.fetch_add(1, Ordering::SeqCst);
        self.probe.order.lock().push(*payload);

        tokio::time::sleep(self.delay).await;
        self.probe.active.fetch_sub(1, Ordering::SeqCst);

        match self.behavior {
            Behavior::Succeed => Ok(payload * 10),
            Behavior::AlwaysFail => Err(JobError::retryable("always fails")),
            Behavior::FailFirstAttempt if ctx.attempt() == 1 => {
                Err(JobError::retryable("first attempt fails"))
            }
            Behavior::FailFirstAttempt => Ok(payload * 10),
        }
    }
}

fn base_config() -> QueueConfig {
    QueueConfig::default()
        .with_name("test")
        .with_sweep_interval(None)
}

fn queue(
    config: QueueConfig,
    delay: Duration,
    behavior: Behavior,
) -> (JobQueue<u32, u32>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let handler = ProbeHandler {
        probe: probe.clone(),
        delay,
        behavior,
    };
    (JobQueue::new(config, handler).unwrap(), probe)
}

fn key(n: u32) -> String {
    format!("user_{}", n)
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrency_ceiling_holds() {
    let (queue, probe) = queue(
        base_config().with_max_concurrency(2),
        Duration::from_millis(100),
        Behavior::Succeed,
    );

    for n in 0..5 {
        queue.submit(n, key(n)).unwrap();
    }

    let stats = queue.snapshot();
    assert_eq!(stats.processing, 2);
    assert_eq!(stats.pending, 3);

    queue.wait_idle().await;

    assert_eq!(probe.peak(), 2);
    let stats = queue.snapshot();
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.pending, 0);
}

#[tokio::test(start_paused = true)]
async fn test_admission_follows_submission_order() {
    let (queue, probe) = queue(
        base_config().with_max_concurrency(1),
        Duration::from_millis(10),
        Behavior::Succeed,
    );

    for n in 1..=5 {
        queue.submit(n, key(n)).unwrap();
    }
    queue.wait_idle().await;

    assert_eq!(probe.order(), vec![1, 2, 3, 4, 5]);
    assert_eq!(probe.peak(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_immediate_retry_keeps_its_position() {
    let config = base_config()
        .with_max_concurrency(1)
        .with_retry(RetryPolicy::with_attempts(2).with_backoff(BackoffStrategy::None));
    let (queue, probe) = queue(config, Duration::from_millis(10), Behavior::FailFirstAttempt);

    queue.submit(1, key(1)).unwrap();
    queue.submit(2, key(2)).unwrap();
    queue.wait_idle().await;

    // Job 1 is retried ahead of job 2, which was submitted later.
    assert_eq!(probe.order(), vec![1, 1, 2, 2]);
    assert_eq!(queue.snapshot().completed, 2);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_does_not_block_other_jobs() {
    let config = base_config().with_max_concurrency(1).with_retry(
        RetryPolicy::with_attempts(2).with_backoff(BackoffStrategy::fixed(Duration::from_secs(1))),
    );
    let (queue, probe) = queue(config, Duration::from_millis(10), Behavior::FailFirstAttempt);

    queue.submit(1, key(1)).unwrap();
    queue.submit(2, key(2)).unwrap();
    queue.wait_idle().await;

    let order = probe.order();
    assert_eq!(&order[..2], &[1, 2]);
    assert_eq!(order.len(), 4);
    assert_eq!(queue.snapshot().completed, 2);
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_duplicate_submission_references_existing_job() {
    let (queue, _probe) = queue(base_config(), Duration::from_millis(10), Behavior::Succeed);

    let first = queue.submit(1, "user_alice").unwrap();
    let err = queue.submit(2, "user_alice").unwrap_err();

    assert_eq!(err, QueueError::DuplicateSubmission { existing: first });
    assert_eq!(queue.snapshot().depth(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_admit_one_job_per_key() {
    let (queue, probe) = queue(base_config(), Duration::from_millis(5), Behavior::Succeed);

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.submit(n, "user_alice") })
        })
        .collect();

    let mut accepted: Vec<JobId> = Vec::new();
    let mut rejected = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(id) => accepted.push(id),
            Err(QueueError::DuplicateSubmission { existing }) => rejected.push(existing),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(accepted.len(), 1);
    assert_eq!(rejected.len(), 31);
    assert!(rejected.iter().all(|id| *id == accepted[0]));

    queue.wait_idle().await;
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_resubmission_after_cooldown_creates_independent_job() {
    let config = base_config().with_dedup(Duration::from_secs(5), ReleasePolicy::Cooldown);
    let (queue, probe) = queue(config, Duration::from_millis(10), Behavior::Succeed);

    let first = queue.submit(1, "user_alice").unwrap();
    queue.wait_idle().await;
    assert_eq!(queue.get(first).unwrap().state, JobState::Completed);

    // Completion alone does not release a cooldown reservation.
    assert!(matches!(
        queue.submit(2, "user_alice"),
        Err(QueueError::DuplicateSubmission { existing }) if existing == first
    ));

    tokio::time::advance(Duration::from_secs(5)).await;

    let second = queue.submit(2, "user_alice").unwrap();
    assert_ne!(first, second);
    queue.wait_idle().await;

    let first_job = queue.get(first).unwrap();
    let second_job = queue.get(second).unwrap();
    assert_eq!(first_job.result, Some(10));
    assert_eq!(second_job.result, Some(20));
    assert_eq!(second_job.attempts, 1);
    assert_eq!(probe.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_on_terminal_release_allows_immediate_resubmission() {
    let config = base_config().with_dedup(Duration::from_secs(60), ReleasePolicy::OnTerminal);
    let (queue, _probe) = queue(config, Duration::from_millis(10), Behavior::Succeed);

    let first = queue.submit(1, "user_alice").unwrap();
    assert!(queue.submit(2, "user_alice").is_err());

    queue.wait_idle().await;
    let second = queue.submit(2, "user_alice").unwrap();
    assert_ne!(first, second);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_and_terminal_waits_for_both() {
    let config = base_config()
        .with_dedup(Duration::from_secs(1), ReleasePolicy::CooldownAndTerminal);
    let (queue, _probe) = queue(config, Duration::from_secs(10), Behavior::Succeed);

    let first = queue.submit(1, "user_alice").unwrap();

    // Cooldown elapsed, job still processing.
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(queue.snapshot().processing, 1);
    assert!(matches!(
        queue.submit(2, "user_alice"),
        Err(QueueError::DuplicateSubmission { existing }) if existing == first
    ));

    queue.wait_idle().await;
    assert!(queue.submit(2, "user_alice").is_ok());
}

// ============================================================================
// Backpressure & Cancellation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_queue_full_at_max_pending() {
    let config = base_config().with_max_concurrency(1).with_max_pending(10);
    let (queue, _probe) = queue(config, Duration::from_secs(60), Behavior::Succeed);

    let ids: Vec<JobId> = (0..10).map(|n| queue.submit(n, key(n)).unwrap()).collect();

    assert_eq!(
        queue.submit(10, key(10)).unwrap_err(),
        QueueError::QueueFull { limit: 10 }
    );

    // The rejected key was not reserved.
    queue.cancel(ids[9]).unwrap();
    assert!(queue.submit(10, key(10)).is_ok());
    assert_eq!(
        queue.submit(11, key(11)).unwrap_err(),
        QueueError::QueueFull { limit: 10 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_job() {
    let config = base_config().with_max_concurrency(1);
    let (queue, probe) = queue(config, Duration::from_millis(100), Behavior::Succeed);

    let running = queue.submit(1, "user_one").unwrap();
    let waiting = queue.submit(2, "user_two").unwrap();

    assert_eq!(
        queue.cancel(running).unwrap_err(),
        QueueError::NotCancellable {
            id: running,
            state: JobState::Processing
        }
    );
    queue.cancel(waiting).unwrap();

    let job = queue.get(waiting).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert!(job.is_cancelled());
    assert!(job.payload.is_none());
    assert_eq!(job.error.unwrap().kind, JobErrorKind::Cancelled);

    // Key released on cancel.
    assert!(queue.submit(3, "user_two").is_ok());

    queue.wait_idle().await;
    assert_eq!(probe.order(), vec![1, 3]);

    let unknown = JobId::new();
    assert_eq!(queue.cancel(unknown).unwrap_err(), QueueError::NotFound(unknown));
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_retry_bound_is_exact() {
    let config = base_config().with_retry(
        RetryPolicy::with_attempts(3).with_backoff(BackoffStrategy::fixed(Duration::from_millis(50))),
    );
    let (queue, probe) = queue(config, Duration::from_millis(10), Behavior::AlwaysFail);

    let id = queue.submit(1, "user_alice").unwrap();
    queue.wait_idle().await;

    let job = queue.get(id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(probe.calls(), 3);
    assert_eq!(job.error.unwrap().message, "always fails");

    let stats = queue.snapshot();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_processed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_is_not_retried() {
    struct Fatal;

    #[async_trait]
    impl JobHandler<u32, u32> for Fatal {
        async fn handle(&self, _ctx: &JobContext, _payload: &u32) -> Result<u32, JobError> {
            Err(JobError::fatal("username taken"))
        }
    }

    let queue = JobQueue::new(base_config(), Fatal).unwrap();
    let id = queue.submit(1, "user_alice").unwrap();
    queue.wait_idle().await;

    let job = queue.get(id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_snapshot_after_completion() {
    let (queue, _probe) = queue(base_config(), Duration::from_millis(10), Behavior::Succeed);

    queue.submit(1, "user_alice").unwrap();
    queue.wait_idle().await;

    let stats = queue.snapshot();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_consistency_across_cancel_and_clear() {
    let config = base_config()
        .with_max_concurrency(1)
        .with_clear_enabled(true);
    let (queue, _probe) = queue(config, Duration::from_secs(1), Behavior::Succeed);

    let ids: Vec<JobId> = (0..6).map(|n| queue.submit(n, key(n)).unwrap()).collect();
    queue.cancel(ids[4]).unwrap();
    queue.cancel(ids[5]).unwrap();

    let stats = queue.snapshot();
    assert_eq!(stats.processing, 1);
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.cancelled, 2);
    assert_eq!(stats.pending + stats.processing + stats.completed + stats.failed, 6 - 2);

    queue.wait_idle().await;
    let stats = queue.snapshot();
    assert_eq!(stats.completed, 4);
    assert_eq!(stats.total_processed, 4);
    assert_eq!(stats.cancelled, 2);

    let report = queue.clear().unwrap();
    assert_eq!(report.completed, 4);
    assert_eq!(report.cancelled, 2);
    assert_eq!(report.jobs_removed(), 6);

    let stats = queue.snapshot();
    assert_eq!(stats.depth(), 0);
    assert_eq!(stats.completed + stats.failed + stats.cancelled, 0);
    assert_eq!(stats.total_processed, 4);

    // Cleared keys can be submitted again.
    assert!(queue.submit(0, key(0)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_clear_keeps_processing_jobs() {
    let config = base_config()
        .with_max_concurrency(1)
        .with_clear_enabled(true);
    let (queue, _probe) = queue(config, Duration::from_secs(1), Behavior::Succeed);

    let running = queue.submit(1, "user_one").unwrap();
    queue.submit(2, "user_two").unwrap();

    let report = queue.clear().unwrap();
    assert_eq!(report.pending, 1);
    assert_eq!(report.dedup_entries, 1);

    assert!(queue.submit(3, "user_two").is_ok());
    assert!(matches!(
        queue.submit(4, "user_one"),
        Err(QueueError::DuplicateSubmission { existing }) if existing == running
    ));

    queue.wait_idle().await;
    assert_eq!(queue.get(running).unwrap().state, JobState::Completed);
}

#[tokio::test]
async fn test_clear_disabled_by_default() {
    let (queue, _probe) = queue(base_config(), Duration::ZERO, Behavior::Succeed);
    assert_eq!(queue.clear().unwrap_err(), QueueError::ClearDisabled);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_rejects_submissions_and_drains() {
    let config = base_config().with_max_concurrency(1);
    let (queue, probe) = queue(config, Duration::from_secs(1), Behavior::Succeed);

    let running = queue.submit(1, "user_one").unwrap();
    let waiting = queue.submit(2, "user_two").unwrap();

    queue.shutdown();
    assert!(queue.is_shutting_down());
    assert_eq!(queue.submit(3, "user_three").unwrap_err(), QueueError::ShuttingDown);

    assert!(queue.drain(Duration::from_secs(5)).await);
    assert_eq!(queue.get(running).unwrap().state, JobState::Completed);
    // Nothing is admitted after shutdown.
    assert_eq!(queue.get(waiting).unwrap().state, JobState::Pending);
    assert_eq!(probe.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_times_out_with_running_job() {
    let (queue, _probe) = queue(base_config(), Duration::from_secs(60), Behavior::Succeed);

    queue.submit(1, "user_one").unwrap();
    queue.shutdown();
    assert!(!queue.drain(Duration::from_secs(1)).await);
}
