//! Admission and execution of queued jobs.
//!
//! There is no long-lived worker loop. Admission runs whenever something
//! could free or create work: a submission, a settled attempt, or an elapsed
//! retry delay. Each admitted job runs on its own tokio task.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::job::{JobContext, JobError, MAX_BACKOFF_DELAY};
use super::queue::{QueueState, Shared};
use super::store::Admission;
use crate::telemetry::QueueMetrics;

impl<P, R> Shared<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Admit the oldest eligible jobs while worker slots are free.
    pub(crate) fn dispatch(self: &Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let admitted = {
            let now = Instant::now();
            let mut state = self.state.lock();
            let mut admitted = Vec::new();
            while state.store.processing() < self.config.max_concurrency {
                let Some(id) = state.store.next_ready(now) else {
                    break;
                };
                match state.store.begin(id) {
                    Some(admission) => admitted.push(admission),
                    None => break,
                }
            }
            if !admitted.is_empty() {
                self.publish_depth(&state);
            }
            admitted
        };

        for admission in admitted {
            self.spawn_attempt(admission);
        }
    }

    fn spawn_attempt(self: &Arc<Self>, admission: Admission<P>) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let Admission { context, payload } = admission;
            tracing::debug!(
                queue = %shared.config.name,
                job_id = %context.job_id(),
                attempt = context.attempt(),
                state = "processing",
                "Job started"
            );

            let started = Instant::now();
            let outcome = shared.run_handler(&context, &payload).await;
            QueueMetrics::record_attempt(
                &shared.config.name,
                if outcome.is_ok() { "success" } else { "error" },
                started.elapsed(),
            );

            shared.settle(&context, payload, outcome);
            shared.dispatch();
        });
    }

    /// Run one attempt, turning panics and timeouts into job errors.
    async fn run_handler(&self, ctx: &JobContext, payload: &P) -> Result<R, JobError> {
        let attempt = AssertUnwindSafe(self.handler.handle(ctx, payload)).catch_unwind();
        let caught = match self.config.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(caught) => caught,
                Err(_) => return Err(JobError::timeout(limit)),
            },
            None => attempt.await,
        };
        caught.unwrap_or_else(|panic| Err(JobError::panicked(panic_message(panic.as_ref()))))
    }

    /// Record the outcome of an attempt and decide whether the job retries.
    fn settle(self: &Arc<Self>, ctx: &JobContext, payload: P, outcome: Result<R, JobError>) {
        let id = ctx.job_id();
        let queue = self.config.name.as_str();
        let now = Instant::now();
        let mut wake_at = None;

        {
            let mut state = self.state.lock();
            let QueueState {
                store,
                dedup,
                total_processed,
            } = &mut *state;

            match outcome {
                Ok(result) => {
                    if let Some(job) = store.complete(id, result, now) {
                        let duration_ms = job.duration().map_or(0, |d| d.num_milliseconds());
                        *total_processed += 1;
                        dedup.job_settled(ctx.idempotency_key(), id);
                        tracing::info!(
                            queue = %queue,
                            job_id = %id,
                            attempt = ctx.attempt(),
                            duration_ms,
                            state = "completed",
                            "Job completed"
                        );
                        QueueMetrics::completed(queue);
                    }
                }
                Err(error) => {
                    let delay = self
                        .config
                        .retry
                        .next_retry_delay(ctx.attempt())
                        .min(MAX_BACKOFF_DELAY);
                    // An unrepresentable wake time settles the job instead of retrying.
                    let ready_at = (!self.shutdown.is_cancelled()
                        && self.config.retry.should_retry(ctx.attempt(), &error))
                    .then(|| now.checked_add(delay))
                    .flatten();
                    if let Some(ready_at) = ready_at {
                        tracing::warn!(
                            queue = %queue,
                            job_id = %id,
                            attempt = ctx.attempt(),
                            max_attempts = ctx.max_attempts(),
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            state = "pending",
                            "Job attempt failed, retrying"
                        );
                        if store.retry(id, error, payload, ready_at).is_some() {
                            QueueMetrics::retried(queue);
                            if !delay.is_zero() {
                                wake_at = Some(ready_at);
                            }
                        }
                    } else {
                        tracing::error!(
                            queue = %queue,
                            job_id = %id,
                            attempt = ctx.attempt(),
                            retryable = error.retryable,
                            error = %error,
                            state = "failed",
                            "Job failed"
                        );
                        if store.fail(id, error, now).is_some() {
                            *total_processed += 1;
                            dedup.job_settled(ctx.idempotency_key(), id);
                            QueueMetrics::failed(queue);
                        }
                    }
                }
            }
            self.publish_depth(&state);
        }

        self.settled.notify_waiters();
        if let Some(at) = wake_at {
            self.schedule_wakeup(at);
        }
    }

    /// Re-run admission once a retry delay elapses, unless the queue shuts down first.
    fn schedule_wakeup(self: &Arc<Self>, at: Instant) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = shared.shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(at) => shared.dispatch(),
            }
        });
    }

    pub(crate) fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.shutdown.clone();
        let queue = self.config.name.clone();

        tracing::info!(queue = %queue, interval_ms = interval.as_millis() as u64, "Queue sweeper started");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = weak.upgrade() else { break };
                        shared.purge_expired();
                    }
                }
            }
            tracing::info!(queue = %queue, "Queue sweeper stopped");
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::job::{BackoffStrategy, JobHandler, JobState, RetryPolicy};
    use crate::jobs::queue::{JobQueue, QueueConfig, QueueError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobHandler<(), u32> for Flaky {
        async fn handle(&self, ctx: &JobContext, _payload: &()) -> Result<u32, JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(JobError::retryable(format!("failure {}", call)))
            } else {
                Ok(ctx.attempt())
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl JobHandler<(), ()> for Panics {
        async fn handle(&self, _ctx: &JobContext, _payload: &()) -> Result<(), JobError> {
            panic!("boom");
        }
    }

    struct Sleeps;

    #[async_trait]
    impl JobHandler<(), ()> for Sleeps {
        async fn handle(&self, _ctx: &JobContext, _payload: &()) -> Result<(), JobError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "handler panicked: boom");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "handler panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_succeed() {
        let config = QueueConfig::default().with_retry(
            RetryPolicy::with_attempts(3).with_backoff(BackoffStrategy::fixed(Duration::from_secs(1))),
        );
        let queue = JobQueue::new(
            config,
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
        )
        .unwrap();

        let id = queue.submit((), "k").unwrap();
        queue.wait_idle().await;

        let job = queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.result, Some(3));
    }

    #[test]
    fn test_unbounded_backoff_rejected() {
        let config = QueueConfig::default().with_retry(
            RetryPolicy::with_attempts(2).with_backoff(BackoffStrategy::fixed(Duration::MAX)),
        );
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));

        let flaky = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        assert!(JobQueue::new(config, flaky).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_longest_backoff_frees_worker_slot() {
        let config = QueueConfig::default()
            .with_max_concurrency(1)
            .with_sweep_interval(None)
            .with_retry(
                RetryPolicy::with_attempts(2)
                    .with_backoff(BackoffStrategy::fixed(MAX_BACKOFF_DELAY)),
            );
        let queue = JobQueue::new(
            config,
            Flaky {
                failures: 1,
                calls: AtomicU32::new(0),
            },
        )
        .unwrap();

        let first = queue.submit((), "a").unwrap();
        let second = queue.submit((), "b").unwrap();
        while queue.get(second).unwrap().state != JobState::Completed {
            tokio::task::yield_now().await;
        }

        let job = queue.get(first).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(queue.snapshot().processing, 0);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failed_attempt() {
        let config = QueueConfig::default().with_retry(RetryPolicy::no_retry());
        let queue = JobQueue::new(config, Panics).unwrap();

        let id = queue.submit((), "k").unwrap();
        queue.wait_idle().await;

        let job = queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.unwrap().message, "handler panicked: boom");
        assert_eq!(queue.snapshot().total_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let config = QueueConfig::default()
            .with_retry(RetryPolicy::with_attempts(2).with_backoff(BackoffStrategy::None))
            .with_job_timeout(Duration::from_secs(1));
        let queue = JobQueue::new(config, Sleeps).unwrap();

        let id = queue.submit((), "k").unwrap();
        queue.wait_idle().await;

        let job = queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.error.unwrap().kind, crate::jobs::job::JobErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_retry() {
        let config = QueueConfig::default().with_retry(
            RetryPolicy::with_attempts(5).with_backoff(BackoffStrategy::fixed(Duration::from_secs(10))),
        );
        let queue = JobQueue::new(
            config,
            Flaky {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
        )
        .unwrap();

        let id = queue.submit((), "k").unwrap();
        while queue.get(id).unwrap().attempts == 0 || queue.snapshot().processing > 0 {
            tokio::task::yield_now().await;
        }
        queue.shutdown();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let job = queue.get(id).unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_terminal_jobs() {
        let config = QueueConfig::default()
            .with_retention(Duration::from_secs(60))
            .with_sweep_interval(Some(Duration::from_secs(30)));
        let queue = JobQueue::new(
            config,
            Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            },
        )
        .unwrap();
        let sweeper = queue.spawn_sweeper().unwrap();

        let id = queue.submit((), "k").unwrap();
        queue.wait_idle().await;
        assert!(queue.get(id).is_ok());

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(queue.get(id).is_err());

        queue.shutdown();
        sweeper.await.unwrap();
    }
}
