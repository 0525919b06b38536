//! In-memory job records and the pending index.
//!
//! Pending jobs are indexed by their submission sequence number so that
//! admission always picks the oldest eligible job. A retried job keeps its
//! original sequence and therefore its place ahead of newer arrivals.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

use super::job::{Job, JobContext, JobError, JobId, JobState};

/// Per-state job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    /// Failed through execution (cancelled jobs excluded)
    pub failed: usize,
    pub cancelled: usize,
}

impl StateCounts {
    /// Jobs that have not reached a terminal state.
    pub fn unfinished(&self) -> usize {
        self.pending + self.processing
    }
}

/// Work handed to a worker when a job is admitted.
#[derive(Debug)]
pub struct Admission<P> {
    pub context: JobContext,
    pub payload: P,
}

/// Storage for every job the queue still remembers.
#[derive(Debug)]
pub struct JobStore<P, R> {
    jobs: HashMap<JobId, Job<P, R>>,
    pending: BTreeMap<u64, JobId>,
    processing: usize,
    next_seq: u64,
}

impl<P, R> Default for JobStore<P, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> JobStore<P, R> {
    pub fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            pending: BTreeMap::new(),
            processing: 0,
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of pending jobs, delayed retries included.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn processing(&self) -> usize {
        self.processing
    }

    /// Jobs that have not reached a terminal state.
    pub fn unfinished(&self) -> usize {
        self.pending.len() + self.processing
    }

    /// Create a pending job under a caller-chosen id.
    pub fn insert(
        &mut self,
        id: JobId,
        idempotency_key: String,
        payload: P,
        max_attempts: u32,
        now: Instant,
    ) -> &Job<P, R> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(seq, id);
        self.jobs
            .entry(id)
            .or_insert_with(|| Job::new(id, idempotency_key, payload, max_attempts, seq, now))
    }

    pub fn get(&self, id: JobId) -> Option<&Job<P, R>> {
        self.jobs.get(&id)
    }

    /// Whether the job is terminal or no longer stored.
    pub fn is_settled(&self, id: JobId) -> bool {
        self.jobs.get(&id).map_or(true, Job::is_terminal)
    }

    /// Jobs in `state`, in submission order.
    pub fn list_by_state(&self, state: JobState) -> Vec<&Job<P, R>> {
        if state == JobState::Pending {
            return self
                .pending
                .values()
                .filter_map(|id| self.jobs.get(id))
                .collect();
        }
        let mut jobs: Vec<_> = self.jobs.values().filter(|job| job.state == state).collect();
        jobs.sort_by_key(|job| job.seq);
        jobs
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for job in self.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed if job.is_cancelled() => counts.cancelled += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Oldest pending job whose retry delay (if any) has elapsed.
    pub fn next_ready(&self, now: Instant) -> Option<JobId> {
        self.pending
            .values()
            .copied()
            .find(|id| self.jobs.get(id).is_some_and(|job| job.is_ready(now)))
    }

    /// Move a pending job to processing and take its payload.
    pub fn begin(&mut self, id: JobId) -> Option<Admission<P>> {
        let job = self.jobs.get_mut(&id)?;
        if job.state != JobState::Pending {
            return None;
        }
        self.pending.remove(&job.seq);
        self.processing += 1;
        let payload = job.mark_processing()?;
        Some(Admission {
            context: JobContext::new(id, job.idempotency_key.clone(), job.attempts, job.max_attempts),
            payload,
        })
    }

    pub fn complete(&mut self, id: JobId, result: R, now: Instant) -> Option<&Job<P, R>> {
        let job = self.jobs.get_mut(&id)?;
        if job.state != JobState::Processing {
            return None;
        }
        job.mark_completed(result, now);
        self.processing -= 1;
        Some(job)
    }

    /// Put a processing job back in line, eligible again at `ready_at`.
    pub fn retry(
        &mut self,
        id: JobId,
        error: JobError,
        payload: P,
        ready_at: Instant,
    ) -> Option<&Job<P, R>> {
        let job = self.jobs.get_mut(&id)?;
        if job.state != JobState::Processing {
            return None;
        }
        job.mark_retry(error, payload, ready_at);
        self.pending.insert(job.seq, id);
        self.processing -= 1;
        Some(job)
    }

    pub fn fail(&mut self, id: JobId, error: JobError, now: Instant) -> Option<&Job<P, R>> {
        let job = self.jobs.get_mut(&id)?;
        if job.state != JobState::Processing {
            return None;
        }
        job.mark_failed(error, now);
        self.processing -= 1;
        Some(job)
    }

    /// Cancel a pending job.
    ///
    /// Returns `Err(state)` with the current state when the job is not pending.
    pub fn cancel(&mut self, id: JobId, now: Instant) -> Option<Result<&Job<P, R>, JobState>> {
        let job = self.jobs.get_mut(&id)?;
        if job.state != JobState::Pending {
            return Some(Err(job.state));
        }
        self.pending.remove(&job.seq);
        job.mark_failed(JobError::cancelled(), now);
        Some(Ok(job))
    }

    /// Remove terminal jobs settled at least `retention` ago.
    pub fn evict_settled(&mut self, retention: Duration, now: Instant) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| match job.settled_at {
            Some(settled) if job.is_terminal() => now.saturating_duration_since(settled) < retention,
            _ => true,
        });
        before - self.jobs.len()
    }

    /// Remove every job that is not processing. Returns how many went per state.
    pub fn clear_idle(&mut self) -> StateCounts {
        let removed = {
            let mut counts = StateCounts::default();
            for job in self.jobs.values() {
                match job.state {
                    JobState::Pending => counts.pending += 1,
                    JobState::Completed => counts.completed += 1,
                    JobState::Failed if job.is_cancelled() => counts.cancelled += 1,
                    JobState::Failed => counts.failed += 1,
                    JobState::Processing => {}
                }
            }
            counts
        };
        self.jobs.retain(|_, job| job.state == JobState::Processing);
        self.pending.clear();
        removed
    }
}
