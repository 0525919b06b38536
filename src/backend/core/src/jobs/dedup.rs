//! Idempotency-key index guarding against rapid duplicate submissions.
//!
//! Entries are never removed eagerly on a timer. Expiry is evaluated on every
//! lookup, and [`DedupIndex::purge_expired`] drops dead entries in bulk so the
//! index stays bounded when keys are never reused.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::job::JobId;

/// When a reserved key becomes available again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePolicy {
    /// Time-based: the key frees up `cooldown` after submission, whatever the job is doing.
    #[default]
    Cooldown,
    /// The key frees up as soon as the job reaches a terminal state.
    OnTerminal,
    /// The key stays blocked until the cooldown elapsed and the job is terminal.
    CooldownAndTerminal,
}

/// A reservation held by one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupEntry {
    pub job_id: JobId,
    pub inserted_at: Instant,
}

/// Mapping from idempotency key to the job that reserved it.
#[derive(Debug)]
pub struct DedupIndex {
    entries: HashMap<String, DedupEntry>,
    cooldown: Duration,
    policy: ReleasePolicy,
}

impl DedupIndex {
    pub fn new(cooldown: Duration, policy: ReleasePolicy) -> Self {
        Self {
            entries: HashMap::new(),
            cooldown,
            policy,
        }
    }

    /// Number of entries, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `entry` still blocks its key at `now`.
    ///
    /// `is_settled` reports whether the owning job is terminal (or gone).
    pub fn is_active(
        &self,
        entry: &DedupEntry,
        now: Instant,
        is_settled: impl Fn(JobId) -> bool,
    ) -> bool {
        let cooling = now.saturating_duration_since(entry.inserted_at) < self.cooldown;
        match self.policy {
            ReleasePolicy::Cooldown => cooling,
            ReleasePolicy::OnTerminal => !is_settled(entry.job_id),
            ReleasePolicy::CooldownAndTerminal => cooling || !is_settled(entry.job_id),
        }
    }

    /// Look up the active reservation for `key`, if any.
    pub fn lookup(
        &self,
        key: &str,
        now: Instant,
        is_settled: impl Fn(JobId) -> bool,
    ) -> Option<DedupEntry> {
        self.entries
            .get(key)
            .filter(|entry| self.is_active(entry, now, &is_settled))
            .copied()
    }

    /// Atomically reserve `key` for `job_id`.
    ///
    /// Returns the id of the job holding an active reservation when the key is
    /// taken. An expired reservation is overwritten.
    pub fn check_and_reserve(
        &mut self,
        key: &str,
        job_id: JobId,
        now: Instant,
        is_settled: impl Fn(JobId) -> bool,
    ) -> Result<(), JobId> {
        if let Some(existing) = self.lookup(key, now, is_settled) {
            return Err(existing.job_id);
        }
        self.entries.insert(
            key.to_string(),
            DedupEntry {
                job_id,
                inserted_at: now,
            },
        );
        Ok(())
    }

    /// Remove the reservation for `key` only if `job_id` still owns it.
    ///
    /// A key may have been re-reserved by a newer job after the old one
    /// expired; that newer reservation must survive.
    pub fn release_if_owned(&mut self, key: &str, job_id: JobId) -> bool {
        match self.entries.get(key) {
            Some(entry) if entry.job_id == job_id => {
                self.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Notify the index that `job_id` reached a terminal state.
    pub fn job_settled(&mut self, key: &str, job_id: JobId) -> bool {
        match self.policy {
            ReleasePolicy::OnTerminal => self.release_if_owned(key, job_id),
            ReleasePolicy::Cooldown | ReleasePolicy::CooldownAndTerminal => false,
        }
    }

    /// Drop every entry that no longer blocks its key. Returns the number removed.
    pub fn purge_expired(&mut self, now: Instant, is_settled: impl Fn(JobId) -> bool) -> usize {
        let before = self.entries.len();
        let cooldown = self.cooldown;
        let policy = self.policy;
        self.entries.retain(|_, entry| {
            let cooling = now.saturating_duration_since(entry.inserted_at) < cooldown;
            match policy {
                ReleasePolicy::Cooldown => cooling,
                ReleasePolicy::OnTerminal => !is_settled(entry.job_id),
                ReleasePolicy::CooldownAndTerminal => cooling || !is_settled(entry.job_id),
            }
        });
        before - self.entries.len()
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&str, &DedupEntry) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| keep(key, entry));
        before - self.entries.len()
    }
}
