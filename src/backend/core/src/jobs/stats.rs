//! Queue statistics and operator recommendations.

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of queue state.
///
/// Every job the queue remembers is counted in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting for a worker slot or a retry delay
    pub pending: usize,
    /// Currently running
    pub processing: usize,
    /// Finished successfully and still retained
    pub completed: usize,
    /// Finished unsuccessfully and still retained
    pub failed: usize,
    /// Cancelled before admission and still retained
    pub cancelled: usize,
    /// Lifetime count of executed jobs that reached a terminal state
    pub total_processed: u64,
}

impl QueueStats {
    /// Jobs that have not reached a terminal state.
    pub fn depth(&self) -> usize {
        self.pending + self.processing
    }

    /// Fraction of retained executed jobs that failed.
    pub fn failure_ratio(&self) -> f64 {
        let settled = self.completed + self.failed;
        if settled == 0 {
            0.0
        } else {
            self.failed as f64 / settled as f64
        }
    }
}

/// The configured limits the snapshot is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueLimits {
    pub max_concurrency: usize,
    pub max_pending: usize,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// An operator hint derived from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    pub severity: Severity,
    pub code: &'static str,
    pub message: String,
}

impl Recommendation {
    fn new(severity: Severity, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
        }
    }
}

const DEPTH_WARNING_RATIO: f64 = 0.5;
const DEPTH_CRITICAL_RATIO: f64 = 0.9;
const FAILURE_RATIO_THRESHOLD: f64 = 0.25;
const FAILURE_MIN_SAMPLE: u64 = 10;

/// Produce operator hints for a snapshot.
///
/// Pure function of its inputs. Always returns at least one entry.
pub fn recommendations(stats: &QueueStats, limits: &QueueLimits) -> Vec<Recommendation> {
    let mut hints = Vec::new();

    if limits.max_pending > 0 {
        let ratio = stats.depth() as f64 / limits.max_pending as f64;
        if ratio >= DEPTH_CRITICAL_RATIO {
            hints.push(Recommendation::new(
                Severity::Critical,
                "QUEUE_NEARLY_FULL",
                format!(
                    "{} of {} slots in use; new submissions will soon be rejected",
                    stats.depth(),
                    limits.max_pending
                ),
            ));
        } else if ratio >= DEPTH_WARNING_RATIO {
            hints.push(Recommendation::new(
                Severity::Warning,
                "QUEUE_DEPTH_HIGH",
                format!(
                    "queue depth {} is over half of max_pending {}",
                    stats.depth(),
                    limits.max_pending
                ),
            ));
        }
    }

    if stats.processing >= limits.max_concurrency && stats.pending > 0 {
        hints.push(Recommendation::new(
            Severity::Warning,
            "AT_CONCURRENCY_CEILING",
            format!(
                "all {} workers busy with {} jobs waiting; consider raising max_concurrency",
                limits.max_concurrency, stats.pending
            ),
        ));
    }

    if stats.total_processed >= FAILURE_MIN_SAMPLE && stats.failure_ratio() > FAILURE_RATIO_THRESHOLD {
        hints.push(Recommendation::new(
            Severity::Warning,
            "HIGH_FAILURE_RATIO",
            format!(
                "{:.0}% of retained jobs failed after {} attempts",
                stats.failure_ratio() * 100.0,
                limits.max_attempts
            ),
        ));
    }

    if hints.is_empty() {
        hints.push(Recommendation::new(Severity::Info, "HEALTHY", "queue is operating normally"));
    }

    hints.sort_by(|a, b| b.severity.cmp(&a.severity));
    hints
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: QueueLimits = QueueLimits {
        max_concurrency: 5,
        max_pending: 100,
        max_attempts: 3,
    };

    fn codes(hints: &[Recommendation]) -> Vec<&'static str> {
        hints.iter().map(|h| h.code).collect()
    }

    #[test]
    fn test_healthy_queue() {
        let hints = recommendations(&QueueStats::default(), &LIMITS);
        assert_eq!(codes(&hints), vec!["HEALTHY"]);
        assert_eq!(hints[0].severity, Severity::Info);
    }

    #[test]
    fn test_depth_thresholds() {
        let warn = QueueStats {
            pending: 48,
            processing: 2,
            ..Default::default()
        };
        assert!(codes(&recommendations(&warn, &LIMITS)).contains(&"QUEUE_DEPTH_HIGH"));

        let critical = QueueStats {
            pending: 88,
            processing: 2,
            ..Default::default()
        };
        let hints = recommendations(&critical, &LIMITS);
        assert_eq!(hints[0].code, "QUEUE_NEARLY_FULL");
        assert_eq!(hints[0].severity, Severity::Critical);
    }

    #[test]
    fn test_concurrency_ceiling() {
        let stats = QueueStats {
            pending: 3,
            processing: 5,
            ..Default::default()
        };
        assert!(codes(&recommendations(&stats, &LIMITS)).contains(&"AT_CONCURRENCY_CEILING"));

        let idle_ceiling = QueueStats {
            processing: 5,
            ..Default::default()
        };
        assert_eq!(codes(&recommendations(&idle_ceiling, &LIMITS)), vec!["HEALTHY"]);
    }

    #[test]
    fn test_failure_ratio_needs_sample() {
        let small = QueueStats {
            completed: 1,
            failed: 3,
            total_processed: 4,
            ..Default::default()
        };
        assert_eq!(codes(&recommendations(&small, &LIMITS)), vec!["HEALTHY"]);

        let large = QueueStats {
            completed: 6,
            failed: 4,
            total_processed: 10,
            ..Default::default()
        };
        assert!(codes(&recommendations(&large, &LIMITS)).contains(&"HIGH_FAILURE_RATIO"));
        assert!((large.failure_ratio() - 0.4).abs() < f64::EPSILON);
    }
}
