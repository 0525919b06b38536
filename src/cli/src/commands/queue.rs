//! Queue administration commands.
//!
//! Both commands hit admin routes; pass `--admin-token` when the server has one configured.

use anyhow::Result;
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum QueueCommands {
    /// Show queue statistics and recommendations
    Stats,

    /// Drop every pending and finished job (not available in production)
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

// ── API types ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize)]
struct QueueStats {
    pending: usize,
    processing: usize,
    completed: usize,
    failed: usize,
    #[serde(default)]
    cancelled: usize,
    total_processed: u64,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueueLimits {
    max_concurrency: usize,
    max_pending: usize,
    max_attempts: u32,
}

#[derive(Debug, Deserialize, Serialize)]
struct Recommendation {
    severity: String,
    code: String,
    message: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct QueueStatsView {
    queue: String,
    stats: QueueStats,
    limits: QueueLimits,
    clear_enabled: bool,
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ClearReport {
    pending: usize,
    completed: usize,
    failed: usize,
    cancelled: usize,
    dedup_entries: usize,
}

#[derive(Tabled, Serialize)]
struct CountRow {
    #[tabled(rename = "Bucket")]
    bucket: &'static str,
    #[tabled(rename = "Jobs")]
    count: String,
}

impl QueueStatsView {
    fn rows(&self) -> Vec<CountRow> {
        let s = &self.stats;
        let row = |bucket, count: String| CountRow { bucket, count };
        vec![
            row(
                "unfinished",
                format!("{} / {}", s.pending + s.processing, self.limits.max_pending),
            ),
            row("pending", s.pending.to_string()),
            row(
                "processing",
                format!("{} / {}", s.processing, self.limits.max_concurrency),
            ),
            row("completed", s.completed.to_string()),
            row("failed", s.failed.to_string()),
            row("cancelled", s.cancelled.to_string()),
            row("total processed", s.total_processed.to_string()),
        ]
    }
}

// ── Execution ───────────────────────────────────────────────────────────────

pub async fn execute(cmd: QueueCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        QueueCommands::Stats => {
            let view: QueueStatsView = client.get("/api/admin/queue-stats").await?;

            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Queue: {}", view.queue));
                    output::print_list(&view.rows(), format);
                    output::print_detail(
                        "Max attempts",
                        &view.limits.max_attempts.to_string(),
                    );
                    output::print_detail(
                        "Clear enabled",
                        if view.clear_enabled { "yes" } else { "no" },
                    );

                    output::print_header("Recommendations");
                    for rec in &view.recommendations {
                        println!(
                            "  [{}] {}: {}",
                            output::severity_label(&rec.severity),
                            rec.code,
                            rec.message
                        );
                    }
                }
                _ => output::print_item(&view, format),
            }
        }

        QueueCommands::Clear { force } => {
            if !force {
                output::print_info(
                    "This will drop all pending and finished jobs. Use --force to confirm.",
                );
                return Ok(());
            }

            let report: ClearReport = client
                .post("/api/admin/queue-clear", &serde_json::json!({}))
                .await?;

            match format {
                OutputFormat::Table => {
                    let removed =
                        report.pending + report.completed + report.failed + report.cancelled;
                    output::print_success(&format!("Removed {} jobs", removed));
                    output::print_detail("Pending", &report.pending.to_string());
                    output::print_detail("Completed", &report.completed.to_string());
                    output::print_detail("Failed", &report.failed.to_string());
                    output::print_detail("Cancelled", &report.cancelled.to_string());
                    output::print_detail(
                        "Released keys",
                        &report.dedup_entries.to_string(),
                    );
                }
                _ => output::print_item(&report, format),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_view_rows() {
        let view: QueueStatsView = serde_json::from_value(serde_json::json!({
            "queue": "registration",
            "stats": {
                "pending": 3, "processing": 2, "completed": 10,
                "failed": 1, "cancelled": 0, "total_processed": 11
            },
            "limits": { "max_concurrency": 2, "max_pending": 1000, "max_attempts": 3 },
            "clear_enabled": true,
            "recommendations": [
                { "severity": "warning", "code": "AT_CONCURRENCY_CEILING", "message": "busy" }
            ]
        }))
        .unwrap();

        let rows = view.rows();
        assert_eq!(rows[0].count, "5 / 1000");
        assert_eq!(rows[1].count, "3");
        assert_eq!(rows[2].count, "2 / 2");
        assert_eq!(rows[6].count, "11");
        assert_eq!(view.recommendations.len(), 1);
    }
}
