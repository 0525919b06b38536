//! Job inspection and cancellation commands.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Subcommand;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum JobCommands {
    /// Show the state of a registration job
    Status {
        /// Job ID
        job_id: Uuid,
    },

    /// Cancel a pending job (admin)
    Cancel {
        /// Job ID
        job_id: Uuid,
    },
}

#[derive(Debug, Deserialize, Serialize)]
struct JobError {
    kind: String,
    message: String,
    retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct JobView {
    job_id: Uuid,
    state: String,
    #[serde(default)]
    cancelled: bool,
    attempts: u32,
    max_attempts: u32,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<JobError>,
}

fn print_job(view: &JobView) {
    output::print_header(&format!("Job: {}", view.job_id));

    let state = if view.cancelled {
        format!("{} (cancelled)", output::state_label(&view.state))
    } else {
        output::state_label(&view.state).to_string()
    };
    output::print_detail("State", &state);
    output::print_detail(
        "Attempts",
        &format!("{}/{}", view.attempts, view.max_attempts),
    );
    output::print_detail("Created", &view.created_at.to_rfc3339());
    if let Some(started) = view.started_at {
        output::print_detail("Started", &started.to_rfc3339());
    }
    if let Some(finished) = view.finished_at {
        output::print_detail("Finished", &finished.to_rfc3339());
        let elapsed = finished - view.created_at;
        output::print_detail("Elapsed", &format!("{}ms", elapsed.num_milliseconds()));
    }
    if let Some(result) = &view.result {
        if let Some(account) = result.get("account_id").and_then(|v| v.as_str()) {
            output::print_detail("Account", account);
        }
        if let Some(sent) = result.get("verification_sent").and_then(|v| v.as_bool()) {
            output::print_detail("Verification sent", if sent { "yes" } else { "no" });
        }
    }
    if let Some(error) = &view.error {
        let code = error.code.as_deref().unwrap_or(&error.kind);
        output::print_detail("Error", &format!("{} ({})", error.message, code));
        output::print_detail("Retryable", if error.retryable { "yes" } else { "no" });
    }
}

pub async fn execute(cmd: JobCommands, client: &ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        JobCommands::Status { job_id } => {
            let view: JobView = client.get(&format!("/api/register/{}", job_id)).await?;

            match format {
                OutputFormat::Table => print_job(&view),
                _ => output::print_item(&view, format),
            }
        }

        JobCommands::Cancel { job_id } => {
            let view: JobView = client
                .delete(&format!("/api/admin/jobs/{}", job_id))
                .await?;

            match format {
                OutputFormat::Table => {
                    output::print_success(&format!("Job {} cancelled", job_id));
                }
                _ => output::print_item(&view, format),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_view_parses_server_payload() {
        let body = serde_json::json!({
            "job_id": "1b4e28ba-2fa1-11d2-883f-0016d3cca427",
            "state": "failed",
            "cancelled": false,
            "attempts": 3,
            "max_attempts": 3,
            "created_at": "2024-01-01T00:00:00Z",
            "finished_at": "2024-01-01T00:00:02Z",
            "error": {
                "kind": "handler",
                "message": "mail delivery failed",
                "retryable": true,
                "code": "MailDeliveryFailed"
            }
        });

        let view: JobView = serde_json::from_value(body).unwrap();
        assert_eq!(view.state, "failed");
        assert!(view.started_at.is_none());
        assert_eq!(view.error.unwrap().code.as_deref(), Some("MailDeliveryFailed"));
    }
}
