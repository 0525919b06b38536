//! Health check command.
//!
//! Queries the `/health` endpoint and reports whether the queue accepts jobs.

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct HealthArgs {
    /// Exit with an error when the server is not accepting jobs
    #[arg(long)]
    strict: bool,
}

pub async fn execute(args: HealthArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let health: serde_json::Value = client.get_raw("/health").await?;

    let status = health
        .get("status")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();
    let accepting = health
        .get("accepting_jobs")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    match format {
        OutputFormat::Table => {
            output::print_header("Portal Health");
            output::print_detail("Status", &status);
            output::print_detail("API URL", client.base_url());

            if let Some(version) = health.get("version").and_then(|v| v.as_str()) {
                output::print_detail("Version", version);
            }
            output::print_detail("Accepting jobs", if accepting { "yes" } else { "no" });
            if let Some(ts) = health.get("timestamp").and_then(|v| v.as_str()) {
                output::print_detail("Timestamp", ts);
            }
            println!();

            if status == "healthy" && accepting {
                output::print_success("Portal is accepting registrations");
            } else if status == "healthy" {
                output::print_warning("Portal is up but shutting down");
            } else {
                output::print_error(&format!("Portal status: {}", status));
            }
        }
        _ => output::print_item(&health, format),
    }

    if args.strict && !(status == "healthy" && accepting) {
        anyhow::bail!("server at {} is not accepting jobs", client.base_url());
    }

    Ok(())
}
