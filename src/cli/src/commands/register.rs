//! Registration submission command.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::{ApiClient, ApiError};
use crate::output::{self, OutputFormat};

#[derive(Args)]
pub struct RegisterArgs {
    /// Username (4-10 letters or digits)
    #[arg(short, long)]
    username: String,

    /// Email address
    #[arg(short, long)]
    email: String,

    /// Password (6-32 characters)
    #[arg(short, long, env = "PORTAL_PASSWORD", hide_env_values = true)]
    password: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize, Serialize)]
struct SubmitResponse {
    job_id: Uuid,
    status: String,
}

pub async fn execute(args: RegisterArgs, client: &ApiClient, format: OutputFormat) -> Result<()> {
    let body = RegisterRequest {
        username: &args.username,
        email: &args.email,
        password: &args.password,
    };

    let resp: SubmitResponse = match client.post("/api/register", &body).await {
        Ok(resp) => resp,
        Err(err) => {
            if let Some(api) = err.downcast_ref::<ApiError>() {
                if let Some(existing) = api.entity_id() {
                    output::print_info(&format!(
                        "Existing job: run `portal job status {}`",
                        existing
                    ));
                }
                if let Some(secs) = api.retry_after {
                    output::print_info(&format!("Server asked to retry in {}s", secs));
                }
            }
            return Err(err);
        }
    };

    match format {
        OutputFormat::Table => {
            output::print_success(&format!("Registration for '{}' queued", args.username));
            output::print_detail("Job ID", &resp.job_id.to_string());
            output::print_detail("Status", &output::state_label(&resp.status).to_string());
        }
        _ => output::print_item(&resp, format),
    }

    Ok(())
}
