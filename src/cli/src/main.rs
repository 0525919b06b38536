//! Portal CLI - Command-line interface for the registration portal.
//!
//! Submits registrations, inspects jobs, and administers the job queue.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config, health, job, queue, register};
use output::OutputFormat;

/// Portal - registration portal CLI
#[derive(Parser)]
#[command(
    name = "portal",
    author = "Aezi <aezi.zhu@icloud.com>",
    version,
    about = "Portal - registration portal and job queue",
    long_about = "CLI tool for submitting registrations, tracking jobs, and operating the registration queue.",
    propagate_version = true
)]
pub struct Cli {
    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    output: OutputFormat,

    /// API server URL
    #[arg(long, global = true, env = "PORTAL_API_URL")]
    api_url: Option<String>,

    /// Bearer token for admin routes
    #[arg(long, global = true, env = "PORTAL_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health(health::HealthArgs),

    /// Submit a registration
    Register(register::RegisterArgs),

    /// Registration job operations
    #[command(subcommand)]
    Job(job::JobCommands),

    /// Queue administration
    #[command(subcommand)]
    Queue(queue::QueueCommands),

    /// Configuration management
    #[command(subcommand)]
    Config(config::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let api_url = cli
        .api_url
        .clone()
        .or_else(|| config::load_value(config::API_URL_KEY))
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let admin_token = cli
        .admin_token
        .clone()
        .or_else(|| config::load_value(config::ADMIN_TOKEN_KEY));

    let client = client::ApiClient::new(&api_url, admin_token)?;
    let format = cli.output;

    let result = match cli.command {
        Commands::Health(args) => health::execute(args, &client, format).await,
        Commands::Register(args) => register::execute(args, &client, format).await,
        Commands::Job(cmd) => job::execute(cmd, &client, format).await,
        Commands::Queue(cmd) => queue::execute(cmd, &client, format).await,
        Commands::Config(cmd) => config::execute(cmd, format).await,
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
