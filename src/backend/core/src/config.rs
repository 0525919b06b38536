//! Configuration management.
//!
//! Values come from an optional config file, overridden by environment
//! variables of the form `PORTAL__SECTION__KEY` (for example
//! `PORTAL__QUEUE__MAX_CONCURRENCY=8`). Durations accept humantime strings
//! such as `"5s"` or `"1h"`.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{PortalError, Result};
use crate::jobs::{QueueConfig, ReleasePolicy, RetryPolicy};
use crate::telemetry::{LoggingConfig, MetricsConfig, TelemetryConfig};

const ENV_PREFIX: &str = "PORTAL";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_CONFIG_FILE: &str = "config/portal";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Registration queue configuration
    #[serde(default)]
    pub queue: QueueSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Admin API configuration
    #[serde(default)]
    pub admin: AdminConfig,

    /// Registration configuration
    #[serde(default)]
    pub registration: RegistrationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            queue: QueueSettings::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
            admin: AdminConfig::default(),
            registration: RegistrationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// How long in-flight jobs may run after a shutdown signal
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

/// Queue tuning as exposed to operators.
///
/// `allow_clear` is not configurable; it follows the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default = "default_dedup_cooldown", with = "humantime_serde")]
    pub dedup_cooldown: Duration,

    #[serde(default)]
    pub dedup_release: ReleasePolicy,

    #[serde(default, with = "humantime_serde")]
    pub job_timeout: Option<Duration>,

    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Option<Duration>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_pending: default_max_pending(),
            retry: RetryPolicy::default(),
            dedup_cooldown: default_dedup_cooldown(),
            dedup_release: ReleasePolicy::default(),
            job_timeout: None,
            retention: default_retention(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminConfig {
    /// Bearer token required on admin routes (unset disables the check)
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Base URL for verification links; the token is appended as a query parameter
    #[serde(default = "default_verification_base_url")]
    pub verification_base_url: String,

    /// Sender address for verification mails
    #[serde(default = "default_mail_sender")]
    pub mail_sender: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            verification_base_url: default_verification_base_url(),
            mail_sender: default_mail_sender(),
        }
    }
}

// Default value functions
fn default_environment() -> String { "development".to_string() }
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_grace() -> Duration { Duration::from_secs(10) }
fn default_max_concurrency() -> usize { 5 }
fn default_max_pending() -> usize { 1000 }
fn default_dedup_cooldown() -> Duration { Duration::from_secs(5) }
fn default_retention() -> Duration { Duration::from_secs(3600) }
fn default_sweep_interval() -> Option<Duration> { Some(Duration::from_secs(30)) }
fn default_verification_base_url() -> String { "http://localhost:8080/verify".to_string() }
fn default_mail_sender() -> String { "no-reply@localhost".to_string() }

impl Config {
    /// Load configuration from `config/portal.{toml,yaml,json}` if present,
    /// then the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(PortalError::configuration("server.port must be non-zero"));
        }
        if self.admin.token.as_deref().is_some_and(str::is_empty) {
            return Err(PortalError::configuration("admin.token must not be empty when set"));
        }
        self.queue_config().validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Build the registration queue configuration.
    pub fn queue_config(&self) -> QueueConfig {
        let q = &self.queue;
        QueueConfig {
            name: "registration".to_string(),
            max_concurrency: q.max_concurrency,
            max_pending: q.max_pending,
            retry: q.retry.clone(),
            dedup_cooldown: q.dedup_cooldown,
            dedup_release: q.dedup_release,
            job_timeout: q.job_timeout,
            retention: q.retention,
            sweep_interval: q.sweep_interval,
            allow_clear: !self.is_production(),
        }
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: "portal-server".to_string(),
            environment: self.environment.clone(),
            logging: self.logging.clone(),
            metrics: self.metrics.clone(),
        }
    }
}
