//! Telemetry: structured logging and Prometheus metrics.
//!
//! - **Logging**: Structured JSON/pretty/compact logging via `tracing`
//! - **Metrics**: Prometheus metrics for HTTP requests, queue activity and errors
//!
//! # Example
//!
//! ```rust,no_run
//! use portal_core::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let handle = init_telemetry(&TelemetryConfig::default()).expect("Failed to initialize telemetry");
//! println!("{}", handle.metrics.render());
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use metrics::{
    init_metrics, MetricsConfig, MetricsRegistry, QueueMetrics, RegistrationMetrics,
    RequestDurationHistogram,
};

/// Unified telemetry configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for identification in logs and metrics
    pub service_name: String,
    /// Environment (development, staging, production)
    pub environment: String,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: "development".to_string(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "portal-core".to_string()
}

/// Initialize logging and metrics.
///
/// Call once at application startup.
///
/// # Errors
///
/// Returns an error if any component fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<TelemetryHandle> {
    // Logging first so metrics initialization is visible
    init_logging(&config.logging, &config.environment)?;
    let metrics = init_metrics(&config.metrics, &config.service_name)?;

    Ok(TelemetryHandle { metrics })
}

/// Handle for the initialized telemetry stack.
#[derive(Debug)]
pub struct TelemetryHandle {
    /// Registry used by the `/metrics` endpoint
    pub metrics: MetricsRegistry,
}

impl TelemetryHandle {
    pub fn shutdown(self) {
        ::tracing::info!("Telemetry shutdown complete");
    }
}
