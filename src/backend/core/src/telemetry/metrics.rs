//! Prometheus metrics for HTTP requests and the job queue.
//!
//! # Example
//!
//! ```rust,no_run
//! use portal_core::telemetry::metrics::{QueueMetrics, RequestDurationHistogram};
//!
//! RequestDurationHistogram::record("POST", "/api/register", 202, 0.004);
//! QueueMetrics::submitted("registration");
//! ```

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Histogram buckets for durations (in seconds)
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets: Vec<f64>,

    /// Global labels to add to all metrics
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            duration_buckets: default_duration_buckets(),
            global_labels: HashMap::new(),
        }
    }
}

// Default value functions
fn default_metrics_enabled() -> bool {
    true
}

fn default_duration_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ]
}

/// Handle for rendering collected metrics.
#[derive(Clone)]
pub struct MetricsRegistry {
    prometheus_handle: Option<PrometheusHandle>,
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry")
            .field("prometheus_handle", &self.prometheus_handle.is_some())
            .finish()
    }
}

impl MetricsRegistry {
    /// A registry that renders nothing.
    pub fn disabled() -> Self {
        Self {
            prometheus_handle: None,
        }
    }

    /// Build a recorder without installing it globally.
    ///
    /// Used where a process-wide recorder may already exist, such as tests.
    pub fn detached(config: &MetricsConfig) -> anyhow::Result<Self> {
        let recorder = builder(config)?.build_recorder();
        Ok(Self {
            prometheus_handle: Some(recorder.handle()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus_handle.is_some()
    }

    /// Render all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.prometheus_handle
            .as_ref()
            .map(|h| h.render())
            .unwrap_or_default()
    }
}

fn builder(config: &MetricsConfig) -> anyhow::Result<PrometheusBuilder> {
    let mut builder = PrometheusBuilder::new();
    for (key, value) in &config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    Ok(builder.set_buckets(&config.duration_buckets)?)
}

/// Initialize the metrics subsystem and install the global recorder.
///
/// # Errors
///
/// Returns an error if the buckets are invalid or a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig, service_name: &str) -> anyhow::Result<MetricsRegistry> {
    if !config.enabled {
        return Ok(MetricsRegistry::disabled());
    }

    let handle = builder(config)?.install_recorder()?;
    register_metric_descriptions();

    tracing::info!(service_name = %service_name, "Metrics initialized");

    Ok(MetricsRegistry {
        prometheus_handle: Some(handle),
    })
}

/// Register all metric descriptions.
fn register_metric_descriptions() {
    // Request metrics
    describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_counter!("http_requests_total", "Total number of HTTP requests");

    // Error metrics
    describe_counter!("portal_errors_total", "Total number of errors by code");

    // Queue metrics
    describe_counter!("portal_jobs_submitted_total", "Jobs accepted by the queue");
    describe_counter!(
        "portal_jobs_rejected_total",
        "Submissions rejected by the queue, by reason"
    );
    describe_counter!("portal_jobs_completed_total", "Jobs that completed successfully");
    describe_counter!("portal_jobs_failed_total", "Jobs that failed after their last attempt");
    describe_counter!("portal_jobs_retried_total", "Failed attempts scheduled for retry");
    describe_counter!("portal_jobs_cancelled_total", "Pending jobs cancelled by an operator");
    describe_gauge!("portal_queue_pending", "Jobs waiting for a worker slot");
    describe_gauge!("portal_queue_processing", "Jobs currently processing");
    describe_histogram!(
        "portal_job_attempt_duration_seconds",
        "Handler attempt duration in seconds"
    );

    // Registration metrics
    describe_counter!("portal_accounts_created_total", "Accounts created");
    describe_counter!("portal_verification_mails_total", "Verification mails sent");
}

/// Request duration histogram for HTTP requests.
pub struct RequestDurationHistogram;

impl RequestDurationHistogram {
    /// Record a request duration.
    pub fn record(method: &str, path: &str, status_code: u16, duration_seconds: f64) {
        histogram!(
            "http_request_duration_seconds",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .record(duration_seconds);

        counter!(
            "http_requests_total",
            "method" => method.to_string(),
            "path" => path.to_string(),
            "status_code" => status_code.to_string(),
        )
        .increment(1);
    }
}

/// Job queue metrics, labelled by queue name.
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn submitted(queue: &str) {
        counter!("portal_jobs_submitted_total", "queue" => queue.to_string()).increment(1);
    }

    /// Record a rejected submission (`duplicate`, `queue_full`, `shutting_down`).
    pub fn rejected(queue: &str, reason: &'static str) {
        counter!(
            "portal_jobs_rejected_total",
            "queue" => queue.to_string(),
            "reason" => reason,
        )
        .increment(1);
    }

    pub fn completed(queue: &str) {
        counter!("portal_jobs_completed_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn failed(queue: &str) {
        counter!("portal_jobs_failed_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn retried(queue: &str) {
        counter!("portal_jobs_retried_total", "queue" => queue.to_string()).increment(1);
    }

    pub fn cancelled(queue: &str) {
        counter!("portal_jobs_cancelled_total", "queue" => queue.to_string()).increment(1);
    }

    /// Publish the current pending and processing counts.
    pub fn set_depth(queue: &str, pending: usize, processing: usize) {
        gauge!("portal_queue_pending", "queue" => queue.to_string()).set(pending as f64);
        gauge!("portal_queue_processing", "queue" => queue.to_string()).set(processing as f64);
    }

    /// Record how long a handler attempt took.
    pub fn record_attempt(queue: &str, outcome: &'static str, duration: Duration) {
        histogram!(
            "portal_job_attempt_duration_seconds",
            "queue" => queue.to_string(),
            "outcome" => outcome,
        )
        .record(duration.as_secs_f64());
    }
}

/// Registration business metrics.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    pub fn account_created() {
        counter!("portal_accounts_created_total").increment(1);
    }

    pub fn verification_mail(success: bool) {
        counter!(
            "portal_verification_mails_total",
            "success" => success.to_string(),
        )
        .increment(1);
    }
}
