//! Prometheus metrics for composition requests.
//!
//! Metrics recorded by the engine and the per-request event bus:
//! - Requests by outcome and their duration
//! - Request handlers invoked and failed
//! - Error handlers notified
//! - Events raised and event subscriber failures
//!
//! Recording goes through the `metrics` facade, so nothing is collected until
//! a recorder is installed. [`MetricsExporter`] installs a Prometheus one.
//!
//! # Example
//!
//! ```rust,no_run
//! use view_composer_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // Serve this from the application's /metrics endpoint
//! let _body = exporter.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Requests by outcome (`composed`, `not_found`, `failed`, `setup_failed`, `cancelled`, `timed_out`)
pub const REQUESTS_TOTAL: &str = "composition_requests_total";
/// End-to-end request duration
pub const REQUEST_DURATION_SECONDS: &str = "composition_request_duration_seconds";
/// Request handlers started
pub const HANDLERS_INVOKED_TOTAL: &str = "composition_handlers_invoked_total";
/// Request handlers that returned an error or panicked
pub const HANDLER_FAILURES_TOTAL: &str = "composition_handler_failures_total";
/// Error handler notifications
pub const ERROR_HANDLERS_INVOKED_TOTAL: &str = "composition_error_handlers_invoked_total";
/// Events raised with at least one subscriber
pub const EVENTS_RAISED_TOTAL: &str = "composition_events_raised_total";
/// Event subscribers that returned an error
pub const EVENT_SUBSCRIBER_FAILURES_TOTAL: &str = "composition_event_subscriber_failures_total";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build the exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install the exporter as global recorder
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter for composition metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that is not installed yet
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe every metric and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (common in tests) is not an error;
    /// [`render`](Self::render) then returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Composition metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                if message.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping");
                    Ok(())
                } else {
                    Err(MetricsError::Install(message))
                }
            }
        }
    }

    /// Handle of the installed recorder
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Describe every composition metric to the installed recorder.
pub fn register_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total composition requests by outcome");
    describe_histogram!(
        REQUEST_DURATION_SECONDS,
        "Time taken to compose a request, including error handlers"
    );
    describe_counter!(HANDLERS_INVOKED_TOTAL, "Total request handlers started");
    describe_counter!(
        HANDLER_FAILURES_TOTAL,
        "Total request handlers that failed or panicked"
    );
    describe_counter!(
        ERROR_HANDLERS_INVOKED_TOTAL,
        "Total error handler notifications"
    );
    describe_counter!(
        EVENTS_RAISED_TOTAL,
        "Total events raised to at least one subscriber"
    );
    describe_counter!(
        EVENT_SUBSCRIBER_FAILURES_TOTAL,
        "Total event subscribers that returned an error"
    );
}

/// Engine metrics recorder.
pub struct CompositionMetrics;

impl CompositionMetrics {
    /// Record a finished request.
    pub fn record_request(outcome: &'static str, duration: Duration) {
        counter!(REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    /// Record request handlers started for one request.
    pub fn record_handlers_invoked(count: usize) {
        counter!(HANDLERS_INVOKED_TOTAL).increment(count as u64);
    }

    /// Record request handler failures for one request.
    pub fn record_handler_failures(count: usize) {
        counter!(HANDLER_FAILURES_TOTAL).increment(count as u64);
    }

    /// Record one error handler notification.
    pub fn record_error_handler_invoked() {
        counter!(ERROR_HANDLERS_INVOKED_TOTAL).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exporter_starts_uninstalled() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn install_tolerates_existing_recorder() {
        let mut first = MetricsExporter::new();
        assert!(first.install().is_ok());

        let mut second = MetricsExporter::new();
        assert!(second.install().is_ok());
        assert!(second.render().is_none());
    }

    #[test]
    fn recording_without_recorder_is_harmless() {
        CompositionMetrics::record_request("composed", Duration::from_millis(3));
        CompositionMetrics::record_handlers_invoked(2);
        CompositionMetrics::record_handler_failures(1);
        CompositionMetrics::record_error_handler_invoked();
    }
}
