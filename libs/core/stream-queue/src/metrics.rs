//! Prometheus metrics for queues
//!
//! Counters are recorded through the `metrics` facade; they are no-ops until
//! a recorder is installed with [`init_metrics`].

use crate::event::ErrorOrigin;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. Returns `false`
/// when another recorder was already installed.
pub fn init_metrics() -> bool {
    let result = PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok::<_, BuildError>(handle)
    });

    match result {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Per-queue metrics helper
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    /// Stream name for labeling
    stream_name: String,
}

impl QueueMetrics {
    /// Create new QueueMetrics
    pub fn new(stream_name: impl Into<String>) -> Self {
        Self {
            stream_name: stream_name.into(),
        }
    }

    /// Record an entry appended to the stream
    pub fn message_sent(&self) {
        counter!(
            "stream_queue_messages_sent_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record a delayed send being scheduled
    pub fn message_scheduled(&self) {
        counter!(
            "stream_queue_messages_scheduled_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record delayed sends cancelled by shutdown
    pub fn sends_cancelled(&self, count: usize) {
        counter!(
            "stream_queue_sends_cancelled_total",
            "stream" => self.stream_name.clone()
        )
        .increment(count as u64);
    }

    /// Update the number of delayed sends waiting for their due time
    pub fn pending_sends(&self, count: usize) {
        gauge!(
            "stream_queue_pending_sends",
            "stream" => self.stream_name.clone()
        )
        .set(count as f64);
    }

    /// Record a message delivered to a consumer.
    ///
    /// Consumer names are per process, so they are logged but not used as
    /// labels.
    pub fn message_received(&self) {
        counter!(
            "stream_queue_messages_received_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }

    /// Record an acknowledgment attempt
    pub fn message_acked(&self, success: bool) {
        counter!(
            "stream_queue_acks_total",
            "stream" => self.stream_name.clone(),
            "status" => if success { "success" } else { "failed" }
        )
        .increment(1);
    }

    /// Record an error event
    pub fn error(&self, origin: ErrorOrigin) {
        counter!(
            "stream_queue_errors_total",
            "stream" => self.stream_name.clone(),
            "origin" => origin.as_ref().to_string()
        )
        .increment(1);
    }

    /// Record a failed group read
    pub fn receive_error(&self) {
        counter!(
            "stream_queue_receive_errors_total",
            "stream" => self.stream_name.clone()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_metrics_creation() {
        let metrics = QueueMetrics::new("test:stream");
        assert_eq!(metrics.stream_name, "test:stream");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let metrics = QueueMetrics::new("test:stream");
        metrics.message_sent();
        metrics.message_acked(false);
        metrics.error(ErrorOrigin::Append);
        metrics.pending_sends(3);
    }

    #[test]
    fn test_received_counter_has_one_series_per_stream() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let metrics = QueueMetrics::new("jobs");
            metrics.message_received();
            metrics.message_received();
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"stream_queue_messages_received_total{stream="jobs"} 2"#));
        assert!(!rendered.contains("consumer="));
    }
}
