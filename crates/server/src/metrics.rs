//! Prometheus metrics for the cometgate proxy.
//!
//! All metrics carry the `cometgate_` prefix and follow Prometheus naming
//! conventions: counters end with `_total`, durations use an `_ms` suffix.

use std::sync::Arc;

use axum::{extract::State, http::header::CONTENT_TYPE, response::IntoResponse};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Prometheus recorder handle for the metrics listener.
#[derive(Debug, Clone)]
pub struct GateMetrics {
    handle: PrometheusHandle,
}

impl GateMetrics {
    /// Install the Prometheus recorder as the global metrics recorder.
    ///
    /// # Errors
    ///
    /// Returns an error if a recorder has already been installed.
    pub fn new() -> eyre::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        Ok(Self { handle })
    }

    /// Render all collected metrics in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Axum handler serving the Prometheus scrape output.
pub async fn metrics_handler(State(metrics): State<Arc<GateMetrics>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], metrics.render())
}

/// Record a proxied request outcome.
///
/// Increments `cometgate_requests_total` with chain, pool, and status labels.
pub fn record_request(chain: &str, is_archive: bool, status: &str) {
    counter!(
        "cometgate_requests_total",
        "chain" => chain.to_string(),
        "pool" => if is_archive { "archive" } else { "regular" },
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record the end-to-end duration of a proxied request.
pub fn record_request_duration(chain: &str, duration_ms: f64) {
    histogram!("cometgate_request_duration_ms", "chain" => chain.to_string())
        .record(duration_ms);
}

/// Record which upstream served a request.
pub fn record_upstream_pick(chain: &str, upstream: &str) {
    counter!(
        "cometgate_upstream_requests_total",
        "chain" => chain.to_string(),
        "upstream" => upstream.to_string()
    )
    .increment(1);
}
