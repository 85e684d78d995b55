//! Prometheus metrics recorder and exporter endpoint.

use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!(
            "messages_accepted_total",
            "Messages accepted through the API"
        );
        metrics::describe_counter!(
            "messages_delivered_total",
            "Messages confirmed delivered by a provider"
        );
        metrics::describe_counter!(
            "messages_dead_lettered_total",
            "Messages dead-lettered after exhausting attempts"
        );
        metrics::describe_counter!(
            "admin_events_dropped_total",
            "Audit records dropped because the channel was full"
        );

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for the Prometheus metrics endpoint
pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    let rendered = handle.render();
    (StatusCode::OK, rendered)
}
