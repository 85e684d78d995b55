//! Router assembly and shared application state.

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

use crate::audit::AuditHandle;
use crate::config::Config;
use crate::{handlers, health, metrics};

/// Request bodies are capped well below anything a legitimate send needs.
const MAX_BODY_BYTES: usize = 100 * 1024;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: PgPool,
    pub config: Arc<Config>,
    pub audit: AuditHandle,
}

/// Build the full application router. The metrics route only exists when a
/// recorder handle is supplied.
pub fn build_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let metrics_router = match metrics_handle {
        Some(handle) => Router::new()
            .route("/metrics", get(metrics::metrics_handler))
            .with_state(handle),
        None => Router::new(),
    };

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route(
            "/v1/messages",
            post(handlers::send_message).get(handlers::list_messages),
        )
        .route("/v1/messages/{id}", get(handlers::get_message))
        .route("/v1/usage", get(handlers::get_usage))
        .route("/admin/projects", post(handlers::create_project_admin))
        .route("/admin/projects/{id}", get(handlers::get_project_admin))
        .route(
            "/admin/projects/{id}/status",
            patch(handlers::update_project_status),
        )
        .route(
            "/admin/projects/{id}/keys",
            post(handlers::create_api_key_admin),
        )
        .merge(metrics_router)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

/// Last-resort recovery: a panicking handler becomes a plain
/// `internal_error`. The panic value is logged, never serialized.
fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(panic = %detail, "request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": "internal_error",
            "message": "Internal server error",
        })),
    )
        .into_response()
}
