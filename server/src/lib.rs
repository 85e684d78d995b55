pub mod app;
pub mod audit;
pub mod auth;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod enqueue;
pub mod error;
pub mod handlers;
pub mod health;
pub mod idempotency;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod providers;
pub mod quota;
pub mod rate_limit;
pub mod retry;
pub mod store;
pub mod usage;
pub mod worker;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize JSON tracing with production-safe defaults: warn in release,
/// debug in development, overridable via RUST_LOG.
pub fn init_tracing() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        #[cfg(debug_assertions)]
        {
            "debug".to_string()
        }

        #[cfg(not(debug_assertions))]
        {
            "warn".to_string()
        }
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
