use std::{future::IntoFuture, net::SocketAddr, sync::Arc};
use tokio::time::{timeout, Duration};
use tracing::{info, warn};

use courier_server::{
    app::{build_router, AppState},
    audit,
    config::Config,
    db, metrics,
    worker::shutdown_signal,
};

/// In-flight requests get this long to finish once a shutdown signal lands.
const API_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    courier_server::init_tracing();

    info!("Starting Courier API");

    let config = Arc::new(Config::from_env());
    info!(
        api_port = config.api_port,
        admin_read_configured = config.admin_api_key_read.is_some(),
        admin_write_configured = config.admin_api_key_write.is_some(),
        "Configuration loaded"
    );

    let metrics_handle = if config.enable_metrics {
        let recorder = metrics::MetricsRecorder::new();
        Some(recorder.handle().clone())
    } else {
        None
    };

    let db_pool = db::init_db_default().await?;
    info!("Database initialized");

    let (audit_handle, audit_task) = audit::spawn_writer(db_pool.clone());
    info!("Audit writer started");

    let app = build_router(
        AppState {
            db_pool,
            config: config.clone(),
            audit: audit_handle,
        },
        metrics_handle,
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    // Bounded graceful drain: stop accepting on signal, then give in-flight
    // requests up to API_DRAIN_TIMEOUT before exiting anyway.
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = Box::pin(
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                drain_rx.await.ok();
            })
            .into_future(),
    );

    tokio::select! {
        result = &mut server => result?,
        _ = shutdown_signal() => {
            info!("shutdown signal received, draining connections");
            let _ = drain_tx.send(());
            match timeout(API_DRAIN_TIMEOUT, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!("drain timeout, exiting with connections open"),
            }
        }
    }

    // Dropping the server releases the router's audit handle; the channel
    // closes and the writer flushes what remains before exiting.
    drop(server);
    if timeout(Duration::from_secs(5), audit_task).await.is_err() {
        warn!("audit writer did not flush in time");
    }

    info!("Courier API stopped");
    Ok(())
}
