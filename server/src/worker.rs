//! Worker process lifecycle: startup validation, the polling loop, the
//! heartbeat, and signal-driven graceful drain.

use anyhow::Result;
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::DbPool;
use crate::dispatch::Dispatcher;
use crate::jobs;
use crate::providers::ProviderBroker;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves on SIGTERM or SIGINT. Shared by the API and worker binaries.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Run the worker until a shutdown signal arrives.
///
/// A single polling loop per process; horizontal scale comes from running
/// more processes, which coordinate only through the claim query's row
/// locks. On shutdown the loop stops claiming and gives the in-flight batch
/// up to five seconds to commit.
pub async fn run(pool: DbPool, config: Config) -> Result<()> {
    config.validate();

    let broker = Arc::new(ProviderBroker::with_default_providers());
    let dispatcher = Dispatcher::new(pool.clone(), broker, config.batch_size);
    let counters = dispatcher.counters();

    tokio::spawn(jobs::run_janitor(pool.clone()));
    info!("Janitor started");

    let started = Instant::now();
    let mut poll = interval(config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut shutdown = pin!(shutdown_signal());

    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        "Worker started"
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let mut batch = pin!(dispatcher.run_once());
                tokio::select! {
                    result = &mut batch => {
                        if let Err(e) = result {
                            error!(error = %e, "dispatch poll failed");
                        }
                    }
                    _ = &mut shutdown => {
                        info!("shutdown signal received, draining in-flight batch");
                        match timeout(DRAIN_TIMEOUT, &mut batch).await {
                            Ok(Ok(_)) => info!("in-flight batch committed"),
                            Ok(Err(e)) => error!(error = %e, "in-flight batch failed during drain"),
                            Err(_) => warn!("drain timeout, abandoning in-flight batch"),
                        }
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                let snapshot = counters.snapshot();
                info!(
                    uptime_secs = started.elapsed().as_secs(),
                    claimed = snapshot.claimed,
                    delivered = snapshot.delivered,
                    retried = snapshot.retried,
                    failed = snapshot.failed,
                    dead = snapshot.dead,
                    skipped = snapshot.skipped,
                    "heartbeat"
                );
            }
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    info!(
        uptime_secs = started.elapsed().as_secs(),
        "Worker stopped"
    );
    Ok(())
}
