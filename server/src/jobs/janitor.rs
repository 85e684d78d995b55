//! Retention janitor.
//!
//! First sweep runs 10 seconds after startup, then hourly. Old events and
//! terminal messages are removed in chunks of 1000 with short pauses between
//! chunks so the sweeps never hold long locks. Stale rate-limit windows are
//! disposable after an hour. Failures are logged and never crash the worker.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::{interval, sleep};
use tracing::{error, info};

use crate::store;

const STARTUP_DELAY: Duration = Duration::from_secs(10);
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
const CHUNK_SIZE: i64 = 1000;
const CHUNK_PAUSE: Duration = Duration::from_millis(100);
const RATE_BUCKET_MAX_AGE_SECS: i64 = 3600;

fn retention_days() -> i64 {
    std::env::var("RETENTION_DAYS")
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|days| *days > 0)
        .unwrap_or(30)
}

/// Background retention worker. Never returns.
pub async fn run_janitor(pool: PgPool) {
    info!("Starting retention janitor (first sweep in 10s, then hourly)");
    sleep(STARTUP_DELAY).await;

    let mut ticker = interval(SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        run_sweep(&pool).await;
    }
}

/// One full retention pass. Public so tests can drive it directly.
pub async fn run_sweep(pool: &PgPool) {
    let days = retention_days();
    let cutoff = Utc::now() - ChronoDuration::days(days);

    match sweep_events(pool, cutoff).await {
        Ok(count) if count > 0 => {
            info!(deleted = count, retention_days = days, "swept old events");
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "event sweep failed");
        }
    }

    match sweep_terminal_messages(pool, cutoff).await {
        Ok(count) if count > 0 => {
            info!(deleted = count, retention_days = days, "swept terminal messages");
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "terminal message sweep failed");
        }
    }

    let rate_cutoff = Utc::now() - ChronoDuration::seconds(RATE_BUCKET_MAX_AGE_SECS);
    match store::delete_stale_rate_buckets(pool, rate_cutoff).await {
        Ok(count) if count > 0 => {
            info!(deleted = count, "pruned stale rate buckets");
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "rate bucket prune failed");
        }
    }
}

async fn sweep_events(
    pool: &PgPool,
    cutoff: chrono::DateTime<Utc>,
) -> anyhow::Result<u64> {
    let mut total = 0u64;
    loop {
        let deleted = store::delete_old_events_chunk(pool, cutoff, CHUNK_SIZE).await?;
        total += deleted;
        if deleted < CHUNK_SIZE as u64 {
            break;
        }
        sleep(CHUNK_PAUSE).await;
    }
    Ok(total)
}

async fn sweep_terminal_messages(
    pool: &PgPool,
    cutoff: chrono::DateTime<Utc>,
) -> anyhow::Result<u64> {
    let mut total = 0u64;
    loop {
        let deleted =
            store::delete_old_terminal_messages_chunk(pool, cutoff, CHUNK_SIZE).await?;
        total += deleted;
        if deleted < CHUNK_SIZE as u64 {
            break;
        }
        sleep(CHUNK_PAUSE).await;
    }
    Ok(total)
}
