//! Per-tenant per-minute rate limiter over tumbling minute windows.
//!
//! Admission consumes one token via an atomic upsert on the counter row for
//! the current wall-clock minute; `exceeded` compares the post-increment
//! count against the project limit. A consumed token is never refunded, even
//! when the request later short-circuits as an idempotent duplicate. Burst
//! protection, not fairness accounting.

use anyhow::Result;
use chrono::Utc;

use crate::db::DbPool;
use crate::models::{minute_window, Project};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Exceeded { current: i64, limit: i64 },
}

/// Consume one token for this minute and decide. An unlimited project is
/// admitted with no side effect.
pub async fn acquire(pool: &DbPool, project: &Project) -> Result<RateDecision> {
    let Some(limit) = project.rate_limit_per_minute else {
        return Ok(RateDecision::Allowed);
    };
    let limit = limit as i64;

    let window = minute_window(Utc::now());
    let count = store::increment_rate_bucket(pool, project.id, window).await? as i64;

    if count > limit {
        Ok(RateDecision::Exceeded { current: count, limit })
    } else {
        Ok(RateDecision::Allowed)
    }
}
