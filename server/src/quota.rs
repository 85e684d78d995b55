//! Monthly quota admission check.
//!
//! Advisory by design: the check is not transactional with the enqueue that
//! follows. Usage only grows on successful delivery, so double-admission
//! inside one usage tick overshoots a soft fairness ceiling, not a bill.

use anyhow::Result;
use chrono::Utc;

use crate::db::DbPool;
use crate::models::{current_period, Project};
use crate::store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Exceeded { current: i64, limit: i64 },
}

/// Compare this period's usage against the project's monthly ceiling.
/// No ceiling configured means unlimited.
pub async fn check(pool: &DbPool, project: &Project) -> Result<QuotaDecision> {
    let Some(limit) = project.monthly_limit else {
        return Ok(QuotaDecision::Allowed);
    };
    let limit = limit as i64;

    let period = current_period(Utc::now());
    let current = store::total_usage_for_period(pool, project.id, &period).await?;

    if current >= limit {
        Ok(QuotaDecision::Exceeded { current, limit })
    } else {
        Ok(QuotaDecision::Allowed)
    }
}
