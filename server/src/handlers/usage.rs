//! Customer-facing usage endpoint.

use axum::{extract::State, Json};
use chrono::Utc;
use serde_json::json;

use crate::auth::AuthenticatedContext;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::current_period;
use crate::store;

/// Current-period usage per channel plus the configured limits.
/// GET /v1/usage
pub async fn get_usage(
    State(pool): State<DbPool>,
    ctx: AuthenticatedContext,
) -> Result<Json<serde_json::Value>, ApiError> {
    let project = store::get_project(&pool, ctx.project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    let period = current_period(Utc::now());
    let buckets = store::usage_buckets_for_period(&pool, project.id, &period).await?;
    let total: i64 = buckets.iter().map(|b| b.count as i64).sum();

    Ok(Json(json!({
        "period": period,
        "total": total,
        "by_channel": buckets,
        "monthly_limit": project.monthly_limit,
        "rate_limit_per_minute": project.rate_limit_per_minute,
    })))
}
