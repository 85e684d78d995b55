//! Error taxonomy surfaced at the HTTP boundary.
//!
//! Every response body has the shape `{"error": <kind>, "message": <human>}`
//! plus kind-specific metadata (quota / rate-limit counters). Internal detail
//! is logged and never serialized.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Missing or invalid API key")]
    Unauthorized,

    #[error("Project is suspended")]
    ProjectSuspended,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Monthly quota exceeded")]
    MonthlyQuotaExceeded { limit: i64, current: i64 },

    #[error("Rate limit exceeded")]
    RateLimitExceeded { limit: i64, current: i64 },

    #[error("Internal error")]
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl ApiError {
    /// Machine-readable error kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::ProjectSuspended => "project_suspended",
            ApiError::Forbidden => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::MonthlyQuotaExceeded { .. } => "monthly_quota_exceeded",
            ApiError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::ProjectSuspended | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MonthlyQuotaExceeded { .. } | ApiError::RateLimitExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Stack traces and source chains stay on the server.
        let message = match &self {
            ApiError::Internal(err) => {
                tracing::error!(error = ?err, "internal error");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": self.kind(),
            "message": message,
        });

        match &self {
            ApiError::MonthlyQuotaExceeded { limit, current } => {
                body["quota"] = json!({ "limit": limit, "current": current });
            }
            ApiError::RateLimitExceeded { limit, current } => {
                body["rate_limit"] = json!({
                    "limit": limit,
                    "current": current,
                    "window": "per_minute",
                });
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Internal(anyhow::Error::new(err).context("database error"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ApiError::Unauthorized.kind(), "unauthorized");
        assert_eq!(ApiError::ProjectSuspended.kind(), "project_suspended");
        assert_eq!(
            ApiError::MonthlyQuotaExceeded { limit: 5, current: 5 }.kind(),
            "monthly_quota_exceeded"
        );
        assert_eq!(
            ApiError::RateLimitExceeded { limit: 3, current: 4 }.kind(),
            "rate_limit_exceeded"
        );
    }

    #[test]
    fn statuses_match_kinds() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::ProjectSuspended.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::RateLimitExceeded { limit: 3, current: 4 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
