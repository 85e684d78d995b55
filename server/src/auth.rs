//! Bearer API-key authentication.
//!
//! Keys are stored as SHA-256 hex digests; the raw key never touches the
//! database. The authenticated tenant travels as an explicit
//! [`AuthenticatedContext`] value extracted per request, not as mutated
//! request state. Admin endpoints use separate static read/write tokens.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::ProjectStatus;
use crate::store;

/// SHA-256 hex digest of a raw API key, the stored representation.
pub fn hash_api_key(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

fn bearer_token(parts: &Parts) -> Result<&str, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// The authenticated tenant for one request.
#[derive(Debug, Clone)]
pub struct AuthenticatedContext {
    pub project_id: Uuid,
    pub api_key_id: Uuid,
}

impl<S> FromRequestParts<S> for AuthenticatedContext
where
    DbPool: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let pool = DbPool::from_ref(state);
        let token = bearer_token(parts)?;
        let key_hash = hash_api_key(token);

        let record = store::find_active_api_key(&pool, &key_hash)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        if record.project_status != ProjectStatus::Active {
            return Err(ApiError::ProjectSuspended);
        }

        // Bookkeeping only; never fails the request.
        let key_id = record.id;
        tokio::spawn(async move {
            if let Err(e) = store::touch_api_key(&pool, key_id).await {
                debug!(error = %e, "failed to touch api key");
            }
        });

        Ok(AuthenticatedContext {
            project_id: record.project_id,
            api_key_id: record.id,
        })
    }
}

/// Admin token scope for the control-plane endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminScope {
    Read,
    Write,
}

/// Check the static admin bearer token for the requested scope. The read
/// token only grants reads; the write token grants both. Unconfigured tokens
/// reject everything.
pub fn require_admin(parts: &Parts, config: &Config, scope: AdminScope) -> Result<(), ApiError> {
    let token = bearer_token(parts)?;

    let read_ok = config
        .admin_api_key_read
        .as_deref()
        .is_some_and(|expected| expected == token);
    let write_ok = config
        .admin_api_key_write
        .as_deref()
        .is_some_and(|expected| expected == token);

    let granted = match scope {
        AdminScope::Read => read_ok || write_ok,
        AdminScope::Write => write_ok,
    };

    if granted {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}
