//! Control-plane endpoints, authorized by static read/write bearer tokens.

use axum::{
    extract::{Path, State},
    http::request::Parts,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditHandle, AuditRecord};
use crate::auth::{require_admin, AdminScope};
use crate::config::Config;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::models::{Project, ProjectStatus};
use crate::store;

#[derive(Debug, Deserialize)]
pub struct CreateProjectInput {
    pub name: String,
    pub owner_email: String,
    pub monthly_limit: Option<i32>,
    pub rate_limit_per_minute: Option<i32>,
}

/// Provision a tenant.
/// POST /admin/projects
pub async fn create_project(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(audit): State<AuditHandle>,
    parts: Parts,
    Json(input): Json<CreateProjectInput>,
) -> Result<(axum::http::StatusCode, Json<Project>), ApiError> {
    require_admin(&parts, &config, AdminScope::Write)?;

    if input.name.trim().is_empty() {
        return Err(ApiError::Validation("'name' is required".into()));
    }
    if !input.owner_email.contains('@') {
        return Err(ApiError::Validation(
            "'owner_email' must be an email address".into(),
        ));
    }
    if input.monthly_limit.is_some_and(|limit| limit < 0) {
        return Err(ApiError::Validation("'monthly_limit' must be >= 0".into()));
    }
    if input.rate_limit_per_minute.is_some_and(|limit| limit < 1) {
        return Err(ApiError::Validation(
            "'rate_limit_per_minute' must be >= 1".into(),
        ));
    }

    let project = store::create_project(
        &pool,
        input.name.trim(),
        &input.owner_email,
        input.monthly_limit,
        input.rate_limit_per_minute,
    )
    .await?;

    info!(project_id = %project.id, "project created");
    audit.record(AuditRecord {
        project_id: Some(project.id),
        action: "project.created".to_string(),
        detail: Some(json!({ "name": project.name })),
    });

    Ok((axum::http::StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyInput {
    pub name: String,
}

/// Issue an API key for a project. The raw key is returned exactly once;
/// only its SHA-256 digest is stored.
/// POST /admin/projects/{id}/keys
pub async fn create_api_key(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(audit): State<AuditHandle>,
    Path(project_id): Path<Uuid>,
    parts: Parts,
    Json(input): Json<CreateApiKeyInput>,
) -> Result<(axum::http::StatusCode, Json<serde_json::Value>), ApiError> {
    require_admin(&parts, &config, AdminScope::Write)?;

    if input.name.trim().is_empty() {
        return Err(ApiError::Validation("'name' is required".into()));
    }

    let project = store::get_project(&pool, project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    let raw_key = format!(
        "sk_{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    );
    let key_id = store::create_api_key(
        &pool,
        project.id,
        &crate::auth::hash_api_key(&raw_key),
        input.name.trim(),
    )
    .await?;

    info!(project_id = %project.id, key_id = %key_id, "api key issued");
    audit.record(AuditRecord {
        project_id: Some(project.id),
        action: "api_key.created".to_string(),
        detail: Some(json!({ "key_id": key_id, "name": input.name.trim() })),
    });

    Ok((
        axum::http::StatusCode::CREATED,
        Json(json!({
            "key_id": key_id,
            "api_key": raw_key,
        })),
    ))
}

/// GET /admin/projects/{id}
pub async fn get_project_admin(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    Path(project_id): Path<Uuid>,
    parts: Parts,
) -> Result<Json<Project>, ApiError> {
    require_admin(&parts, &config, AdminScope::Read)?;

    let project = store::get_project(&pool, project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    Ok(Json(project))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusInput {
    pub status: ProjectStatus,
}

/// Suspend or resume a project. Suspension pauses delivery without loss:
/// queued messages stay queued and resume when the project does.
/// PATCH /admin/projects/{id}/status
pub async fn update_project_status(
    State(pool): State<DbPool>,
    State(config): State<Arc<Config>>,
    State(audit): State<AuditHandle>,
    Path(project_id): Path<Uuid>,
    parts: Parts,
    Json(input): Json<UpdateStatusInput>,
) -> Result<Json<Project>, ApiError> {
    require_admin(&parts, &config, AdminScope::Write)?;

    let project = store::set_project_status(&pool, project_id, input.status)
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    info!(project_id = %project.id, status = ?project.status, "project status updated");
    audit.record(AuditRecord {
        project_id: Some(project.id),
        action: match input.status {
            ProjectStatus::Suspended => "project.suspended".to_string(),
            ProjectStatus::Active => "project.resumed".to_string(),
        },
        detail: Some(json!({ "status": input.status })),
    });

    Ok(Json(project))
}
