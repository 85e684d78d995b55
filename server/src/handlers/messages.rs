//! Customer-facing message endpoints.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthenticatedContext;
use crate::db::DbPool;
use crate::enqueue::{self, AcceptOutcome, AcceptRequest};
use crate::error::ApiError;
use crate::models::{MessageStatus, MessageType};
use crate::store;

/// Longest accepted idempotency key; anything longer is a client bug.
const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

#[derive(Debug, Deserialize)]
pub struct SendMessageInput {
    pub to: String,
    pub from: String,
    pub subject: Option<String>,
    pub body: String,
    pub idempotency_key: Option<String>,
}

fn validate(input: &SendMessageInput) -> Result<(), ApiError> {
    if input.to.trim().is_empty() {
        return Err(ApiError::Validation("'to' is required".into()));
    }
    if !input.to.contains('@') {
        return Err(ApiError::Validation("'to' must be an email address".into()));
    }
    if input.from.trim().is_empty() {
        return Err(ApiError::Validation("'from' is required".into()));
    }
    if !input.from.contains('@') {
        return Err(ApiError::Validation("'from' must be an email address".into()));
    }
    if input.body.is_empty() {
        return Err(ApiError::Validation("'body' is required".into()));
    }
    if let Some(key) = &input.idempotency_key {
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(ApiError::Validation(format!(
                "'idempotency_key' must be 1-{MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
    }
    Ok(())
}

/// Accept an outbound message for delivery.
/// POST /v1/messages
pub async fn send_message(
    State(pool): State<DbPool>,
    ctx: AuthenticatedContext,
    payload: Result<Json<SendMessageInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(input) = payload.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    validate(&input)?;

    let request = AcceptRequest {
        message_type: MessageType::Email,
        from_address: input.from,
        to_address: input.to,
        subject: input.subject,
        body: input.body,
        idempotency_key: input.idempotency_key,
    };

    match enqueue::accept(&pool, ctx.project_id, request).await? {
        AcceptOutcome::Queued(message) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "message_id": message.id,
                "status": "queued",
            })),
        )
            .into_response()),
        AcceptOutcome::Duplicate { message_id, status } => Ok((
            StatusCode::OK,
            Json(json!({
                "message_id": message_id,
                "status": status,
                "duplicate": true,
            })),
        )
            .into_response()),
    }
}

const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub status: Option<MessageStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// List the caller's messages, newest first.
/// GET /v1/messages
pub async fn list_messages(
    State(pool): State<DbPool>,
    ctx: AuthenticatedContext,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0).max(0);

    let messages =
        store::list_project_messages(&pool, ctx.project_id, query.status, limit, offset).await?;

    Ok(Json(json!({
        "messages": messages,
        "limit": limit,
        "offset": offset,
    })))
}

/// Fetch one message with its event timeline, scoped to the caller's project.
/// GET /v1/messages/{id}
pub async fn get_message(
    State(pool): State<DbPool>,
    ctx: AuthenticatedContext,
    Path(message_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let message = store::get_project_message(&pool, ctx.project_id, message_id)
        .await?
        .ok_or(ApiError::NotFound("message"))?;

    let events = store::list_events(&pool, message.id).await?;

    Ok(Json(json!({
        "message": message,
        "events": events,
    })))
}
