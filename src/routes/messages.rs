use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

#[utoipa::path(
    post,
    path = "/api/v1/swaps/{id}/messages",
    request_body = NewMessage,
    params(("id" = Id, Path, description = "Swap request id")),
    responses(
        (status = 201, description = "Message appended", body = Message),
        (status = 400, description = "Empty or oversized content"),
        (status = 403, description = "Caller is not a participant"),
        (status = 409, description = "Thread archived")
    )
)]
pub async fn post_message(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewMessage>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_message(auth.user_id()) {
            return Err(ApiError::RateLimited("too many messages".into()));
        }
    }
    let content = payload.into_inner().content.trim().to_string();
    if content.is_empty() {
        return Err(ApiError::validation("content", "must not be empty"));
    }
    if content.chars().count() > MESSAGE_MAX_CHARS {
        return Err(ApiError::validation(
            "content",
            format!("must be at most {MESSAGE_MAX_CHARS} characters"),
        ));
    }
    let msg = data
        .repo
        .post_message(path.into_inner(), auth.user_id(), content)
        .await?;
    Ok(HttpResponse::Created().json(envelope(msg)))
}

#[utoipa::path(
    get,
    path = "/api/v1/swaps/{id}/messages",
    params(("id" = Id, Path, description = "Swap request id")),
    responses(
        (status = 200, description = "Thread messages, oldest first", body = [Message]),
        (status = 403, description = "Caller is not a participant")
    )
)]
pub async fn list_messages(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let msgs = data
        .repo
        .list_messages(path.into_inner(), auth.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(msgs)))
}

/// Idempotent, and deliberately silent: no read receipts are sent.
#[utoipa::path(
    post,
    path = "/api/v1/messages/{id}/read",
    params(("id" = Id, Path, description = "Message id")),
    responses(
        (status = 200, description = "Marked read (or already read)"),
        (status = 403, description = "Caller is not a participant"),
        (status = 404, description = "Message not found")
    )
)]
pub async fn mark_read(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .mark_read(path.into_inner(), auth.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(json!({"read": true}))))
}
