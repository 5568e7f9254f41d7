use actix_web::{web, HttpResponse};
use chrono::Utc;

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

#[utoipa::path(
    post,
    path = "/api/v1/swaps",
    request_body = NewSwapRequest,
    responses(
        (status = 201, description = "Swap request created", body = SwapRequest),
        (status = 400, description = "Requester owns the target item, or bad message"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item unavailable, duplicate active request, or cooldown"),
        (status = 429, description = "Too many swap requests")
    )
)]
pub async fn create_swap(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewSwapRequest>,
) -> Result<HttpResponse, ApiError> {
    if let Some(rl) = &data.rate_limiter {
        if !rl.allow_swap(auth.user_id()) {
            return Err(ApiError::RateLimited("too many swap requests".into()));
        }
    }
    let mut new = payload.into_inner();
    if let Some(msg) = &new.message {
        let trimmed = msg.trim();
        if trimmed.is_empty() {
            new.message = None;
        } else if trimmed.chars().count() > MESSAGE_MAX_CHARS {
            return Err(ApiError::validation(
                "message",
                format!("must be at most {MESSAGE_MAX_CHARS} characters"),
            ));
        } else {
            new.message = Some(trimmed.to_string());
        }
    }
    let swap = data.repo.create_swap(auth.user_id(), new).await?;
    Ok(HttpResponse::Created().json(envelope(swap)))
}

#[utoipa::path(
    get,
    path = "/api/v1/swaps",
    responses((status = 200, description = "Swaps the caller participates in", body = [SwapRequest]))
)]
pub async fn list_swaps(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let swaps = data.repo.list_swaps_for_user(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(swaps)))
}

#[utoipa::path(
    get,
    path = "/api/v1/swaps/{id}",
    params(("id" = Id, Path, description = "Swap request id")),
    responses(
        (status = 200, description = "Swap request", body = SwapRequest),
        (status = 404, description = "Not found, or caller is not a participant")
    )
)]
pub async fn get_swap(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let swap = data.repo.get_swap(path.into_inner()).await?;
    // non-participants can't probe for existence
    if !swap.is_participant(auth.user_id()) {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(envelope(swap)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/swaps/{id}",
    request_body = SwapAction,
    params(("id" = Id, Path, description = "Swap request id")),
    responses(
        (status = 200, description = "Transition applied", body = SwapRequest),
        (status = 403, description = "Caller may not perform this action"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Invalid transition; state unchanged")
    )
)]
pub async fn act_on_swap(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<SwapAction>,
) -> Result<HttpResponse, ApiError> {
    let swap = data
        .repo
        .act_on_swap(path.into_inner(), auth.user_id(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(swap)))
}

/// Idempotent maintenance sweep: expires stale requests, archives and purges
/// message threads, re-fires due rating prompts. Normally driven by an
/// external scheduler hitting this endpoint.
#[utoipa::path(
    post,
    path = "/api/v1/admin/sweep",
    responses(
        (status = 200, description = "Sweep report", body = SweepReport),
        (status = 403, description = "Admin only")
    )
)]
pub async fn admin_run_sweep(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let report = data.repo.run_sweep(Utc::now()).await?;
    Ok(HttpResponse::Ok().json(envelope(report)))
}
