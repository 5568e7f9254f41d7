use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

/// Public profile view: no email, no auth subject.
fn public_view(user: &User) -> serde_json::Value {
    json!({
        "id": user.id,
        "display_name": user.display_name,
        "avatar_url": user.avatar_url,
        "tier": user.tier,
        "rating_average": user.rating_average(),
        "rating_count": user.rating_count,
        "completed_swap_count": user.completed_swap_count,
        "trust_score": user.trust_score(),
        "created_at": user.created_at,
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses((status = 200, description = "Full profile of the caller", body = User))
)]
pub async fn get_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(user)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/me",
    request_body = UpdateUser,
    responses(
        (status = 200, description = "Profile updated", body = User),
        (status = 400, description = "Empty display name")
    )
)]
pub async fn update_me(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    if upd
        .display_name
        .as_deref()
        .map_or(false, |n| n.trim().is_empty())
    {
        return Err(ApiError::validation("display_name", "must not be empty"));
    }
    let user = data.repo.update_user(auth.user_id(), upd).await?;
    Ok(HttpResponse::Ok().json(envelope(user)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me/limits",
    responses((status = 200, description = "Listing quota for the caller's tier"))
)]
pub async fn get_limits(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()).await?;
    let active = data.repo.count_active_items(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(json!({
        "tier": user.tier,
        "active_listings": active,
        "listing_limit": user.tier.listing_limit(),
    }))))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Public profile"),
        (status = 404, description = "No such user")
    )
)]
pub async fn get_user(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(envelope(public_view(&user))))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/disable",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User disabled", body = User),
        (status = 403, description = "Admin only"),
        (status = 404, description = "No such user")
    )
)]
pub async fn admin_disable_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let user = data.repo.set_user_disabled(path.into_inner(), true).await?;
    Ok(HttpResponse::Ok().json(envelope(user)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{id}/enable",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User re-enabled", body = User),
        (status = 403, description = "Admin only"),
        (status = 404, description = "No such user")
    )
)]
pub async fn admin_enable_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let user = data.repo.set_user_disabled(path.into_inner(), false).await?;
    Ok(HttpResponse::Ok().json(envelope(user)))
}

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    responses((status = 200, description = "Due notifications, newest first", body = [Notification]))
)]
pub async fn list_notifications(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let notes = data.repo.list_notifications(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(notes)))
}

#[utoipa::path(
    post,
    path = "/api/v1/notifications/{id}/read",
    params(("id" = Id, Path, description = "Notification id")),
    responses(
        (status = 200, description = "Marked read"),
        (status = 404, description = "Not found or not the caller's")
    )
)]
pub async fn mark_notification_read(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .mark_notification_read(path.into_inner(), auth.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(json!({"read": true}))))
}
