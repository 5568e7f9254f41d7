use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

#[utoipa::path(
    get,
    path = "/api/v1/collections",
    responses((status = 200, description = "Public collections plus the caller's own", body = [Collection]))
)]
pub async fn list_collections(
    auth: Option<Auth>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(|a| a.user_id());
    let cols = data.repo.list_collections(viewer).await?;
    Ok(HttpResponse::Ok().json(envelope(cols)))
}

#[utoipa::path(
    post,
    path = "/api/v1/collections",
    request_body = NewCollection,
    responses(
        (status = 201, description = "Collection created", body = Collection),
        (status = 400, description = "Empty name or unknown item reference")
    )
)]
pub async fn create_collection(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewCollection>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.name.trim().is_empty() {
        return Err(ApiError::validation("name", "must not be empty"));
    }
    let col = data.repo.create_collection(auth.user_id(), new).await?;
    Ok(HttpResponse::Created().json(envelope(col)))
}

#[utoipa::path(
    get,
    path = "/api/v1/collections/{id}",
    params(("id" = Id, Path, description = "Collection id")),
    responses(
        (status = 200, description = "Collection", body = Collection),
        (status = 404, description = "Not found, or private and not the caller's")
    )
)]
pub async fn get_collection(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(|a| a.user_id());
    let col = data.repo.get_collection(path.into_inner(), viewer).await?;
    Ok(HttpResponse::Ok().json(envelope(col)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/collections/{id}",
    request_body = UpdateCollection,
    params(("id" = Id, Path, description = "Collection id")),
    responses(
        (status = 200, description = "Collection updated", body = Collection),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn update_collection(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateCollection>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    if upd.name.as_deref().map_or(false, |n| n.trim().is_empty()) {
        return Err(ApiError::validation("name", "must not be empty"));
    }
    let col = data
        .repo
        .update_collection(path.into_inner(), auth.user_id(), upd)
        .await?;
    Ok(HttpResponse::Ok().json(envelope(col)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/collections/{id}",
    params(("id" = Id, Path, description = "Collection id")),
    responses(
        (status = 200, description = "Collection deleted"),
        (status = 404, description = "Not found or not owned by the caller")
    )
)]
pub async fn delete_collection(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .delete_collection(path.into_inner(), auth.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(json!({"deleted": true}))))
}
