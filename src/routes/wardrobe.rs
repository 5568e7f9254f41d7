use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt as _;
use serde_json::json;

use crate::auth::Auth;
use crate::error::{envelope, ApiError, FieldError};
use crate::models::*;
use crate::routes::AppState;
use crate::upstream;

fn require_nonempty(errors: &mut Vec<FieldError>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(FieldError {
            field: field.into(),
            message: "must not be empty".into(),
        });
    }
}

fn validate_new_item(new: &NewWardrobeItem) -> Result<(), ApiError> {
    let mut errors = Vec::new();
    require_nonempty(&mut errors, "title", &new.title);
    require_nonempty(&mut errors, "category", &new.category);
    require_nonempty(&mut errors, "size", &new.size);
    require_nonempty(&mut errors, "condition", &new.condition);
    if new.available_for_sale && new.sale_price_cents.is_none() {
        errors.push(FieldError {
            field: "sale_price_cents".into(),
            message: "required when available_for_sale is set".into(),
        });
    }
    if new.sale_price_cents.map_or(false, |p| p <= 0) {
        errors.push(FieldError {
            field: "sale_price_cents".into(),
            message: "must be positive".into(),
        });
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(errors))
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/wardrobe",
    responses((status = 200, description = "Filtered wardrobe listing", body = [WardrobeItem]))
)]
pub async fn list_items(
    data: web::Data<AppState>,
    filter: web::Query<WardrobeFilter>,
) -> Result<HttpResponse, ApiError> {
    let items = data.repo.list_items(filter.into_inner()).await?;
    Ok(HttpResponse::Ok().json(envelope(items)))
}

#[utoipa::path(
    post,
    path = "/api/v1/wardrobe",
    request_body = NewWardrobeItem,
    responses(
        (status = 201, description = "Item created", body = WardrobeItem),
        (status = 400, description = "Validation failure"),
        (status = 429, description = "Listing limit for the membership tier reached")
    )
)]
pub async fn create_item(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewWardrobeItem>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    validate_new_item(&new)?;
    let user = data.repo.get_user(auth.user_id()).await?;
    if let Some(limit) = user.tier.listing_limit() {
        let active = data.repo.count_active_items(auth.user_id()).await?;
        if active >= limit {
            return Err(ApiError::RateLimited(format!(
                "listing limit of {limit} reached for tier {}",
                user.tier.as_str()
            )));
        }
    }
    let item = data.repo.create_item(auth.user_id(), new).await?;
    Ok(HttpResponse::Created().json(envelope(item)))
}

#[utoipa::path(
    get,
    path = "/api/v1/wardrobe/{id}",
    params(("id" = Id, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item", body = WardrobeItem),
        (status = 404, description = "Item not found or deleted")
    )
)]
pub async fn get_item(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let item = data.repo.get_item(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(envelope(item)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/wardrobe/{id}",
    request_body = UpdateWardrobeItem,
    params(("id" = Id, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item updated", body = WardrobeItem),
        (status = 404, description = "Item not found (including not owned by caller)")
    )
)]
pub async fn update_item(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateWardrobeItem>,
) -> Result<HttpResponse, ApiError> {
    let upd = payload.into_inner();
    let mut errors = Vec::new();
    if let Some(title) = &upd.title {
        require_nonempty(&mut errors, "title", title);
    }
    if let Some(category) = &upd.category {
        require_nonempty(&mut errors, "category", category);
    }
    if upd.sale_price_cents.map_or(false, |p| p <= 0) {
        errors.push(FieldError {
            field: "sale_price_cents".into(),
            message: "must be positive".into(),
        });
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    let item = data
        .repo
        .update_item(path.into_inner(), auth.user_id(), upd)
        .await?;
    Ok(HttpResponse::Ok().json(envelope(item)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/wardrobe/{id}",
    params(("id" = Id, Path, description = "Item id")),
    responses(
        (status = 200, description = "Item soft-deleted"),
        (status = 404, description = "Item not found"),
        (status = 409, description = "Item referenced by an active swap request")
    )
)]
pub async fn delete_item(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    data.repo
        .delete_item(path.into_inner(), auth.user_id())
        .await?;
    Ok(HttpResponse::Ok().json(envelope(json!({"deleted": true}))))
}

#[utoipa::path(
    get,
    path = "/api/v1/wardrobe/{id}/history",
    params(("id" = Id, Path, description = "Item id")),
    responses(
        (status = 200, description = "Append-only item history", body = [HistoryEvent]),
        (status = 404, description = "Item not found")
    )
)]
pub async fn item_history(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let events = data.repo.item_history(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(envelope(events)))
}

const ANALYZE_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// AI-assisted listing: sends the uploaded image to the vision provider and
/// returns suggested attributes. Provider downtime degrades to a manual-entry
/// response rather than an error.
#[utoipa::path(
    post,
    path = "/api/v1/wardrobe/analyze",
    responses(
        (status = 200, description = "Suggested attributes, or a fallback marker"),
        (status = 400, description = "No image in the request")
    )
)]
pub async fn analyze_item(
    _auth: Auth,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let mut bytes: Vec<u8> = Vec::new();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        log::error!("multipart error: {e}");
        ApiError::Internal
    })? {
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            log::error!("stream read error: {e}");
            ApiError::Internal
        })? {
            if bytes.len() + chunk.len() > ANALYZE_SIZE_LIMIT {
                return Err(ApiError::validation("files", "File exceeds the 10MB limit"));
            }
            bytes.extend_from_slice(&chunk);
        }
        break; // only the first file matters here
    }
    if bytes.is_empty() {
        return Err(ApiError::validation("files", "an image file is required"));
    }
    let mime = infer::get(&bytes)
        .map(|t| t.mime_type().to_string())
        .unwrap_or_else(|| "application/octet-stream".into());
    if !mime.starts_with("image/") {
        return Err(ApiError::validation("files", "Only image files are allowed"));
    }

    match upstream::analyze_garment(bytes, &mime).await {
        Ok(attributes) => Ok(HttpResponse::Ok().json(envelope(json!({
            "fallback": false,
            "attributes": attributes,
        })))),
        Err(e) => {
            log::warn!("vision provider unavailable, falling back to manual entry: {e}");
            Ok(HttpResponse::Ok().json(envelope(json!({
                "fallback": true,
                "attributes": {},
            }))))
        }
    }
}
