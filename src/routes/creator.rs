use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct OnboardRequest {
    pub stripe_account_id: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/creator/profile",
    request_body = OnboardRequest,
    responses(
        (status = 201, description = "Creator profile created (idempotent)", body = CreatorProfile),
        (status = 400, description = "Missing Stripe account id")
    )
)]
pub async fn onboard(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<OnboardRequest>,
) -> Result<HttpResponse, ApiError> {
    let account = payload.into_inner().stripe_account_id.trim().to_string();
    if account.is_empty() {
        return Err(ApiError::validation("stripe_account_id", "must not be empty"));
    }
    let profile = data.repo.onboard_creator(auth.user_id(), account).await?;
    Ok(HttpResponse::Created().json(envelope(profile)))
}

#[utoipa::path(
    get,
    path = "/api/v1/creator/profile",
    responses(
        (status = 200, description = "Caller's creator profile", body = CreatorProfile),
        (status = 404, description = "Caller has not onboarded")
    )
)]
pub async fn get_profile(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let profile = data.repo.get_creator(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(profile)))
}

#[utoipa::path(
    post,
    path = "/api/v1/creator/promotions",
    request_body = NewPromotion,
    responses(
        (status = 201, description = "Promotion created", body = Promotion),
        (status = 400, description = "percent_off out of range"),
        (status = 404, description = "Caller has not onboarded"),
        (status = 409, description = "Duplicate code")
    )
)]
pub async fn create_promotion(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewPromotion>,
) -> Result<HttpResponse, ApiError> {
    let promo = data
        .repo
        .create_promotion(auth.user_id(), payload.into_inner())
        .await?;
    Ok(HttpResponse::Created().json(envelope(promo)))
}

#[utoipa::path(
    get,
    path = "/api/v1/creator/promotions",
    responses(
        (status = 200, description = "Caller's promotions", body = [Promotion]),
        (status = 404, description = "Caller has not onboarded")
    )
)]
pub async fn list_promotions(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let promos = data.repo.list_promotions(auth.user_id()).await?;
    Ok(HttpResponse::Ok().json(envelope(promos)))
}

/// Public storefront: the creator's profile, display info and for-sale items.
#[utoipa::path(
    get,
    path = "/api/v1/store/{creator_id}",
    params(("creator_id" = Id, Path, description = "Creator's user id")),
    responses(
        (status = 200, description = "Storefront"),
        (status = 404, description = "No such creator")
    )
)]
pub async fn get_store(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let creator_user_id = path.into_inner();
    let (profile, items) = data.repo.get_store(creator_user_id).await?;
    let user = data.repo.get_user(creator_user_id).await?;
    Ok(HttpResponse::Ok().json(envelope(json!({
        "creator": {
            "user_id": user.id,
            "display_name": user.display_name,
            "avatar_url": user.avatar_url,
            "rating_average": user.rating_average(),
            "trust_score": user.trust_score(),
            "total_sales": profile.total_sales,
        },
        "items": items,
    }))))
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct PurchaseRequest {
    pub item_id: Id,
    pub promo_code: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/store/{creator_id}/purchase",
    request_body = PurchaseRequest,
    params(("creator_id" = Id, Path, description = "Creator's user id")),
    responses(
        (status = 201, description = "Sale recorded", body = SaleRecord),
        (status = 400, description = "Bad promo code, no sale price, or buying own item"),
        (status = 404, description = "Item or creator not found"),
        (status = 409, description = "Item not for sale")
    )
)]
pub async fn purchase(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let sale = data
        .repo
        .record_sale(path.into_inner(), req.item_id, auth.user_id(), req.promo_code)
        .await?;
    Ok(HttpResponse::Created().json(envelope(sale)))
}

/// Pays out every creator whose balance cleared the minimum. Idempotent when
/// re-run with no intervening sales; sub-threshold balances roll forward.
#[utoipa::path(
    post,
    path = "/api/v1/admin/payouts/run",
    responses(
        (status = 200, description = "Payouts issued this run", body = [PayoutRecord]),
        (status = 403, description = "Admin only")
    )
)]
pub async fn admin_run_payouts(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden);
    }
    let payouts = data.repo.run_payouts().await?;
    Ok(HttpResponse::Ok().json(envelope(payouts)))
}
