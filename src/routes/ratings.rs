use actix_web::{web, HttpResponse};

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::models::*;
use crate::routes::AppState;

#[utoipa::path(
    post,
    path = "/api/v1/swaps/{id}/ratings",
    request_body = NewRating,
    params(("id" = Id, Path, description = "Swap request id")),
    responses(
        (status = 201, description = "Rating stored", body = Rating),
        (status = 400, description = "Score out of range"),
        (status = 403, description = "Caller is not a swap participant"),
        (status = 409, description = "Already rated, or swap not completed")
    )
)]
pub async fn submit_rating(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewRating>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    let review = new
        .review
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let rating = data
        .repo
        .submit_rating(path.into_inner(), auth.user_id(), new.score, review)
        .await?;
    Ok(HttpResponse::Created().json(envelope(rating)))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/ratings",
    params(("id" = Id, Path, description = "User id")),
    responses((status = 200, description = "Ratings received by the user", body = [Rating]))
)]
pub async fn list_ratings(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let ratings = data.repo.list_ratings_for_user(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(envelope(ratings)))
}
