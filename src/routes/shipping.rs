use actix_web::{web, HttpResponse};

use crate::auth::Auth;
use crate::error::{envelope, ApiError};
use crate::upstream::{self, UpstreamError};

/// Proxied carrier lookup. A carrier 4xx means the tracking number doesn't
/// exist (NOT_FOUND); exhausted retries mean the carrier is down
/// (SERVICE_UNAVAILABLE).
#[utoipa::path(
    get,
    path = "/api/v1/shipping/track/{tracking_number}",
    params(("tracking_number" = String, Path, description = "Carrier tracking number")),
    responses(
        (status = 200, description = "Tracking events from the carrier"),
        (status = 404, description = "Unknown tracking number"),
        (status = 503, description = "Carrier unreachable after retries")
    )
)]
pub async fn track(
    _auth: Auth,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    match upstream::track_shipment(&path.into_inner()).await {
        Ok(events) => Ok(HttpResponse::Ok().json(envelope(events))),
        Err(UpstreamError::Rejected(_)) => Err(ApiError::NotFound),
        Err(UpstreamError::Unconfigured) => Err(ApiError::Unavailable(
            "shipment tracking is not configured".into(),
        )),
        Err(UpstreamError::Exhausted(msg)) => Err(ApiError::Unavailable(msg)),
    }
}
