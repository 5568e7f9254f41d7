use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use serde_json::json;

use crate::repo::RepoError;

/// Success envelope used by every handler.
pub fn envelope<T: Serialize>(data: T) -> serde_json::Value {
    json!({ "success": true, "data": data })
}

/// HTTP-status-aligned error taxonomy. Validation failures carry
/// field-by-field details; everything else is a single code + message.
#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("VALIDATION_ERROR")]
    Validation(Vec<FieldError>),
    #[error("UNAUTHORIZED")]
    Unauthorized,
    #[error("FORBIDDEN")]
    Forbidden,
    #[error("NOT_FOUND")]
    NotFound,
    #[error("CONFLICT")]
    Conflict(String),
    #[error("RATE_LIMIT_EXCEEDED")]
    RateLimited(String),
    #[error("SERVER_ERROR")]
    Internal,
    #[error("SERVICE_UNAVAILABLE")]
    Unavailable(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        ApiError::Validation(vec![FieldError {
            field: field.into(),
            message: message.into(),
        }])
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::NotFound => ApiError::NotFound,
            RepoError::Forbidden => ApiError::Forbidden,
            RepoError::Conflict(msg) => ApiError::Conflict(msg),
            RepoError::Validation { field, message } => ApiError::validation(&field, message),
            RepoError::Internal(msg) => {
                log::error!("repository error: {msg}");
                ApiError::Internal
            }
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        use actix_web::http::StatusCode;
        let status = match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = match self {
            ApiError::Validation(fields) => json!({
                "success": false,
                "error": "VALIDATION_ERROR",
                "details": fields,
            }),
            ApiError::Conflict(msg) | ApiError::RateLimited(msg) | ApiError::Unavailable(msg) => {
                json!({
                    "success": false,
                    "error": self.to_string(),
                    "message": msg,
                })
            }
            _ => json!({ "success": false, "error": self.to_string() }),
        };
        HttpResponse::build(status).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            ApiError::validation("score", "out of range").error_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.error_response().status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.error_response().status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound.error_response().status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::conflict("dup").error_response().status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::RateLimited("limit".into()).error_response().status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::Internal.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            ApiError::Unavailable("carrier down".into()).error_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
