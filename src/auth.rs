use actix_web::{dev::Payload, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Composite subject: `provider:external_id` (e.g. `google:1234`).
    pub sub: String,
    /// Internal user row id, resolved at login.
    pub uid: Id,
    pub exp: usize,
    pub roles: Vec<Role>,
}

/// Validate a JWT and return its claims.
fn decode_jwt(token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

/// Extractor yielding validated `Claims`.
pub struct Auth(pub Claims);

impl Auth {
    pub fn user_id(&self) -> Id {
        self.0.uid
    }

    pub fn is_admin(&self) -> bool {
        self.0.roles.iter().any(|r| matches!(r, Role::Admin))
    }
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        // Delegate to BearerAuth to parse the header.
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            match decode_jwt(bearer.token()) {
                Ok(claims) => return ready(Ok(Auth(claims))),
                Err(_) => return ready(Err(actix_web::error::ErrorUnauthorized("Invalid JWT"))),
            }
        }
        ready(Err(actix_web::error::ErrorUnauthorized(
            "Authorization required",
        )))
    }
}

/// Create a JWT for a marketplace user.
pub fn create_jwt(
    user_id: Id,
    subject: &str,
    roles: Vec<Role>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let secret = env::var("JWT_SECRET").expect("JWT_SECRET not set");
    let expiration = chrono::Utc::now()
        .checked_add_signed(chrono::Duration::hours(24))
        .expect("valid timestamp")
        .timestamp() as usize;

    let claims = Claims {
        sub: subject.to_string(),
        uid: user_id,
        exp: expiration,
        roles,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Subjects listed in `BOOTSTRAP_ADMIN_SUBJECTS` (comma separated) get the
/// admin role at login.
pub fn is_bootstrap_admin(subject: &str) -> bool {
    std::env::var("BOOTSTRAP_ADMIN_SUBJECTS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .any(|s| s.trim() == subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwt_round_trip() {
        std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
        let token = create_jwt(7, "google:42", vec![Role::User]).unwrap();
        let claims = decode_jwt(&token).unwrap();
        assert_eq!(claims.uid, 7);
        assert_eq!(claims.sub, "google:42");
        assert_eq!(claims.roles, vec![Role::User]);
    }

    #[test]
    fn bootstrap_admin_list() {
        std::env::set_var("BOOTSTRAP_ADMIN_SUBJECTS", "github:1, google:2");
        assert!(is_bootstrap_admin("github:1"));
        assert!(is_bootstrap_admin("google:2"));
        assert!(!is_bootstrap_admin("google:3"));
        std::env::remove_var("BOOTSTRAP_ADMIN_SUBJECTS");
    }
}
