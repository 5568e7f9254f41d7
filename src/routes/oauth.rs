//! OAuth login for google and github. Both follow the same shape: redirect
//! to the provider's consent page, exchange the callback code for a token,
//! fetch the verified identity, upsert the user row, mint a JWT and bounce
//! back to the frontend.

use actix_web::{web, HttpResponse};
use serde_json::Value;

use crate::auth::{create_jwt, is_bootstrap_admin, Auth, Role};
use crate::error::{envelope, ApiError};
use crate::models::NewUser;
use crate::routes::AppState;
use crate::upstream::send_with_retry;

struct Provider {
    name: &'static str,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
    client_id: String,
    client_secret: String,
    scope: &'static str,
}

impl Provider {
    /// Fails with SERVICE_UNAVAILABLE when the provider's credentials are
    /// absent, so an unconfigured deployment degrades instead of 500ing.
    fn from_env(name: &str) -> Result<Self, ApiError> {
        let (name, prefix, auth_url, token_url, userinfo_url, scope) = match name {
            "google" => (
                "google",
                "GOOGLE",
                "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                "https://oauth2.googleapis.com/token".to_string(),
                "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                "openid email profile",
            ),
            "github" => (
                "github",
                "GITHUB",
                "https://github.com/login/oauth/authorize".to_string(),
                "https://github.com/login/oauth/access_token".to_string(),
                "https://api.github.com/user".to_string(),
                "read:user user:email",
            ),
            _ => return Err(ApiError::NotFound),
        };
        let client_id = std::env::var(format!("{prefix}_CLIENT_ID")).map_err(|_| {
            ApiError::Unavailable(format!(
                "{name} login is not configured; set {prefix}_CLIENT_ID / {prefix}_CLIENT_SECRET"
            ))
        })?;
        let client_secret = std::env::var(format!("{prefix}_CLIENT_SECRET")).map_err(|_| {
            ApiError::Unavailable(format!(
                "{name} login is not configured; set {prefix}_CLIENT_ID / {prefix}_CLIENT_SECRET"
            ))
        })?;
        // overridable endpoints so tests can stand in a local mock
        let token_url = std::env::var(format!("{prefix}_TOKEN_URL")).unwrap_or(token_url);
        let userinfo_url = std::env::var(format!("{prefix}_USERINFO_URL")).unwrap_or(userinfo_url);
        Ok(Self {
            name,
            auth_url,
            token_url,
            userinfo_url,
            client_id,
            client_secret,
            scope,
        })
    }

    fn redirect_uri(&self) -> String {
        std::env::var(format!("{}_REDIRECT_URI", self.name.to_uppercase())).unwrap_or_else(|_| {
            format!(
                "http://localhost:8080/api/v1/auth/{}/callback",
                self.name
            )
        })
    }
}

/// Provider identity normalized to what the user row needs.
struct Identity {
    subject: String,
    email: String,
    display_name: String,
    avatar_url: Option<String>,
}

fn identity_from(provider: &Provider, info: &Value) -> Result<Identity, ApiError> {
    match provider.name {
        "google" => {
            let sub = info["sub"].as_str().ok_or(ApiError::Internal)?;
            Ok(Identity {
                subject: format!("google:{sub}"),
                email: info["email"].as_str().unwrap_or_default().to_string(),
                display_name: info["name"]
                    .as_str()
                    .unwrap_or("Unnamed user")
                    .to_string(),
                avatar_url: info["picture"].as_str().map(str::to_string),
            })
        }
        _ => {
            let id = info["id"].as_i64().ok_or(ApiError::Internal)?;
            Ok(Identity {
                subject: format!("github:{id}"),
                email: info["email"].as_str().unwrap_or_default().to_string(),
                display_name: info["name"]
                    .as_str()
                    .or_else(|| info["login"].as_str())
                    .unwrap_or("Unnamed user")
                    .to_string(),
                avatar_url: info["avatar_url"].as_str().map(str::to_string),
            })
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/{provider}/login",
    params(("provider" = String, Path, description = "google or github")),
    responses(
        (status = 302, description = "Redirect to the provider's consent page"),
        (status = 503, description = "Provider not configured")
    )
)]
pub async fn login(path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let provider = Provider::from_env(&path.into_inner())?;
    let url = format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}",
        provider.auth_url,
        urlencoding::encode(&provider.client_id),
        urlencoding::encode(&provider.redirect_uri()),
        urlencoding::encode(provider.scope),
    );
    Ok(HttpResponse::Found()
        .insert_header(("Location", url))
        .finish())
}

#[derive(serde::Deserialize)]
pub struct CallbackQuery {
    code: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/{provider}/callback",
    params(("provider" = String, Path, description = "google or github")),
    responses(
        (status = 302, description = "Redirect to the frontend with a JWT"),
        (status = 503, description = "Provider not configured or unreachable")
    )
)]
pub async fn callback(
    path: web::Path<String>,
    query: web::Query<CallbackQuery>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let provider = Provider::from_env(&path.into_inner())?;
    let redirect_uri = provider.redirect_uri();
    let client = reqwest::Client::new();

    let token: Value = send_with_retry(|| {
        client
            .post(&provider.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("client_id", provider.client_id.as_str()),
                ("client_secret", provider.client_secret.as_str()),
                ("grant_type", "authorization_code"),
                ("code", query.code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ])
    })
    .await
    .map_err(|e| ApiError::Unavailable(e.to_string()))?
    .json()
    .await
    .map_err(|_| ApiError::Internal)?;
    let access_token = token["access_token"]
        .as_str()
        .ok_or(ApiError::Unauthorized)?
        .to_string();

    let info: Value = send_with_retry(|| {
        client
            .get(&provider.userinfo_url)
            .bearer_auth(&access_token)
            .header(reqwest::header::USER_AGENT, "threadswap")
    })
    .await
    .map_err(|e| ApiError::Unavailable(e.to_string()))?
    .json()
    .await
    .map_err(|_| ApiError::Internal)?;

    let identity = identity_from(&provider, &info)?;
    let user = data
        .repo
        .upsert_user(NewUser {
            subject: identity.subject.clone(),
            email: identity.email,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
        })
        .await?;
    if user.disabled_at.is_some() {
        return Err(ApiError::Unauthorized);
    }

    let mut roles = vec![Role::User];
    if is_bootstrap_admin(&identity.subject) {
        roles.push(Role::Admin);
    }
    let jwt = create_jwt(user.id, &identity.subject, roles).map_err(|_| ApiError::Internal)?;

    let frontend_url =
        std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string());
    Ok(HttpResponse::Found()
        .insert_header(("Location", format!("{frontend_url}/?token={jwt}")))
        .finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "Fresh JWT for the same identity"),
        (status = 401, description = "Invalid or expired token")
    )
)]
pub async fn refresh_token(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // a token outlives an out-of-band disable; re-check the row before minting
    let user = data.repo.get_user(auth.user_id()).await?;
    if user.disabled_at.is_some() {
        return Err(ApiError::Unauthorized);
    }
    let jwt = create_jwt(auth.0.uid, &auth.0.sub, auth.0.roles.clone())
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(envelope(serde_json::json!({ "token": jwt }))))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Claims of the presented token"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()).await?;
    if user.disabled_at.is_some() {
        return Err(ApiError::Unauthorized);
    }
    let role = if auth.is_admin() { "admin" } else { "user" };
    Ok(HttpResponse::Ok().json(envelope(serde_json::json!({
        "id": user.id,
        "subject": auth.0.sub,
        "display_name": user.display_name,
        "role": role,
    }))))
}
