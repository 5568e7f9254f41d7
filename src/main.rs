use actix_cors::Cors;
use actix_web::{middleware::Compress, App, HttpServer};
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod commission;
mod error;
mod lifecycle;
mod models;
mod openapi;
mod rate_limit;
mod repo;
mod routes;
mod security;
mod storage;
mod upstream;

use openapi::ApiDoc;
use rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use repo::SwapRepo as _;
#[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
use repo::inmem::InMemRepo;
use routes::{config, AppState};
use security::SecurityHeaders;
use std::sync::Arc;
use storage::build_image_store;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // for ApiDoc::openapi()

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // .env only in debug builds; production gets env from the deployment
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    validate_env_vars();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("bootstrapping threadswap server");
    info!(
        "google oauth configured: {}",
        std::env::var("GOOGLE_CLIENT_ID").is_ok()
    );
    info!(
        "github oauth configured: {}",
        std::env::var("GITHUB_CLIENT_ID").is_ok()
    );

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        info!("using in-memory repository backend");
        InMemRepo::new()
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let db_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres-store");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&db_url)
            .expect("failed to create Pg pool");
        info!("using Postgres repository backend");
        let repo = crate::repo::pg::PgRepo::new(pool);
        if let Err(e) = repo.migrate().await {
            eprintln!("database migration failed: {e}");
            std::process::exit(1);
        }
        repo
    };

    let image_store = match build_image_store().await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to initialize image store: {e}");
            std::process::exit(1);
        }
    };

    let rl_enabled = std::env::var("RL_ENABLED")
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(true);
    let rate_limiter = Some(RateLimiterFacade::new(
        InMemoryRateLimiter::new(rl_enabled),
        RateLimitConfig::from_env(),
    ));

    // optional in-process sweep loop; an external scheduler hitting
    // POST /api/v1/admin/sweep works just as well
    if let Ok(secs) = std::env::var("SWEEP_INTERVAL_SECS") {
        if let Ok(secs) = secs.parse::<u64>() {
            let sweep_repo = repo.clone();
            actix_web::rt::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(secs));
                loop {
                    interval.tick().await;
                    match sweep_repo.run_sweep(chrono::Utc::now()).await {
                        Ok(report) => info!(
                            expired = report.expired_swaps,
                            purged = report.purged_threads,
                            reminders = report.rating_reminders,
                            "maintenance sweep finished"
                        ),
                        Err(e) => tracing::error!("maintenance sweep failed: {e}"),
                    }
                }
            });
            info!("in-process sweep every {secs}s");
        }
    }

    let openapi = ApiDoc::openapi();

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            if let Ok(front) = std::env::var("FRONTEND_URL") {
                c = c.allowed_origin(&front);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::from_env())
            .wrap(cors)
            .configure(config)
            .service(SwaggerUi::new("/docs").url("/docs/openapi.json", openapi.clone()))
            .app_data(actix_web::web::Data::new(AppState {
                repo: Arc::new(repo.clone()),
                image_store: image_store.clone(),
                rate_limiter: rate_limiter.clone(),
            }))
    })
    .bind(("0.0.0.0", 8080))?;

    info!("listening on http://0.0.0.0:8080");
    server.run().await
}

fn validate_env_vars() {
    use std::env;

    if env::var("JWT_SECRET").is_err() {
        eprintln!("JWT_SECRET must be set");
        std::process::exit(1);
    }
    if let Ok(secret) = env::var("JWT_SECRET") {
        if secret.len() < 32 {
            eprintln!("JWT_SECRET must be at least 32 characters long");
            std::process::exit(1);
        }
    }
    if env::var("GOOGLE_CLIENT_ID").is_err() && env::var("GITHUB_CLIENT_ID").is_err() {
        eprintln!("Warning: no OAuth provider configured (GOOGLE_CLIENT_ID / GITHUB_CLIENT_ID)");
        eprintln!("Login endpoints will answer 503 until one is set");
    }
}
