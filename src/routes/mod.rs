use std::sync::Arc;

use actix_web::web;

use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;
use crate::storage::ImageStore;

pub mod collections;
pub mod creator;
pub mod messages;
pub mod oauth;
pub mod ratings;
pub mod shipping;
pub mod swaps;
pub mod upload;
pub mod users;
pub mod wardrobe;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub image_store: Arc<dyn ImageStore>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/wardrobe")
                    .route(web::get().to(wardrobe::list_items))
                    .route(web::post().to(wardrobe::create_item)),
            )
            .service(
                web::resource("/wardrobe/analyze").route(web::post().to(wardrobe::analyze_item)),
            )
            .service(
                web::resource("/wardrobe/{id}")
                    .route(web::get().to(wardrobe::get_item))
                    .route(web::patch().to(wardrobe::update_item))
                    .route(web::delete().to(wardrobe::delete_item)),
            )
            .service(
                web::resource("/wardrobe/{id}/history").route(web::get().to(wardrobe::item_history)),
            )
            .service(
                web::resource("/swaps")
                    .route(web::get().to(swaps::list_swaps))
                    .route(web::post().to(swaps::create_swap)),
            )
            .service(
                web::resource("/swaps/{id}")
                    .route(web::get().to(swaps::get_swap))
                    .route(web::patch().to(swaps::act_on_swap)),
            )
            .service(
                web::resource("/swaps/{id}/messages")
                    .route(web::get().to(messages::list_messages))
                    .route(web::post().to(messages::post_message)),
            )
            .service(
                web::resource("/messages/{id}/read").route(web::post().to(messages::mark_read)),
            )
            .service(
                web::resource("/swaps/{id}/ratings").route(web::post().to(ratings::submit_rating)),
            )
            .service(
                web::resource("/users/{id}/ratings").route(web::get().to(ratings::list_ratings)),
            )
            .service(
                web::resource("/users/me")
                    .route(web::get().to(users::get_me))
                    .route(web::patch().to(users::update_me)),
            )
            .service(web::resource("/users/me/limits").route(web::get().to(users::get_limits)))
            .service(web::resource("/users/{id}").route(web::get().to(users::get_user)))
            .service(
                web::resource("/notifications").route(web::get().to(users::list_notifications)),
            )
            .service(
                web::resource("/notifications/{id}/read")
                    .route(web::post().to(users::mark_notification_read)),
            )
            .service(
                web::resource("/creator/profile")
                    .route(web::get().to(creator::get_profile))
                    .route(web::post().to(creator::onboard)),
            )
            .service(
                web::resource("/creator/promotions")
                    .route(web::get().to(creator::list_promotions))
                    .route(web::post().to(creator::create_promotion)),
            )
            .service(web::resource("/store/{creator_id}").route(web::get().to(creator::get_store)))
            .service(
                web::resource("/store/{creator_id}/purchase")
                    .route(web::post().to(creator::purchase)),
            )
            .service(
                web::resource("/collections")
                    .route(web::get().to(collections::list_collections))
                    .route(web::post().to(collections::create_collection)),
            )
            .service(
                web::resource("/collections/{id}")
                    .route(web::get().to(collections::get_collection))
                    .route(web::patch().to(collections::update_collection))
                    .route(web::delete().to(collections::delete_collection)),
            )
            .service(
                web::resource("/shipping/track/{tracking_number}")
                    .route(web::get().to(shipping::track)),
            )
            .service(web::resource("/upload").route(web::post().to(upload::upload_images)))
            .service(web::resource("/upload/{key}").route(web::delete().to(upload::delete_image)))
            .service(
                web::resource("/auth/{provider}/login").route(web::get().to(oauth::login)),
            )
            .service(
                web::resource("/auth/{provider}/callback").route(web::get().to(oauth::callback)),
            )
            .service(web::resource("/auth/refresh").route(web::post().to(oauth::refresh_token)))
            .service(web::resource("/auth/me").route(web::get().to(oauth::auth_me)))
            .service(web::resource("/admin/sweep").route(web::post().to(swaps::admin_run_sweep)))
            .service(
                web::resource("/admin/payouts/run").route(web::post().to(creator::admin_run_payouts)),
            )
            .service(
                web::resource("/admin/users/{id}/disable")
                    .route(web::post().to(users::admin_disable_user)),
            )
            .service(
                web::resource("/admin/users/{id}/enable")
                    .route(web::post().to(users::admin_enable_user)),
            ),
    );
    // public fetch route without the /api/v1 prefix so <img src="/images/{key}"> works
    cfg.route("/images/{key}", web::get().to(upload::get_image));
}
