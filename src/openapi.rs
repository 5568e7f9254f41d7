use utoipa::OpenApi;

use crate::models::{
    Collection, CreatorProfile, HistoryEvent, HistoryKind, ItemImage, MembershipTier, Message,
    NewCollection, NewMessage, NewPromotion, NewRating, NewSwapRequest, NewWardrobeItem,
    Notification, NotificationKind, PayoutRecord, Promotion, Rating, SaleRecord, SwapAction,
    SwapRequest, SwapStatus, SweepReport, UpdateCollection, UpdateUser, UpdateWardrobeItem, User,
    WardrobeItem,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::wardrobe::list_items,
        crate::routes::wardrobe::create_item,
        crate::routes::wardrobe::get_item,
        crate::routes::wardrobe::update_item,
        crate::routes::wardrobe::delete_item,
        crate::routes::wardrobe::item_history,
        crate::routes::wardrobe::analyze_item,
        crate::routes::swaps::create_swap,
        crate::routes::swaps::list_swaps,
        crate::routes::swaps::get_swap,
        crate::routes::swaps::act_on_swap,
        crate::routes::swaps::admin_run_sweep,
        crate::routes::messages::post_message,
        crate::routes::messages::list_messages,
        crate::routes::messages::mark_read,
        crate::routes::ratings::submit_rating,
        crate::routes::ratings::list_ratings,
        crate::routes::users::get_me,
        crate::routes::users::update_me,
        crate::routes::users::get_limits,
        crate::routes::users::get_user,
        crate::routes::users::admin_disable_user,
        crate::routes::users::admin_enable_user,
        crate::routes::users::list_notifications,
        crate::routes::users::mark_notification_read,
        crate::routes::creator::onboard,
        crate::routes::creator::get_profile,
        crate::routes::creator::create_promotion,
        crate::routes::creator::list_promotions,
        crate::routes::creator::get_store,
        crate::routes::creator::purchase,
        crate::routes::creator::admin_run_payouts,
        crate::routes::collections::list_collections,
        crate::routes::collections::create_collection,
        crate::routes::collections::get_collection,
        crate::routes::collections::update_collection,
        crate::routes::collections::delete_collection,
        crate::routes::shipping::track,
        crate::routes::upload::upload_images,
        crate::routes::upload::delete_image,
        crate::routes::oauth::login,
        crate::routes::oauth::callback,
        crate::routes::oauth::refresh_token,
        crate::routes::oauth::auth_me,
    ),
    components(schemas(
        User, UpdateUser, MembershipTier, WardrobeItem, ItemImage, NewWardrobeItem,
        UpdateWardrobeItem, HistoryEvent, HistoryKind,
        SwapRequest, SwapStatus, NewSwapRequest, SwapAction, SweepReport,
        Message, NewMessage, Rating, NewRating,
        CreatorProfile, Promotion, NewPromotion, SaleRecord, PayoutRecord,
        Collection, NewCollection, UpdateCollection, Notification, NotificationKind,
        crate::routes::creator::OnboardRequest, crate::routes::creator::PurchaseRequest,
        crate::routes::upload::UploadedImage,
    )),
    tags(
        (name = "wardrobe", description = "Wardrobe catalog"),
        (name = "swaps", description = "Swap lifecycle"),
        (name = "messages", description = "Per-swap messaging"),
        (name = "ratings", description = "Post-swap ratings"),
        (name = "creator", description = "Creator storefronts and commissions"),
        (name = "collections", description = "Curated item collections"),
    )
)]
pub struct ApiDoc;
