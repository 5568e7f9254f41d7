use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::lifecycle::TransitionError;
use crate::models::*;

#[cfg(feature = "inmem-store")]
pub mod inmem;
#[cfg(feature = "postgres-store")]
pub mod pg;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {field}: {message}")]
    Validation { field: String, message: String },
    #[error("internal: {0}")]
    Internal(String),
}

impl RepoError {
    pub fn conflict(msg: impl Into<String>) -> Self {
        RepoError::Conflict(msg.into())
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        RepoError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<TransitionError> for RepoError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::Conflict(msg) => RepoError::Conflict(msg.to_string()),
            TransitionError::Forbidden => RepoError::Forbidden,
            TransitionError::Validation { field, message } => {
                RepoError::validation(field, message)
            }
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

#[async_trait]
pub trait UserRepo: Send + Sync {
    /// Find-or-create keyed on the auth subject; refreshes profile fields
    /// from the identity provider on every login.
    async fn upsert_user(&self, new: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User>;
    /// Admin soft-disable toggle. Disabled users are refused at login,
    /// refresh and identity lookups; re-enabling restores access.
    async fn set_user_disabled(&self, id: Id, disabled: bool) -> RepoResult<User>;
    /// Active (non-deleted) listings for quota checks.
    async fn count_active_items(&self, owner_id: Id) -> RepoResult<i64>;
}

#[async_trait]
pub trait WardrobeRepo: Send + Sync {
    async fn list_items(&self, filter: WardrobeFilter) -> RepoResult<Vec<WardrobeItem>>;
    async fn create_item(&self, owner_id: Id, new: NewWardrobeItem) -> RepoResult<WardrobeItem>;
    async fn get_item(&self, id: Id) -> RepoResult<WardrobeItem>;
    /// Owner-checked update; non-owners get NotFound (ownership is sensitive).
    async fn update_item(&self, id: Id, owner_id: Id, upd: UpdateWardrobeItem) -> RepoResult<WardrobeItem>;
    /// Soft delete; conflicts while a non-terminal swap references the item.
    async fn delete_item(&self, id: Id, owner_id: Id) -> RepoResult<()>;
    async fn item_history(&self, item_id: Id) -> RepoResult<Vec<HistoryEvent>>;
}

#[async_trait]
pub trait SwapRepo: Send + Sync {
    /// Full create-side validation: ownership, availability, one active
    /// request per ordered item pair, 24h retry cooldown.
    async fn create_swap(&self, requester_id: Id, new: NewSwapRequest) -> RepoResult<SwapRequest>;
    async fn get_swap(&self, id: Id) -> RepoResult<SwapRequest>;
    async fn list_swaps_for_user(&self, user_id: Id) -> RepoResult<Vec<SwapRequest>>;
    /// Accept / reject / counter / cancel / confirm. Completion (the second
    /// confirm) atomically transfers ownership of both items.
    async fn act_on_swap(&self, id: Id, actor_id: Id, action: SwapAction) -> RepoResult<SwapRequest>;
    /// Idempotent maintenance sweep: expiry, thread archival/purge, rating
    /// prompt reminders.
    async fn run_sweep(&self, now: DateTime<Utc>) -> RepoResult<SweepReport>;
}

#[async_trait]
pub trait MessageRepo: Send + Sync {
    /// Participants only; content already length-validated by the caller.
    async fn post_message(&self, swap_id: Id, sender_id: Id, content: String) -> RepoResult<Message>;
    async fn list_messages(&self, swap_id: Id, reader_id: Id) -> RepoResult<Vec<Message>>;
    /// Idempotent; reader must be a participant other than the sender.
    async fn mark_read(&self, message_id: Id, reader_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait RatingRepo: Send + Sync {
    async fn submit_rating(
        &self,
        swap_id: Id,
        reviewer_id: Id,
        score: i32,
        review: Option<String>,
    ) -> RepoResult<Rating>;
    async fn list_ratings_for_user(&self, user_id: Id) -> RepoResult<Vec<Rating>>;
}

#[async_trait]
pub trait CreatorRepo: Send + Sync {
    async fn onboard_creator(&self, user_id: Id, stripe_account_id: String) -> RepoResult<CreatorProfile>;
    async fn get_creator(&self, user_id: Id) -> RepoResult<CreatorProfile>;
    async fn create_promotion(&self, user_id: Id, new: NewPromotion) -> RepoResult<Promotion>;
    async fn list_promotions(&self, user_id: Id) -> RepoResult<Vec<Promotion>>;
    /// Records a sale: commission tier evaluated on the pre-sale count,
    /// item marked sold, earnings credited to the creator balance.
    async fn record_sale(
        &self,
        creator_user_id: Id,
        item_id: Id,
        buyer_id: Id,
        promo_code: Option<String>,
    ) -> RepoResult<SaleRecord>;
    /// Pays out every creator at or above the threshold; idempotent when
    /// re-run with no intervening sales.
    async fn run_payouts(&self) -> RepoResult<Vec<PayoutRecord>>;
    /// Public storefront: the creator plus their for-sale items.
    async fn get_store(&self, creator_user_id: Id) -> RepoResult<(CreatorProfile, Vec<WardrobeItem>)>;
}

#[async_trait]
pub trait CollectionRepo: Send + Sync {
    async fn list_collections(&self, viewer_id: Option<Id>) -> RepoResult<Vec<Collection>>;
    async fn create_collection(&self, owner_id: Id, new: NewCollection) -> RepoResult<Collection>;
    /// Private collections are NotFound to anyone but the owner.
    async fn get_collection(&self, id: Id, viewer_id: Option<Id>) -> RepoResult<Collection>;
    async fn update_collection(&self, id: Id, owner_id: Id, upd: UpdateCollection) -> RepoResult<Collection>;
    async fn delete_collection(&self, id: Id, owner_id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait NotificationRepo: Send + Sync {
    /// Due notifications only (deferred ones stay hidden until `due_at`).
    async fn list_notifications(&self, user_id: Id) -> RepoResult<Vec<Notification>>;
    async fn mark_notification_read(&self, id: Id, user_id: Id) -> RepoResult<()>;
}

pub trait Repo:
    UserRepo
    + WardrobeRepo
    + SwapRepo
    + MessageRepo
    + RatingRepo
    + CreatorRepo
    + CollectionRepo
    + NotificationRepo
{
}

impl<T> Repo for T where
    T: UserRepo
        + WardrobeRepo
        + SwapRepo
        + MessageRepo
        + RatingRepo
        + CreatorRepo
        + CollectionRepo
        + NotificationRepo
{
}
