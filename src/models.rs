use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub type Id = i64;

/// Membership tier gates how many active listings a user may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum MembershipTier {
    Basic,
    Standard,
    Pro,
}

impl MembershipTier {
    /// `None` means unlimited.
    pub fn listing_limit(self) -> Option<i64> {
        match self {
            MembershipTier::Basic => Some(10),
            MembershipTier::Standard => Some(50),
            MembershipTier::Pro => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MembershipTier::Basic => "BASIC",
            MembershipTier::Standard => "STANDARD",
            MembershipTier::Pro => "PRO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BASIC" => Some(MembershipTier::Basic),
            "STANDARD" => Some(MembershipTier::Standard),
            "PRO" => Some(MembershipTier::Pro),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Id,
    /// Stable auth subject, `provider:subject` (e.g. `google:1234`).
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub tier: MembershipTier,
    pub rating_count: i64,
    pub rating_sum: i64,
    pub completed_swap_count: i64,
    /// Response latency aggregates, fed by swap responses (trust score input).
    pub response_count: i64,
    pub response_hours_sum: f64,
    pub disabled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn rating_average(&self) -> Option<f64> {
        if self.rating_count == 0 {
            None
        } else {
            Some(self.rating_sum as f64 / self.rating_count as f64)
        }
    }

    pub fn avg_response_hours(&self) -> Option<f64> {
        if self.response_count == 0 {
            None
        } else {
            Some(self.response_hours_sum / self.response_count as f64)
        }
    }

    /// Display-only trust heuristic:
    /// `min(100, avg/5*40 + min(completed, 50) + max(0, 24 - avg_response_hours))`.
    /// Users without ratings or response history score the missing component as 0.
    pub fn trust_score(&self) -> f64 {
        let rating_part = self.rating_average().map(|a| a / 5.0 * 40.0).unwrap_or(0.0);
        let volume_part = (self.completed_swap_count.min(50)) as f64;
        let response_part = self
            .avg_response_hours()
            .map(|h| (24.0 - h).max(0.0))
            .unwrap_or(0.0);
        (rating_part + volume_part + response_part).min(100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub subject: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub tier: Option<MembershipTier>,
}

// ---------------- Wardrobe ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ItemImage {
    pub url: String,
    /// Deletable object-store key.
    pub key: String,
    pub primary: bool,
    pub position: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WardrobeItem {
    pub id: Id,
    pub owner_id: Id,
    pub title: String,
    pub description: String,
    pub category: String,
    pub size: String,
    pub condition: String,
    pub colors: Vec<String>,
    pub tags: Vec<String>,
    pub available_for_swap: bool,
    pub available_for_sale: bool,
    pub sale_price_cents: Option<i64>,
    pub swap_count: i32,
    pub images: Vec<ItemImage>,
    pub deleted_at: Option<DateTime<Utc>>, // soft delete marker
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewWardrobeItem {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub size: String,
    pub condition: String,
    #[serde(default)]
    pub colors: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub available_for_swap: bool,
    #[serde(default)]
    pub available_for_sale: bool,
    pub sale_price_cents: Option<i64>,
    #[serde(default)]
    pub images: Vec<ItemImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateWardrobeItem {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub colors: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub available_for_swap: Option<bool>,
    pub available_for_sale: Option<bool>,
    pub sale_price_cents: Option<i64>,
    pub images: Option<Vec<ItemImage>>,
    /// REPAIR / UPCYCLE annotation appended to the item history.
    pub history_event: Option<HistoryKind>,
    pub history_note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryKind {
    Upload,
    Swap,
    Repair,
    Upcycle,
    Sale,
}

impl HistoryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HistoryKind::Upload => "UPLOAD",
            HistoryKind::Swap => "SWAP",
            HistoryKind::Repair => "REPAIR",
            HistoryKind::Upcycle => "UPCYCLE",
            HistoryKind::Sale => "SALE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UPLOAD" => Some(HistoryKind::Upload),
            "SWAP" => Some(HistoryKind::Swap),
            "REPAIR" => Some(HistoryKind::Repair),
            "UPCYCLE" => Some(HistoryKind::Upcycle),
            "SALE" => Some(HistoryKind::Sale),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HistoryEvent {
    pub id: Id,
    pub item_id: Id,
    pub kind: HistoryKind,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Catalog filter; every present field is ANDed into the query.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WardrobeFilter {
    pub owner_id: Option<Id>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub condition: Option<String>,
    pub color: Option<String>,
    pub tag: Option<String>,
    /// Free-text over title/description/tags, case-insensitive.
    pub q: Option<String>,
    pub available_for_swap: Option<bool>,
    pub available_for_sale: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

// ---------------- Swaps ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
    Countered,
    Completed,
    Cancelled,
    Expired,
    Disputed,
}

impl SwapStatus {
    /// Terminal states are immutable; any further action is a conflict.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Rejected
                | SwapStatus::Completed
                | SwapStatus::Cancelled
                | SwapStatus::Expired
                | SwapStatus::Disputed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SwapStatus::Pending => "PENDING",
            SwapStatus::Accepted => "ACCEPTED",
            SwapStatus::Rejected => "REJECTED",
            SwapStatus::Countered => "COUNTERED",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Cancelled => "CANCELLED",
            SwapStatus::Expired => "EXPIRED",
            SwapStatus::Disputed => "DISPUTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(SwapStatus::Pending),
            "ACCEPTED" => Some(SwapStatus::Accepted),
            "REJECTED" => Some(SwapStatus::Rejected),
            "COUNTERED" => Some(SwapStatus::Countered),
            "COMPLETED" => Some(SwapStatus::Completed),
            "CANCELLED" => Some(SwapStatus::Cancelled),
            "EXPIRED" => Some(SwapStatus::Expired),
            "DISPUTED" => Some(SwapStatus::Disputed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SwapRequest {
    pub id: Id,
    pub requester_id: Id,
    pub requester_item_id: Id,
    pub target_id: Id,
    pub target_item_id: Id,
    pub status: SwapStatus,
    pub message: Option<String>,
    /// After a counter the original requester becomes the responder.
    pub responder_is_requester: bool,
    pub requester_confirmed: bool,
    pub target_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    /// Set when the request enters any terminal state (drives thread archival).
    pub terminated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SwapRequest {
    pub fn is_participant(&self, user_id: Id) -> bool {
        self.requester_id == user_id || self.target_id == user_id
    }

    /// The user currently expected to accept/reject/counter.
    pub fn responder_id(&self) -> Id {
        if self.responder_is_requester {
            self.requester_id
        } else {
            self.target_id
        }
    }

    pub fn counterparty(&self, user_id: Id) -> Id {
        if self.requester_id == user_id {
            self.target_id
        } else {
            self.requester_id
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewSwapRequest {
    pub requester_item_id: Id,
    pub target_item_id: Id,
    pub message: Option<String>,
}

/// Action carried by `PATCH /api/v1/swaps/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SwapAction {
    Accept,
    Reject,
    Cancel,
    Counter { counter_item_id: Id },
    Confirm,
}

// ---------------- Messages ----------------

pub const MESSAGE_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Message {
    pub id: Id,
    pub swap_id: Id,
    pub sender_id: Id,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewMessage {
    pub content: String,
}

// ---------------- Ratings ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Rating {
    pub id: Id,
    pub swap_id: Id,
    pub reviewer_id: Id,
    pub reviewee_id: Id,
    pub score: i32,
    pub review: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewRating {
    pub score: i32,
    pub review: Option<String>,
}

// ---------------- Creator / commission ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreatorProfile {
    pub id: Id,
    pub user_id: Id,
    pub stripe_account_id: String,
    pub onboarded: bool,
    pub total_sales: i64,
    pub total_revenue_cents: i64,
    /// Earnings not yet paid out; rolls forward below the payout minimum.
    pub balance_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Promotion {
    pub id: Id,
    pub creator_id: Id,
    pub code: String,
    pub percent_off: i32,
    pub uses: i32,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewPromotion {
    pub code: Option<String>,
    pub percent_off: i32,
    pub max_uses: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleRecord {
    pub id: Id,
    pub creator_id: Id,
    pub item_id: Id,
    pub buyer_id: Id,
    pub price_cents: i64,
    /// Commission rate applied, in basis points (evaluated before this sale).
    pub commission_rate_bps: i32,
    pub earnings_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PayoutRecord {
    pub user_id: Id,
    pub amount_cents: i64,
}

// ---------------- Collections ----------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Collection {
    pub id: Id,
    pub owner_id: Id,
    pub name: String,
    pub description: Option<String>,
    pub public: bool,
    pub cover_image_url: Option<String>,
    pub item_ids: Vec<Id>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewCollection {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub public: bool,
    pub cover_image_url: Option<String>,
    #[serde(default)]
    pub item_ids: Vec<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateCollection {
    pub name: Option<String>,
    pub description: Option<String>,
    pub public: Option<bool>,
    pub cover_image_url: Option<String>,
    pub item_ids: Option<Vec<Id>>,
}

// ---------------- Notifications ----------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    SwapRequest,
    SwapUpdate,
    RatingPrompt,
    Payout,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::SwapRequest => "SWAP_REQUEST",
            NotificationKind::SwapUpdate => "SWAP_UPDATE",
            NotificationKind::RatingPrompt => "RATING_PROMPT",
            NotificationKind::Payout => "PAYOUT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SWAP_REQUEST" => Some(NotificationKind::SwapRequest),
            "SWAP_UPDATE" => Some(NotificationKind::SwapUpdate),
            "RATING_PROMPT" => Some(NotificationKind::RatingPrompt),
            "PAYOUT" => Some(NotificationKind::Payout),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notification {
    pub id: Id,
    pub user_id: Id,
    pub kind: NotificationKind,
    pub body: String,
    pub swap_id: Option<Id>,
    pub read: bool,
    /// Deferred delivery: hidden from listings until due.
    pub due_at: Option<DateTime<Utc>>,
    /// Rating prompts re-fire at most twice.
    pub reminders_sent: i32,
    pub created_at: DateTime<Utc>,
}

/// Result of one idempotent maintenance sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SweepReport {
    pub expired_swaps: usize,
    pub archived_threads: usize,
    pub purged_threads: usize,
    pub rating_reminders: usize,
}
