use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::*;
use crate::commission;
use crate::lifecycle;
use crate::models::*;

const SNAPSHOT_PATH: &str = "data/state.json";

#[derive(Default, Serialize, Deserialize)]
struct State {
    users: HashMap<Id, User>,
    items: HashMap<Id, WardrobeItem>,
    history: HashMap<Id, Vec<HistoryEvent>>, // keyed by item id
    swaps: HashMap<Id, SwapRequest>,
    messages: HashMap<Id, Message>,
    ratings: HashMap<Id, Rating>,
    creators: HashMap<Id, CreatorProfile>, // keyed by user id
    promotions: HashMap<Id, Promotion>,
    sales: HashMap<Id, SaleRecord>,
    collections: HashMap<Id, Collection>,
    notifications: HashMap<Id, Notification>,
    next_id: Id,
}

#[derive(Clone)]
pub struct InMemRepo {
    state: Arc<RwLock<State>>,
    snapshot_path: Arc<PathBuf>,
}

impl InMemRepo {
    fn data_dir() -> PathBuf {
        std::env::var("THREADSWAP_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"))
    }

    fn snapshot_path() -> PathBuf {
        if std::env::var("THREADSWAP_DATA_DIR").is_ok() {
            let mut p = Self::data_dir();
            p.push("state.json");
            p
        } else {
            PathBuf::from(SNAPSHOT_PATH)
        }
    }

    fn load_state_from(path: &Path) -> State {
        match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                Ok(s) => {
                    log::info!("[inmem] loaded snapshot '{}'", path.display());
                    s
                }
                Err(e) => {
                    log::warn!(
                        "[inmem] failed to parse snapshot '{}': {e}; starting empty",
                        path.display()
                    );
                    State::default()
                }
            },
            Err(_) => State::default(),
        }
    }

    fn persist(&self) {
        let path = self.snapshot_path.clone();
        if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(&*path, s) {
                log::error!("[inmem] failed to write snapshot '{}': {e}", path.display());
            }
        }
    }

    pub fn new() -> Self {
        let snapshot_path = Self::snapshot_path();
        let state = Self::load_state_from(&snapshot_path);
        Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Arc::new(snapshot_path),
        }
    }

    fn next_id(state: &mut State) -> Id {
        state.next_id += 1;
        state.next_id
    }

    fn push_history(state: &mut State, item_id: Id, kind: HistoryKind, note: Option<String>) {
        let id = Self::next_id(state);
        state.history.entry(item_id).or_default().push(HistoryEvent {
            id,
            item_id,
            kind,
            note,
            created_at: Utc::now(),
        });
    }

    fn notify(
        state: &mut State,
        user_id: Id,
        kind: NotificationKind,
        body: String,
        swap_id: Option<Id>,
        due_at: Option<DateTime<Utc>>,
    ) {
        let id = Self::next_id(state);
        state.notifications.insert(
            id,
            Notification {
                id,
                user_id,
                kind,
                body,
                swap_id,
                read: false,
                due_at,
                reminders_sent: 0,
                created_at: Utc::now(),
            },
        );
    }

    fn record_response_latency(state: &mut State, user_id: Id, hours: f64) {
        if let Some(u) = state.users.get_mut(&user_id) {
            u.response_count += 1;
            u.response_hours_sum += hours;
        }
    }
}

impl Default for InMemRepo {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepo for InMemRepo {
    async fn upsert_user(&self, new: NewUser) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        if let Some(existing) = s.users.values_mut().find(|u| u.subject == new.subject) {
            existing.email = new.email;
            existing.display_name = new.display_name;
            if new.avatar_url.is_some() {
                existing.avatar_url = new.avatar_url;
            }
            let user = existing.clone();
            drop(s);
            self.persist();
            return Ok(user);
        }
        let id = Self::next_id(&mut s);
        let user = User {
            id,
            subject: new.subject,
            email: new.email,
            display_name: new.display_name,
            avatar_url: new.avatar_url,
            tier: MembershipTier::Basic,
            rating_count: 0,
            rating_sum: 0,
            completed_swap_count: 0,
            response_count: 0,
            response_hours_sum: 0.0,
            disabled_at: None,
            created_at: Utc::now(),
        };
        s.users.insert(id, user.clone());
        drop(s);
        self.persist();
        Ok(user)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let s = self.state.read().unwrap();
        s.users.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(name) = upd.display_name {
            user.display_name = name;
        }
        if let Some(url) = upd.avatar_url {
            user.avatar_url = Some(url);
        }
        if let Some(tier) = upd.tier {
            user.tier = tier;
        }
        let updated = user.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn set_user_disabled(&self, id: Id, disabled: bool) -> RepoResult<User> {
        let mut s = self.state.write().unwrap();
        let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
        user.disabled_at = if disabled { Some(Utc::now()) } else { None };
        let updated = user.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn count_active_items(&self, owner_id: Id) -> RepoResult<i64> {
        let s = self.state.read().unwrap();
        Ok(s.items
            .values()
            .filter(|i| i.owner_id == owner_id && i.deleted_at.is_none())
            .count() as i64)
    }
}

#[async_trait]
impl WardrobeRepo for InMemRepo {
    async fn list_items(&self, filter: WardrobeFilter) -> RepoResult<Vec<WardrobeItem>> {
        let s = self.state.read().unwrap();
        let q = filter.q.as_ref().map(|q| q.to_lowercase());
        let mut v: Vec<_> = s
            .items
            .values()
            .filter(|i| i.deleted_at.is_none())
            .filter(|i| filter.owner_id.map_or(true, |o| i.owner_id == o))
            .filter(|i| filter.category.as_ref().map_or(true, |c| &i.category == c))
            .filter(|i| filter.size.as_ref().map_or(true, |c| &i.size == c))
            .filter(|i| filter.condition.as_ref().map_or(true, |c| &i.condition == c))
            .filter(|i| filter.color.as_ref().map_or(true, |c| i.colors.contains(c)))
            .filter(|i| filter.tag.as_ref().map_or(true, |t| i.tags.contains(t)))
            .filter(|i| {
                filter
                    .available_for_swap
                    .map_or(true, |f| i.available_for_swap == f)
            })
            .filter(|i| {
                filter
                    .available_for_sale
                    .map_or(true, |f| i.available_for_sale == f)
            })
            .filter(|i| {
                q.as_ref().map_or(true, |q| {
                    i.title.to_lowercase().contains(q)
                        || i.description.to_lowercase().contains(q)
                        || i.tags.iter().any(|t| t.to_lowercase().contains(q))
                })
            })
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).clamp(1, 100) as usize;
        Ok(v.into_iter().skip(offset).take(limit).collect())
    }

    async fn create_item(&self, owner_id: Id, new: NewWardrobeItem) -> RepoResult<WardrobeItem> {
        let mut s = self.state.write().unwrap();
        if !s.users.contains_key(&owner_id) {
            return Err(RepoError::NotFound);
        }
        let now = Utc::now();
        let id = Self::next_id(&mut s);
        let item = WardrobeItem {
            id,
            owner_id,
            title: new.title,
            description: new.description,
            category: new.category,
            size: new.size,
            condition: new.condition,
            colors: new.colors,
            tags: new.tags,
            available_for_swap: new.available_for_swap,
            available_for_sale: new.available_for_sale,
            sale_price_cents: new.sale_price_cents,
            swap_count: 0,
            images: new.images,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        s.items.insert(id, item.clone());
        Self::push_history(&mut s, id, HistoryKind::Upload, None);
        drop(s);
        self.persist();
        Ok(item)
    }

    async fn get_item(&self, id: Id) -> RepoResult<WardrobeItem> {
        let s = self.state.read().unwrap();
        s.items
            .get(&id)
            .filter(|i| i.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn update_item(
        &self,
        id: Id,
        owner_id: Id,
        upd: UpdateWardrobeItem,
    ) -> RepoResult<WardrobeItem> {
        let mut s = self.state.write().unwrap();
        {
            let item = s
                .items
                .get(&id)
                .filter(|i| i.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            // ownership is sensitive: non-owners can't tell the item exists
            if item.owner_id != owner_id {
                return Err(RepoError::NotFound);
            }
        }
        if let Some(kind) = upd.history_event {
            if !matches!(kind, HistoryKind::Repair | HistoryKind::Upcycle) {
                return Err(RepoError::validation(
                    "history_event",
                    "only REPAIR and UPCYCLE may be recorded manually",
                ));
            }
            Self::push_history(&mut s, id, kind, upd.history_note.clone());
        }
        let item = s.items.get_mut(&id).ok_or(RepoError::NotFound)?;
        if let Some(v) = upd.title {
            item.title = v;
        }
        if let Some(v) = upd.description {
            item.description = v;
        }
        if let Some(v) = upd.category {
            item.category = v;
        }
        if let Some(v) = upd.size {
            item.size = v;
        }
        if let Some(v) = upd.condition {
            item.condition = v;
        }
        if let Some(v) = upd.colors {
            item.colors = v;
        }
        if let Some(v) = upd.tags {
            item.tags = v;
        }
        if let Some(v) = upd.available_for_swap {
            item.available_for_swap = v;
        }
        if let Some(v) = upd.available_for_sale {
            item.available_for_sale = v;
        }
        if upd.sale_price_cents.is_some() {
            item.sale_price_cents = upd.sale_price_cents;
        }
        if let Some(v) = upd.images {
            item.images = v;
        }
        item.updated_at = Utc::now();
        let updated = item.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_item(&self, id: Id, owner_id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        {
            let item = s
                .items
                .get(&id)
                .filter(|i| i.deleted_at.is_none())
                .ok_or(RepoError::NotFound)?;
            if item.owner_id != owner_id {
                return Err(RepoError::NotFound);
            }
        }
        let referenced = s.swaps.values().any(|sw| {
            !sw.status.is_terminal() && (sw.requester_item_id == id || sw.target_item_id == id)
        });
        if referenced {
            return Err(RepoError::conflict(
                "item is referenced by an active swap request",
            ));
        }
        let item = s.items.get_mut(&id).ok_or(RepoError::NotFound)?;
        item.deleted_at = Some(Utc::now());
        item.available_for_swap = false;
        item.available_for_sale = false;
        drop(s);
        self.persist();
        Ok(())
    }

    async fn item_history(&self, item_id: Id) -> RepoResult<Vec<HistoryEvent>> {
        let s = self.state.read().unwrap();
        if !s.items.contains_key(&item_id) {
            return Err(RepoError::NotFound);
        }
        let mut v = s.history.get(&item_id).cloned().unwrap_or_default();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(v)
    }
}

#[async_trait]
impl SwapRepo for InMemRepo {
    async fn create_swap(&self, requester_id: Id, new: NewSwapRequest) -> RepoResult<SwapRequest> {
        let mut s = self.state.write().unwrap();
        let requester_item = s
            .items
            .get(&new.requester_item_id)
            .filter(|i| i.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let target_item = s
            .items
            .get(&new.target_item_id)
            .filter(|i| i.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)?;
        lifecycle::validate_create(requester_id, &requester_item, &target_item)?;

        let now = Utc::now();
        let prior: Vec<SwapRequest> = s
            .swaps
            .values()
            .filter(|sw| {
                sw.requester_item_id == new.requester_item_id
                    && sw.target_item_id == new.target_item_id
            })
            .cloned()
            .collect();
        lifecycle::validate_pair_history(&prior, now)?;

        let id = Self::next_id(&mut s);
        let swap = SwapRequest {
            id,
            requester_id,
            requester_item_id: new.requester_item_id,
            target_id: target_item.owner_id,
            target_item_id: new.target_item_id,
            status: SwapStatus::Pending,
            message: new.message.clone(),
            responder_is_requester: false,
            requester_confirmed: false,
            target_confirmed: false,
            created_at: now,
            expires_at: lifecycle::expires_at(now),
            responded_at: None,
            terminated_at: None,
            completed_at: None,
        };
        s.swaps.insert(id, swap.clone());
        // opening message lands in the thread too
        if let Some(content) = new.message {
            let msg_id = Self::next_id(&mut s);
            s.messages.insert(
                msg_id,
                Message {
                    id: msg_id,
                    swap_id: id,
                    sender_id: requester_id,
                    content,
                    read: false,
                    created_at: now,
                },
            );
        }
        Self::notify(
            &mut s,
            target_item.owner_id,
            NotificationKind::SwapRequest,
            format!("New swap request for \"{}\"", target_item.title),
            Some(id),
            None,
        );
        drop(s);
        self.persist();
        Ok(swap)
    }

    async fn get_swap(&self, id: Id) -> RepoResult<SwapRequest> {
        let s = self.state.read().unwrap();
        s.swaps.get(&id).cloned().ok_or(RepoError::NotFound)
    }

    async fn list_swaps_for_user(&self, user_id: Id) -> RepoResult<Vec<SwapRequest>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .swaps
            .values()
            .filter(|sw| sw.is_participant(user_id))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(v)
    }

    async fn act_on_swap(
        &self,
        id: Id,
        actor_id: Id,
        action: SwapAction,
    ) -> RepoResult<SwapRequest> {
        let mut s = self.state.write().unwrap();
        let swap = s.swaps.get(&id).cloned().ok_or(RepoError::NotFound)?;
        if !swap.is_participant(actor_id) {
            // participation is sensitive: outsiders can't probe swap ids
            return Err(RepoError::NotFound);
        }
        let now = Utc::now();

        match action {
            SwapAction::Accept => {
                lifecycle::validate_accept_or_reject(&swap, actor_id)?;
                let latency = lifecycle::response_latency_hours(&swap, now);
                let sw = s.swaps.get_mut(&id).unwrap();
                sw.status = SwapStatus::Accepted;
                sw.responded_at = Some(now);
                Self::record_response_latency(&mut s, actor_id, latency);
                let other = swap.counterparty(actor_id);
                Self::notify(
                    &mut s,
                    other,
                    NotificationKind::SwapUpdate,
                    "Your swap request was accepted".into(),
                    Some(id),
                    None,
                );
            }
            SwapAction::Reject => {
                lifecycle::validate_accept_or_reject(&swap, actor_id)?;
                let latency = lifecycle::response_latency_hours(&swap, now);
                let sw = s.swaps.get_mut(&id).unwrap();
                sw.status = SwapStatus::Rejected;
                sw.responded_at = Some(now);
                sw.terminated_at = Some(now);
                Self::record_response_latency(&mut s, actor_id, latency);
                let other = swap.counterparty(actor_id);
                Self::notify(
                    &mut s,
                    other,
                    NotificationKind::SwapUpdate,
                    "Your swap request was declined".into(),
                    Some(id),
                    None,
                );
            }
            SwapAction::Cancel => {
                lifecycle::validate_cancel(&swap, actor_id)?;
                let sw = s.swaps.get_mut(&id).unwrap();
                sw.status = SwapStatus::Cancelled;
                sw.terminated_at = Some(now);
                Self::notify(
                    &mut s,
                    swap.target_id,
                    NotificationKind::SwapUpdate,
                    "A swap request was withdrawn".into(),
                    Some(id),
                    None,
                );
            }
            SwapAction::Counter { counter_item_id } => {
                let counter_item = s
                    .items
                    .get(&counter_item_id)
                    .filter(|i| i.deleted_at.is_none())
                    .cloned()
                    .ok_or(RepoError::NotFound)?;
                lifecycle::validate_counter(&swap, actor_id, &counter_item)?;
                let latency = lifecycle::response_latency_hours(&swap, now);
                let sw = s.swaps.get_mut(&id).unwrap();
                sw.status = SwapStatus::Countered;
                sw.target_item_id = counter_item_id;
                sw.responder_is_requester = true;
                sw.responded_at = Some(now);
                Self::record_response_latency(&mut s, actor_id, latency);
                Self::notify(
                    &mut s,
                    swap.requester_id,
                    NotificationKind::SwapUpdate,
                    format!("Counter-offer: \"{}\"", counter_item.title),
                    Some(id),
                    None,
                );
            }
            SwapAction::Confirm => {
                let completes = lifecycle::validate_confirm(&swap, actor_id)?;
                if !completes {
                    let sw = s.swaps.get_mut(&id).unwrap();
                    if actor_id == sw.requester_id {
                        sw.requester_confirmed = true;
                    } else {
                        sw.target_confirmed = true;
                    }
                } else {
                    // second confirmation: the whole completion happens under
                    // this one write lock, so no partial state is observable
                    let (req_item_id, tgt_item_id) = (swap.requester_item_id, swap.target_item_id);
                    let requester_id = swap.requester_id;
                    let target_id = swap.target_id;

                    let sw = s.swaps.get_mut(&id).unwrap();
                    if actor_id == requester_id {
                        sw.requester_confirmed = true;
                    } else {
                        sw.target_confirmed = true;
                    }
                    sw.status = SwapStatus::Completed;
                    sw.completed_at = Some(now);
                    sw.terminated_at = Some(now);

                    for (item_id, new_owner) in
                        [(req_item_id, target_id), (tgt_item_id, requester_id)]
                    {
                        let item = s
                            .items
                            .get_mut(&item_id)
                            .ok_or_else(|| RepoError::Internal("swap item vanished".into()))?;
                        item.owner_id = new_owner;
                        item.available_for_swap = false;
                        item.swap_count += 1;
                        item.updated_at = now;
                    }
                    Self::push_history(&mut s, req_item_id, HistoryKind::Swap, None);
                    Self::push_history(&mut s, tgt_item_id, HistoryKind::Swap, None);
                    for uid in [requester_id, target_id] {
                        if let Some(u) = s.users.get_mut(&uid) {
                            u.completed_swap_count += 1;
                        }
                        Self::notify(
                            &mut s,
                            uid,
                            NotificationKind::RatingPrompt,
                            "How did your swap go? Leave a rating".into(),
                            Some(id),
                            Some(now + Duration::hours(lifecycle::RATING_PROMPT_DELAY_HOURS)),
                        );
                    }
                }
            }
        }

        let updated = s.swaps.get(&id).cloned().ok_or(RepoError::NotFound)?;
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn run_sweep(&self, now: DateTime<Utc>) -> RepoResult<SweepReport> {
        let mut s = self.state.write().unwrap();
        let mut report = SweepReport::default();

        let expired: Vec<Id> = s
            .swaps
            .values()
            .filter(|sw| lifecycle::should_expire(sw, now))
            .map(|sw| sw.id)
            .collect();
        for id in expired {
            let sw = s.swaps.get_mut(&id).unwrap();
            sw.status = SwapStatus::Expired;
            sw.terminated_at = Some(now);
            report.expired_swaps += 1;
        }

        // purge message threads past the retention window
        let purgeable: Vec<Id> = s
            .swaps
            .values()
            .filter(|sw| lifecycle::thread_purgeable(sw, now))
            .map(|sw| sw.id)
            .collect();
        for swap_id in purgeable {
            let before = s.messages.len();
            s.messages.retain(|_, m| m.swap_id != swap_id);
            if s.messages.len() < before {
                report.purged_threads += 1;
            }
        }
        report.archived_threads = s
            .swaps
            .values()
            .filter(|sw| lifecycle::thread_archived(sw, now) && !lifecycle::thread_purgeable(sw, now))
            .count();

        // rating prompt reminders: re-surface while unrated, at most twice
        let due: Vec<Id> = s
            .notifications
            .values()
            .filter(|n| {
                n.kind == NotificationKind::RatingPrompt
                    && n.due_at.map_or(false, |d| d <= now)
            })
            .map(|n| n.id)
            .collect();
        for nid in due {
            let (user_id, swap_id, reminders) = {
                let n = &s.notifications[&nid];
                (n.user_id, n.swap_id, n.reminders_sent)
            };
            let rated = swap_id.map_or(false, |sid| {
                s.ratings
                    .values()
                    .any(|r| r.swap_id == sid && r.reviewer_id == user_id)
            });
            let n = s.notifications.get_mut(&nid).unwrap();
            if rated {
                n.read = true;
                n.due_at = None;
            } else if reminders < lifecycle::MAX_RATING_REMINDERS {
                n.reminders_sent += 1;
                n.read = false;
                n.due_at = Some(now + Duration::hours(lifecycle::RATING_PROMPT_DELAY_HOURS));
                report.rating_reminders += 1;
            } else {
                n.due_at = None; // exhausted; leave the last prompt visible
            }
        }

        drop(s);
        self.persist();
        Ok(report)
    }
}

#[async_trait]
impl MessageRepo for InMemRepo {
    async fn post_message(
        &self,
        swap_id: Id,
        sender_id: Id,
        content: String,
    ) -> RepoResult<Message> {
        let mut s = self.state.write().unwrap();
        let swap = s.swaps.get(&swap_id).cloned().ok_or(RepoError::NotFound)?;
        if !swap.is_participant(sender_id) {
            return Err(RepoError::Forbidden);
        }
        let now = Utc::now();
        if lifecycle::thread_archived(&swap, now) {
            return Err(RepoError::conflict("thread is archived"));
        }
        let id = Self::next_id(&mut s);
        let msg = Message {
            id,
            swap_id,
            sender_id,
            content,
            read: false,
            created_at: now,
        };
        s.messages.insert(id, msg.clone());
        drop(s);
        self.persist();
        Ok(msg)
    }

    async fn list_messages(&self, swap_id: Id, reader_id: Id) -> RepoResult<Vec<Message>> {
        let s = self.state.read().unwrap();
        let swap = s.swaps.get(&swap_id).ok_or(RepoError::NotFound)?;
        if !swap.is_participant(reader_id) {
            return Err(RepoError::Forbidden);
        }
        let mut v: Vec<_> = s
            .messages
            .values()
            .filter(|m| m.swap_id == swap_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(v)
    }

    async fn mark_read(&self, message_id: Id, reader_id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let (swap_id, sender_id) = {
            let m = s.messages.get(&message_id).ok_or(RepoError::NotFound)?;
            (m.swap_id, m.sender_id)
        };
        let swap = s.swaps.get(&swap_id).ok_or(RepoError::NotFound)?;
        if !swap.is_participant(reader_id) {
            return Err(RepoError::Forbidden);
        }
        // marking your own message is a harmless no-op (idempotency)
        if sender_id != reader_id {
            let m = s.messages.get_mut(&message_id).unwrap();
            m.read = true;
        }
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl RatingRepo for InMemRepo {
    async fn submit_rating(
        &self,
        swap_id: Id,
        reviewer_id: Id,
        score: i32,
        review: Option<String>,
    ) -> RepoResult<Rating> {
        let mut s = self.state.write().unwrap();
        let swap = s.swaps.get(&swap_id).cloned().ok_or(RepoError::NotFound)?;
        if !swap.is_participant(reviewer_id) {
            return Err(RepoError::Forbidden);
        }
        if swap.status != SwapStatus::Completed {
            return Err(RepoError::conflict("swap is not completed"));
        }
        if !(1..=5).contains(&score) {
            return Err(RepoError::validation("score", "must be an integer from 1 to 5"));
        }
        if s.ratings
            .values()
            .any(|r| r.swap_id == swap_id && r.reviewer_id == reviewer_id)
        {
            return Err(RepoError::conflict("rating already submitted for this swap"));
        }
        let reviewee_id = swap.counterparty(reviewer_id);
        let id = Self::next_id(&mut s);
        let rating = Rating {
            id,
            swap_id,
            reviewer_id,
            reviewee_id,
            score,
            review,
            created_at: Utc::now(),
        };
        s.ratings.insert(id, rating.clone());
        if let Some(u) = s.users.get_mut(&reviewee_id) {
            u.rating_count += 1;
            u.rating_sum += score as i64;
        }
        // resolve the reviewer's rating prompt
        for n in s.notifications.values_mut() {
            if n.kind == NotificationKind::RatingPrompt
                && n.swap_id == Some(swap_id)
                && n.user_id == reviewer_id
            {
                n.read = true;
                n.due_at = None;
            }
        }
        drop(s);
        self.persist();
        Ok(rating)
    }

    async fn list_ratings_for_user(&self, user_id: Id) -> RepoResult<Vec<Rating>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .ratings
            .values()
            .filter(|r| r.reviewee_id == user_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(v)
    }
}

#[async_trait]
impl CreatorRepo for InMemRepo {
    async fn onboard_creator(
        &self,
        user_id: Id,
        stripe_account_id: String,
    ) -> RepoResult<CreatorProfile> {
        let mut s = self.state.write().unwrap();
        if !s.users.contains_key(&user_id) {
            return Err(RepoError::NotFound);
        }
        if let Some(existing) = s.creators.get(&user_id) {
            return Ok(existing.clone());
        }
        let id = Self::next_id(&mut s);
        let profile = CreatorProfile {
            id,
            user_id,
            stripe_account_id,
            onboarded: true,
            total_sales: 0,
            total_revenue_cents: 0,
            balance_cents: 0,
            created_at: Utc::now(),
        };
        s.creators.insert(user_id, profile.clone());
        drop(s);
        self.persist();
        Ok(profile)
    }

    async fn get_creator(&self, user_id: Id) -> RepoResult<CreatorProfile> {
        let s = self.state.read().unwrap();
        s.creators.get(&user_id).cloned().ok_or(RepoError::NotFound)
    }

    async fn create_promotion(&self, user_id: Id, new: NewPromotion) -> RepoResult<Promotion> {
        let mut s = self.state.write().unwrap();
        let creator_id = s.creators.get(&user_id).ok_or(RepoError::NotFound)?.id;
        if !(1..=90).contains(&new.percent_off) {
            return Err(RepoError::validation("percent_off", "must be between 1 and 90"));
        }
        let code = new
            .code
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase());
        if s.promotions
            .values()
            .any(|p| p.creator_id == creator_id && p.code == code)
        {
            return Err(RepoError::conflict("promotion code already exists"));
        }
        let id = Self::next_id(&mut s);
        let promo = Promotion {
            id,
            creator_id,
            code,
            percent_off: new.percent_off,
            uses: 0,
            max_uses: new.max_uses,
            expires_at: new.expires_at,
            created_at: Utc::now(),
        };
        s.promotions.insert(id, promo.clone());
        drop(s);
        self.persist();
        Ok(promo)
    }

    async fn list_promotions(&self, user_id: Id) -> RepoResult<Vec<Promotion>> {
        let s = self.state.read().unwrap();
        let creator_id = s.creators.get(&user_id).ok_or(RepoError::NotFound)?.id;
        let mut v: Vec<_> = s
            .promotions
            .values()
            .filter(|p| p.creator_id == creator_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(v)
    }

    async fn record_sale(
        &self,
        creator_user_id: Id,
        item_id: Id,
        buyer_id: Id,
        promo_code: Option<String>,
    ) -> RepoResult<SaleRecord> {
        let mut s = self.state.write().unwrap();
        let profile = s
            .creators
            .get(&creator_user_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        if buyer_id == creator_user_id {
            return Err(RepoError::validation("buyer", "cannot buy your own item"));
        }
        if !s.users.contains_key(&buyer_id) {
            return Err(RepoError::NotFound);
        }
        let item = s
            .items
            .get(&item_id)
            .filter(|i| i.deleted_at.is_none())
            .cloned()
            .ok_or(RepoError::NotFound)?;
        if item.owner_id != creator_user_id {
            return Err(RepoError::NotFound);
        }
        if !item.available_for_sale {
            return Err(RepoError::conflict("item is not for sale"));
        }
        let base_price = item
            .sale_price_cents
            .ok_or_else(|| RepoError::validation("sale_price_cents", "item has no sale price"))?;

        let now = Utc::now();
        let price_cents = match promo_code {
            Some(code) => {
                let promo = s
                    .promotions
                    .values()
                    .find(|p| p.creator_id == profile.id && p.code == code)
                    .cloned()
                    .ok_or_else(|| RepoError::validation("promo_code", "unknown promotion code"))?;
                if promo.expires_at.map_or(false, |e| e < now) {
                    return Err(RepoError::validation("promo_code", "promotion has expired"));
                }
                if promo.max_uses.map_or(false, |m| promo.uses >= m) {
                    return Err(RepoError::validation("promo_code", "promotion is exhausted"));
                }
                let p = s.promotions.get_mut(&promo.id).unwrap();
                p.uses += 1;
                commission::discounted_price_cents(base_price, promo.percent_off)
            }
            None => base_price,
        };

        // tier uses the count committed before this sale
        let rate_bps = commission::commission_rate_bps(profile.total_sales);
        let earnings = commission::creator_earnings_cents(price_cents, rate_bps);

        let id = Self::next_id(&mut s);
        let sale = SaleRecord {
            id,
            creator_id: profile.id,
            item_id,
            buyer_id,
            price_cents,
            commission_rate_bps: rate_bps,
            earnings_cents: earnings,
            created_at: now,
        };
        s.sales.insert(id, sale.clone());
        let p = s.creators.get_mut(&creator_user_id).unwrap();
        p.total_sales += 1;
        p.total_revenue_cents += price_cents;
        p.balance_cents += earnings;
        let it = s.items.get_mut(&item_id).unwrap();
        it.owner_id = buyer_id;
        it.available_for_sale = false;
        it.available_for_swap = false;
        it.updated_at = now;
        Self::push_history(&mut s, item_id, HistoryKind::Sale, None);
        drop(s);
        self.persist();
        Ok(sale)
    }

    async fn run_payouts(&self) -> RepoResult<Vec<PayoutRecord>> {
        let mut s = self.state.write().unwrap();
        let eligible: Vec<Id> = s
            .creators
            .values()
            .filter(|p| commission::payout_eligible(p.balance_cents))
            .map(|p| p.user_id)
            .collect();
        let mut payouts = Vec::new();
        for user_id in eligible {
            let p = s.creators.get_mut(&user_id).unwrap();
            let amount = p.balance_cents;
            p.balance_cents = 0;
            payouts.push(PayoutRecord {
                user_id,
                amount_cents: amount,
            });
            Self::notify(
                &mut s,
                user_id,
                NotificationKind::Payout,
                format!("Payout of ${}.{:02} on its way", amount / 100, amount % 100),
                None,
                None,
            );
        }
        drop(s);
        self.persist();
        Ok(payouts)
    }

    async fn get_store(
        &self,
        creator_user_id: Id,
    ) -> RepoResult<(CreatorProfile, Vec<WardrobeItem>)> {
        let s = self.state.read().unwrap();
        let profile = s
            .creators
            .get(&creator_user_id)
            .cloned()
            .ok_or(RepoError::NotFound)?;
        let mut items: Vec<_> = s
            .items
            .values()
            .filter(|i| {
                i.owner_id == creator_user_id && i.deleted_at.is_none() && i.available_for_sale
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok((profile, items))
    }
}

#[async_trait]
impl CollectionRepo for InMemRepo {
    async fn list_collections(&self, viewer_id: Option<Id>) -> RepoResult<Vec<Collection>> {
        let s = self.state.read().unwrap();
        let mut v: Vec<_> = s
            .collections
            .values()
            .filter(|c| c.public || viewer_id == Some(c.owner_id))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(v)
    }

    async fn create_collection(&self, owner_id: Id, new: NewCollection) -> RepoResult<Collection> {
        let mut s = self.state.write().unwrap();
        for item_id in &new.item_ids {
            if !s
                .items
                .get(item_id)
                .map_or(false, |i| i.deleted_at.is_none())
            {
                return Err(RepoError::validation("item_ids", "unknown item reference"));
            }
        }
        let now = Utc::now();
        let id = Self::next_id(&mut s);
        let col = Collection {
            id,
            owner_id,
            name: new.name,
            description: new.description,
            public: new.public,
            cover_image_url: new.cover_image_url,
            item_ids: new.item_ids,
            created_at: now,
            updated_at: now,
        };
        s.collections.insert(id, col.clone());
        drop(s);
        self.persist();
        Ok(col)
    }

    async fn get_collection(&self, id: Id, viewer_id: Option<Id>) -> RepoResult<Collection> {
        let s = self.state.read().unwrap();
        let col = s.collections.get(&id).ok_or(RepoError::NotFound)?;
        if !col.public && viewer_id != Some(col.owner_id) {
            return Err(RepoError::NotFound);
        }
        Ok(col.clone())
    }

    async fn update_collection(
        &self,
        id: Id,
        owner_id: Id,
        upd: UpdateCollection,
    ) -> RepoResult<Collection> {
        let mut s = self.state.write().unwrap();
        {
            let col = s.collections.get(&id).ok_or(RepoError::NotFound)?;
            if col.owner_id != owner_id {
                return Err(RepoError::NotFound);
            }
        }
        if let Some(ids) = &upd.item_ids {
            for item_id in ids {
                if !s
                    .items
                    .get(item_id)
                    .map_or(false, |i| i.deleted_at.is_none())
                {
                    return Err(RepoError::validation("item_ids", "unknown item reference"));
                }
            }
        }
        let col = s.collections.get_mut(&id).unwrap();
        if let Some(v) = upd.name {
            col.name = v;
        }
        if upd.description.is_some() {
            col.description = upd.description;
        }
        if let Some(v) = upd.public {
            col.public = v;
        }
        if upd.cover_image_url.is_some() {
            col.cover_image_url = upd.cover_image_url;
        }
        if let Some(v) = upd.item_ids {
            col.item_ids = v;
        }
        col.updated_at = Utc::now();
        let updated = col.clone();
        drop(s);
        self.persist();
        Ok(updated)
    }

    async fn delete_collection(&self, id: Id, owner_id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        {
            let col = s.collections.get(&id).ok_or(RepoError::NotFound)?;
            if col.owner_id != owner_id {
                return Err(RepoError::NotFound);
            }
        }
        s.collections.remove(&id);
        drop(s);
        self.persist();
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for InMemRepo {
    async fn list_notifications(&self, user_id: Id) -> RepoResult<Vec<Notification>> {
        let s = self.state.read().unwrap();
        let now = Utc::now();
        let mut v: Vec<_> = s
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && n.due_at.map_or(true, |d| d <= now))
            .cloned()
            .collect();
        v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(v)
    }

    async fn mark_notification_read(&self, id: Id, user_id: Id) -> RepoResult<()> {
        let mut s = self.state.write().unwrap();
        let n = s.notifications.get_mut(&id).ok_or(RepoError::NotFound)?;
        if n.user_id != user_id {
            return Err(RepoError::NotFound);
        }
        n.read = true;
        drop(s);
        self.persist();
        Ok(())
    }
}
