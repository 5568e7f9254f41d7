//! Postgres backend. Multi-row mutations (swap completion, sales) run inside
//! a single transaction; the active-pair invariant is additionally enforced
//! by a partial unique index so concurrent creates cannot race.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};

use super::*;
use crate::commission;
use crate::lifecycle;
use crate::models::*;

#[derive(Clone)]
pub struct PgRepo {
    pool: Pool<Postgres>,
}

impl PgRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn internal(e: sqlx::Error) -> RepoError {
    match e {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        other => RepoError::Internal(other.to_string()),
    }
}

fn parse_status(s: &str) -> RepoResult<SwapStatus> {
    SwapStatus::parse(s).ok_or_else(|| RepoError::Internal(format!("bad swap status '{s}'")))
}

fn user_from_row(row: &PgRow) -> RepoResult<User> {
    let tier: String = row.get("tier");
    Ok(User {
        id: row.get("id"),
        subject: row.get("subject"),
        email: row.get("email"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        tier: MembershipTier::parse(&tier)
            .ok_or_else(|| RepoError::Internal(format!("bad tier '{tier}'")))?,
        rating_count: row.get("rating_count"),
        rating_sum: row.get("rating_sum"),
        completed_swap_count: row.get("completed_swap_count"),
        response_count: row.get("response_count"),
        response_hours_sum: row.get("response_hours_sum"),
        disabled_at: row.get("disabled_at"),
        created_at: row.get("created_at"),
    })
}

fn item_from_row(row: &PgRow) -> WardrobeItem {
    WardrobeItem {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        description: row.get("description"),
        category: row.get("category"),
        size: row.get("size"),
        condition: row.get("condition"),
        colors: row.get("colors"),
        tags: row.get("tags"),
        available_for_swap: row.get("available_for_swap"),
        available_for_sale: row.get("available_for_sale"),
        sale_price_cents: row.get("sale_price_cents"),
        swap_count: row.get("swap_count"),
        images: Vec::new(), // attached separately
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn swap_from_row(row: &PgRow) -> RepoResult<SwapRequest> {
    let status: String = row.get("status");
    Ok(SwapRequest {
        id: row.get("id"),
        requester_id: row.get("requester_id"),
        requester_item_id: row.get("requester_item_id"),
        target_id: row.get("target_id"),
        target_item_id: row.get("target_item_id"),
        status: parse_status(&status)?,
        message: row.get("message"),
        responder_is_requester: row.get("responder_is_requester"),
        requester_confirmed: row.get("requester_confirmed"),
        target_confirmed: row.get("target_confirmed"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        responded_at: row.get("responded_at"),
        terminated_at: row.get("terminated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn message_from_row(row: &PgRow) -> Message {
    Message {
        id: row.get("id"),
        swap_id: row.get("swap_id"),
        sender_id: row.get("sender_id"),
        content: row.get("content"),
        read: row.get("read"),
        created_at: row.get("created_at"),
    }
}

fn rating_from_row(row: &PgRow) -> Rating {
    Rating {
        id: row.get("id"),
        swap_id: row.get("swap_id"),
        reviewer_id: row.get("reviewer_id"),
        reviewee_id: row.get("reviewee_id"),
        score: row.get("score"),
        review: row.get("review"),
        created_at: row.get("created_at"),
    }
}

fn creator_from_row(row: &PgRow) -> CreatorProfile {
    CreatorProfile {
        id: row.get("id"),
        user_id: row.get("user_id"),
        stripe_account_id: row.get("stripe_account_id"),
        onboarded: row.get("onboarded"),
        total_sales: row.get("total_sales"),
        total_revenue_cents: row.get("total_revenue_cents"),
        balance_cents: row.get("balance_cents"),
        created_at: row.get("created_at"),
    }
}

fn promotion_from_row(row: &PgRow) -> Promotion {
    Promotion {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        code: row.get("code"),
        percent_off: row.get("percent_off"),
        uses: row.get("uses"),
        max_uses: row.get("max_uses"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn collection_from_row(row: &PgRow) -> Collection {
    Collection {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        description: row.get("description"),
        public: row.get("public"),
        cover_image_url: row.get("cover_image_url"),
        item_ids: row.get("item_ids"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn notification_from_row(row: &PgRow) -> RepoResult<Notification> {
    let kind: String = row.get("kind");
    Ok(Notification {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: NotificationKind::parse(&kind)
            .ok_or_else(|| RepoError::Internal(format!("bad notification kind '{kind}'")))?,
        body: row.get("body"),
        swap_id: row.get("swap_id"),
        read: row.get("read"),
        due_at: row.get("due_at"),
        reminders_sent: row.get("reminders_sent"),
        created_at: row.get("created_at"),
    })
}

impl PgRepo {
    async fn attach_images(&self, items: &mut [WardrobeItem]) -> RepoResult<()> {
        for item in items.iter_mut() {
            let rows = sqlx::query(
                "SELECT url, key, is_primary, position FROM item_images WHERE item_id = $1 ORDER BY position",
            )
            .bind(item.id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            item.images = rows
                .iter()
                .map(|r| ItemImage {
                    url: r.get("url"),
                    key: r.get("key"),
                    primary: r.get("is_primary"),
                    position: r.get("position"),
                })
                .collect();
        }
        Ok(())
    }

    async fn replace_images(
        conn: &mut sqlx::PgConnection,
        item_id: Id,
        images: &[ItemImage],
    ) -> RepoResult<()> {
        sqlx::query("DELETE FROM item_images WHERE item_id = $1")
            .bind(item_id)
            .execute(&mut *conn)
            .await
            .map_err(internal)?;
        for img in images {
            sqlx::query(
                "INSERT INTO item_images (item_id, url, key, is_primary, position) VALUES ($1,$2,$3,$4,$5)",
            )
            .bind(item_id)
            .bind(&img.url)
            .bind(&img.key)
            .bind(img.primary)
            .bind(img.position)
            .execute(&mut *conn)
            .await
            .map_err(internal)?;
        }
        Ok(())
    }

    async fn notify(
        &self,
        user_id: Id,
        kind: NotificationKind,
        body: &str,
        swap_id: Option<Id>,
        due_at: Option<DateTime<Utc>>,
    ) -> RepoResult<()> {
        sqlx::query(
            "INSERT INTO notifications (user_id, kind, body, swap_id, due_at) VALUES ($1,$2,$3,$4,$5)",
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(body)
        .bind(swap_id)
        .bind(due_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl UserRepo for PgRepo {
    async fn upsert_user(&self, new: NewUser) -> RepoResult<User> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (subject, email, display_name, avatar_url)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject) DO UPDATE SET
                email = EXCLUDED.email,
                display_name = EXCLUDED.display_name,
                avatar_url = COALESCE(EXCLUDED.avatar_url, users.avatar_url)
            RETURNING *
            "#,
        )
        .bind(&new.subject)
        .bind(&new.email)
        .bind(&new.display_name)
        .bind(&new.avatar_url)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        user_from_row(&row)
    }

    async fn get_user(&self, id: Id) -> RepoResult<User> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        user_from_row(&row)
    }

    async fn update_user(&self, id: Id, upd: UpdateUser) -> RepoResult<User> {
        let row = sqlx::query(
            r#"
            UPDATE users SET
                display_name = COALESCE($2, display_name),
                avatar_url = COALESCE($3, avatar_url),
                tier = COALESCE($4, tier)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(upd.display_name)
        .bind(upd.avatar_url)
        .bind(upd.tier.map(|t| t.as_str()))
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        user_from_row(&row)
    }

    async fn set_user_disabled(&self, id: Id, disabled: bool) -> RepoResult<User> {
        let row = sqlx::query(
            r#"
            UPDATE users
            SET disabled_at = CASE WHEN $2 THEN COALESCE(disabled_at, $3) ELSE NULL END
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(disabled)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        user_from_row(&row)
    }

    async fn count_active_items(&self, owner_id: Id) -> RepoResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM wardrobe_items WHERE owner_id = $1 AND deleted_at IS NULL",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(row.get("n"))
    }
}

#[async_trait]
impl WardrobeRepo for PgRepo {
    async fn list_items(&self, filter: WardrobeFilter) -> RepoResult<Vec<WardrobeItem>> {
        let limit = filter.limit.unwrap_or(50).clamp(1, 100);
        let offset = filter.offset.unwrap_or(0).max(0);
        let q = filter.q.map(|q| format!("%{}%", q.to_lowercase()));
        let rows = sqlx::query(
            r#"
            SELECT * FROM wardrobe_items
            WHERE deleted_at IS NULL
              AND ($1::bigint IS NULL OR owner_id = $1)
              AND ($2::text IS NULL OR category = $2)
              AND ($3::text IS NULL OR size = $3)
              AND ($4::text IS NULL OR condition = $4)
              AND ($5::text IS NULL OR $5 = ANY(colors))
              AND ($6::text IS NULL OR $6 = ANY(tags))
              AND ($7::boolean IS NULL OR available_for_swap = $7)
              AND ($8::boolean IS NULL OR available_for_sale = $8)
              AND ($9::text IS NULL
                   OR lower(title) LIKE $9
                   OR lower(description) LIKE $9
                   OR EXISTS (SELECT 1 FROM unnest(tags) t WHERE lower(t) LIKE $9))
            ORDER BY created_at DESC
            LIMIT $10 OFFSET $11
            "#,
        )
        .bind(filter.owner_id)
        .bind(filter.category)
        .bind(filter.size)
        .bind(filter.condition)
        .bind(filter.color)
        .bind(filter.tag)
        .bind(filter.available_for_swap)
        .bind(filter.available_for_sale)
        .bind(q)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        let mut items: Vec<WardrobeItem> = rows.iter().map(item_from_row).collect();
        self.attach_images(&mut items).await?;
        Ok(items)
    }

    async fn create_item(&self, owner_id: Id, new: NewWardrobeItem) -> RepoResult<WardrobeItem> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query(
            r#"
            INSERT INTO wardrobe_items
                (owner_id, title, description, category, size, condition, colors, tags,
                 available_for_swap, available_for_sale, sale_price_cents)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(&new.title)
        .bind(&new.description)
        .bind(&new.category)
        .bind(&new.size)
        .bind(&new.condition)
        .bind(&new.colors)
        .bind(&new.tags)
        .bind(new.available_for_swap)
        .bind(new.available_for_sale)
        .bind(new.sale_price_cents)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let mut item = item_from_row(&row);
        Self::replace_images(&mut *tx, item.id, &new.images).await?;
        sqlx::query("INSERT INTO item_history (item_id, kind) VALUES ($1, 'UPLOAD')")
            .bind(item.id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;
        item.images = new.images;
        Ok(item)
    }

    async fn get_item(&self, id: Id) -> RepoResult<WardrobeItem> {
        let row = sqlx::query("SELECT * FROM wardrobe_items WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        let mut items = vec![item_from_row(&row)];
        self.attach_images(&mut items).await?;
        items
            .pop()
            .ok_or_else(|| RepoError::Internal("item vanished".into()))
    }

    async fn update_item(
        &self,
        id: Id,
        owner_id: Id,
        upd: UpdateWardrobeItem,
    ) -> RepoResult<WardrobeItem> {
        let current = self.get_item(id).await?;
        if current.owner_id != owner_id {
            return Err(RepoError::NotFound);
        }
        if let Some(kind) = upd.history_event {
            if !matches!(kind, HistoryKind::Repair | HistoryKind::Upcycle) {
                return Err(RepoError::validation(
                    "history_event",
                    "only REPAIR and UPCYCLE may be recorded manually",
                ));
            }
        }
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query(
            r#"
            UPDATE wardrobe_items SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                category = COALESCE($4, category),
                size = COALESCE($5, size),
                condition = COALESCE($6, condition),
                colors = COALESCE($7, colors),
                tags = COALESCE($8, tags),
                available_for_swap = COALESCE($9, available_for_swap),
                available_for_sale = COALESCE($10, available_for_sale),
                sale_price_cents = COALESCE($11, sale_price_cents),
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(upd.title)
        .bind(upd.description)
        .bind(upd.category)
        .bind(upd.size)
        .bind(upd.condition)
        .bind(upd.colors)
        .bind(upd.tags)
        .bind(upd.available_for_swap)
        .bind(upd.available_for_sale)
        .bind(upd.sale_price_cents)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let item = item_from_row(&row);
        if let Some(images) = &upd.images {
            Self::replace_images(&mut *tx, id, images).await?;
        }
        if let Some(kind) = upd.history_event {
            sqlx::query("INSERT INTO item_history (item_id, kind, note) VALUES ($1,$2,$3)")
                .bind(id)
                .bind(kind.as_str())
                .bind(upd.history_note)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;
        let mut items = vec![item];
        self.attach_images(&mut items).await?;
        items
            .pop()
            .ok_or_else(|| RepoError::Internal("item vanished".into()))
    }

    async fn delete_item(&self, id: Id, owner_id: Id) -> RepoResult<()> {
        let current = self.get_item(id).await?;
        if current.owner_id != owner_id {
            return Err(RepoError::NotFound);
        }
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM swap_requests
            WHERE (requester_item_id = $1 OR target_item_id = $1)
              AND status IN ('PENDING','ACCEPTED','COUNTERED')
            "#,
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        let referenced: i64 = row.get("n");
        if referenced > 0 {
            return Err(RepoError::conflict(
                "item is referenced by an active swap request",
            ));
        }
        sqlx::query(
            r#"
            UPDATE wardrobe_items
            SET deleted_at = now(), available_for_swap = FALSE, available_for_sale = FALSE
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn item_history(&self, item_id: Id) -> RepoResult<Vec<HistoryEvent>> {
        // existence check first so a bad id is NotFound, not an empty list
        sqlx::query("SELECT id FROM wardrobe_items WHERE id = $1")
            .bind(item_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        let rows = sqlx::query(
            "SELECT * FROM item_history WHERE item_id = $1 ORDER BY created_at, id",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter()
            .map(|r| {
                let kind: String = r.get("kind");
                Ok(HistoryEvent {
                    id: r.get("id"),
                    item_id: r.get("item_id"),
                    kind: HistoryKind::parse(&kind)
                        .ok_or_else(|| RepoError::Internal(format!("bad history kind '{kind}'")))?,
                    note: r.get("note"),
                    created_at: r.get("created_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl SwapRepo for PgRepo {
    async fn create_swap(&self, requester_id: Id, new: NewSwapRequest) -> RepoResult<SwapRequest> {
        let requester_item = self.get_item(new.requester_item_id).await?;
        let target_item = self.get_item(new.target_item_id).await?;
        lifecycle::validate_create(requester_id, &requester_item, &target_item)?;

        let now = Utc::now();
        let rows = sqlx::query(
            "SELECT * FROM swap_requests WHERE requester_item_id = $1 AND target_item_id = $2",
        )
        .bind(new.requester_item_id)
        .bind(new.target_item_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        let prior: Vec<SwapRequest> = rows
            .iter()
            .map(swap_from_row)
            .collect::<RepoResult<_>>()?;
        lifecycle::validate_pair_history(&prior, now)?;

        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query(
            r#"
            INSERT INTO swap_requests
                (requester_id, requester_item_id, target_id, target_item_id, message, expires_at)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING *
            "#,
        )
        .bind(requester_id)
        .bind(new.requester_item_id)
        .bind(target_item.owner_id)
        .bind(new.target_item_id)
        .bind(&new.message)
        .bind(lifecycle::expires_at(now))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // partial unique index catches the create/create race
            if e.as_database_error()
                .and_then(|d| d.code())
                .map_or(false, |c| c == "23505")
            {
                RepoError::conflict("an active swap request already exists for this item pair")
            } else {
                internal(e)
            }
        })?;
        let swap = swap_from_row(&row)?;
        if let Some(content) = &new.message {
            sqlx::query("INSERT INTO messages (swap_id, sender_id, content) VALUES ($1,$2,$3)")
                .bind(swap.id)
                .bind(requester_id)
                .bind(content)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
        }
        tx.commit().await.map_err(internal)?;
        self.notify(
            target_item.owner_id,
            NotificationKind::SwapRequest,
            &format!("New swap request for \"{}\"", target_item.title),
            Some(swap.id),
            None,
        )
        .await?;
        Ok(swap)
    }

    async fn get_swap(&self, id: Id) -> RepoResult<SwapRequest> {
        let row = sqlx::query("SELECT * FROM swap_requests WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        swap_from_row(&row)
    }

    async fn list_swaps_for_user(&self, user_id: Id) -> RepoResult<Vec<SwapRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM swap_requests WHERE requester_id = $1 OR target_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(swap_from_row).collect()
    }

    async fn act_on_swap(
        &self,
        id: Id,
        actor_id: Id,
        action: SwapAction,
    ) -> RepoResult<SwapRequest> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query("SELECT * FROM swap_requests WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
        let swap = swap_from_row(&row)?;
        if !swap.is_participant(actor_id) {
            return Err(RepoError::NotFound);
        }
        let now = Utc::now();

        match action {
            SwapAction::Accept | SwapAction::Reject => {
                lifecycle::validate_accept_or_reject(&swap, actor_id)?;
                let latency = lifecycle::response_latency_hours(&swap, now);
                let (status, terminated): (&str, Option<DateTime<Utc>>) =
                    if matches!(action, SwapAction::Accept) {
                        ("ACCEPTED", None)
                    } else {
                        ("REJECTED", Some(now))
                    };
                sqlx::query(
                    "UPDATE swap_requests SET status = $2, responded_at = $3, terminated_at = $4 WHERE id = $1",
                )
                .bind(id)
                .bind(status)
                .bind(now)
                .bind(terminated)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                sqlx::query(
                    "UPDATE users SET response_count = response_count + 1, response_hours_sum = response_hours_sum + $2 WHERE id = $1",
                )
                .bind(actor_id)
                .bind(latency)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                tx.commit().await.map_err(internal)?;
                let body = if status == "ACCEPTED" {
                    "Your swap request was accepted"
                } else {
                    "Your swap request was declined"
                };
                self.notify(
                    swap.counterparty(actor_id),
                    NotificationKind::SwapUpdate,
                    body,
                    Some(id),
                    None,
                )
                .await?;
            }
            SwapAction::Cancel => {
                lifecycle::validate_cancel(&swap, actor_id)?;
                sqlx::query(
                    "UPDATE swap_requests SET status = 'CANCELLED', terminated_at = $2 WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                tx.commit().await.map_err(internal)?;
                self.notify(
                    swap.target_id,
                    NotificationKind::SwapUpdate,
                    "A swap request was withdrawn",
                    Some(id),
                    None,
                )
                .await?;
            }
            SwapAction::Counter { counter_item_id } => {
                let counter_item = self.get_item(counter_item_id).await?;
                lifecycle::validate_counter(&swap, actor_id, &counter_item)?;
                let latency = lifecycle::response_latency_hours(&swap, now);
                sqlx::query(
                    r#"
                    UPDATE swap_requests
                    SET status = 'COUNTERED', target_item_id = $2,
                        responder_is_requester = TRUE, responded_at = $3
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(counter_item_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                sqlx::query(
                    "UPDATE users SET response_count = response_count + 1, response_hours_sum = response_hours_sum + $2 WHERE id = $1",
                )
                .bind(actor_id)
                .bind(latency)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                tx.commit().await.map_err(internal)?;
                self.notify(
                    swap.requester_id,
                    NotificationKind::SwapUpdate,
                    &format!("Counter-offer: \"{}\"", counter_item.title),
                    Some(id),
                    None,
                )
                .await?;
            }
            SwapAction::Confirm => {
                let completes = lifecycle::validate_confirm(&swap, actor_id)?;
                let confirm_col = if actor_id == swap.requester_id {
                    "requester_confirmed"
                } else {
                    "target_confirmed"
                };
                sqlx::query(&format!(
                    "UPDATE swap_requests SET {confirm_col} = TRUE WHERE id = $1"
                ))
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                if completes {
                    sqlx::query(
                        "UPDATE swap_requests SET status = 'COMPLETED', completed_at = $2, terminated_at = $2 WHERE id = $1",
                    )
                    .bind(id)
                    .bind(now)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                    for (item_id, new_owner) in [
                        (swap.requester_item_id, swap.target_id),
                        (swap.target_item_id, swap.requester_id),
                    ] {
                        sqlx::query(
                            r#"
                            UPDATE wardrobe_items
                            SET owner_id = $2, available_for_swap = FALSE,
                                swap_count = swap_count + 1, updated_at = $3
                            WHERE id = $1
                            "#,
                        )
                        .bind(item_id)
                        .bind(new_owner)
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .map_err(internal)?;
                        sqlx::query("INSERT INTO item_history (item_id, kind) VALUES ($1, 'SWAP')")
                            .bind(item_id)
                            .execute(&mut *tx)
                            .await
                            .map_err(internal)?;
                    }
                    for uid in [swap.requester_id, swap.target_id] {
                        sqlx::query(
                            "UPDATE users SET completed_swap_count = completed_swap_count + 1 WHERE id = $1",
                        )
                        .bind(uid)
                        .execute(&mut *tx)
                        .await
                        .map_err(internal)?;
                        sqlx::query(
                            "INSERT INTO notifications (user_id, kind, body, swap_id, due_at) VALUES ($1,'RATING_PROMPT',$2,$3,$4)",
                        )
                        .bind(uid)
                        .bind("How did your swap go? Leave a rating")
                        .bind(id)
                        .bind(now + Duration::hours(lifecycle::RATING_PROMPT_DELAY_HOURS))
                        .execute(&mut *tx)
                        .await
                        .map_err(internal)?;
                    }
                }
                tx.commit().await.map_err(internal)?;
            }
        }

        self.get_swap(id).await
    }

    async fn run_sweep(&self, now: DateTime<Utc>) -> RepoResult<SweepReport> {
        let mut report = SweepReport::default();

        let res = sqlx::query(
            r#"
            UPDATE swap_requests
            SET status = 'EXPIRED', terminated_at = $1
            WHERE status IN ('PENDING','COUNTERED') AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        report.expired_swaps = res.rows_affected() as usize;

        // purged_threads counts threads, not deleted message rows
        let purge_cutoff = now - Duration::days(lifecycle::THREAD_PURGE_DAYS);
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT s.id FROM swap_requests s
            JOIN messages m ON m.swap_id = s.id
            WHERE s.terminated_at IS NOT NULL AND s.terminated_at <= $1
            "#,
        )
        .bind(purge_cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        let purgeable: Vec<Id> = rows.iter().map(|r| r.get("id")).collect();
        if !purgeable.is_empty() {
            sqlx::query("DELETE FROM messages WHERE swap_id = ANY($1)")
                .bind(&purgeable)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
        }
        report.purged_threads = purgeable.len();

        // archived = terminated past the archive cutoff but not yet purgeable
        let archive_cutoff = now - Duration::days(lifecycle::THREAD_ARCHIVE_DAYS);
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM swap_requests
            WHERE terminated_at IS NOT NULL AND terminated_at <= $1 AND terminated_at > $2
            "#,
        )
        .bind(archive_cutoff)
        .bind(purge_cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        let archived: i64 = row.get("n");
        report.archived_threads = archived as usize;

        // rating prompt reminders, capped at MAX_RATING_REMINDERS
        let due = sqlx::query(
            "SELECT * FROM notifications WHERE kind = 'RATING_PROMPT' AND due_at IS NOT NULL AND due_at <= $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        for row in &due {
            let n = notification_from_row(row)?;
            let rated = match n.swap_id {
                Some(sid) => {
                    let r = sqlx::query(
                        "SELECT COUNT(*) AS n FROM ratings WHERE swap_id = $1 AND reviewer_id = $2",
                    )
                    .bind(sid)
                    .bind(n.user_id)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(internal)?;
                    let count: i64 = r.get("n");
                    count > 0
                }
                None => false,
            };
            if rated {
                sqlx::query("UPDATE notifications SET read = TRUE, due_at = NULL WHERE id = $1")
                    .bind(n.id)
                    .execute(&self.pool)
                    .await
                    .map_err(internal)?;
            } else if n.reminders_sent < lifecycle::MAX_RATING_REMINDERS {
                sqlx::query(
                    "UPDATE notifications SET reminders_sent = reminders_sent + 1, read = FALSE, due_at = $2 WHERE id = $1",
                )
                .bind(n.id)
                .bind(now + Duration::hours(lifecycle::RATING_PROMPT_DELAY_HOURS))
                .execute(&self.pool)
                .await
                .map_err(internal)?;
                report.rating_reminders += 1;
            } else {
                sqlx::query("UPDATE notifications SET due_at = NULL WHERE id = $1")
                    .bind(n.id)
                    .execute(&self.pool)
                    .await
                    .map_err(internal)?;
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl MessageRepo for PgRepo {
    async fn post_message(
        &self,
        swap_id: Id,
        sender_id: Id,
        content: String,
    ) -> RepoResult<Message> {
        let swap = self.get_swap(swap_id).await?;
        if !swap.is_participant(sender_id) {
            return Err(RepoError::Forbidden);
        }
        if lifecycle::thread_archived(&swap, Utc::now()) {
            return Err(RepoError::conflict("thread is archived"));
        }
        let row = sqlx::query(
            "INSERT INTO messages (swap_id, sender_id, content) VALUES ($1,$2,$3) RETURNING *",
        )
        .bind(swap_id)
        .bind(sender_id)
        .bind(&content)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(message_from_row(&row))
    }

    async fn list_messages(&self, swap_id: Id, reader_id: Id) -> RepoResult<Vec<Message>> {
        let swap = self.get_swap(swap_id).await?;
        if !swap.is_participant(reader_id) {
            return Err(RepoError::Forbidden);
        }
        let rows = sqlx::query("SELECT * FROM messages WHERE swap_id = $1 ORDER BY created_at, id")
            .bind(swap_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
        Ok(rows.iter().map(message_from_row).collect())
    }

    async fn mark_read(&self, message_id: Id, reader_id: Id) -> RepoResult<()> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        let msg = message_from_row(&row);
        let swap = self.get_swap(msg.swap_id).await?;
        if !swap.is_participant(reader_id) {
            return Err(RepoError::Forbidden);
        }
        if msg.sender_id != reader_id {
            sqlx::query("UPDATE messages SET read = TRUE WHERE id = $1")
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
        }
        Ok(())
    }
}

#[async_trait]
impl RatingRepo for PgRepo {
    async fn submit_rating(
        &self,
        swap_id: Id,
        reviewer_id: Id,
        score: i32,
        review: Option<String>,
    ) -> RepoResult<Rating> {
        let swap = self.get_swap(swap_id).await?;
        if !swap.is_participant(reviewer_id) {
            return Err(RepoError::Forbidden);
        }
        if swap.status != SwapStatus::Completed {
            return Err(RepoError::conflict("swap is not completed"));
        }
        if !(1..=5).contains(&score) {
            return Err(RepoError::validation("score", "must be an integer from 1 to 5"));
        }
        let reviewee_id = swap.counterparty(reviewer_id);
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let row = sqlx::query(
            r#"
            INSERT INTO ratings (swap_id, reviewer_id, reviewee_id, score, review)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING *
            "#,
        )
        .bind(swap_id)
        .bind(reviewer_id)
        .bind(reviewee_id)
        .bind(score)
        .bind(&review)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .and_then(|d| d.code())
                .map_or(false, |c| c == "23505")
            {
                RepoError::conflict("rating already submitted for this swap")
            } else {
                internal(e)
            }
        })?;
        sqlx::query(
            "UPDATE users SET rating_count = rating_count + 1, rating_sum = rating_sum + $2 WHERE id = $1",
        )
        .bind(reviewee_id)
        .bind(score as i64)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        sqlx::query(
            "UPDATE notifications SET read = TRUE, due_at = NULL WHERE kind = 'RATING_PROMPT' AND swap_id = $1 AND user_id = $2",
        )
        .bind(swap_id)
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        tx.commit().await.map_err(internal)?;
        Ok(rating_from_row(&row))
    }

    async fn list_ratings_for_user(&self, user_id: Id) -> RepoResult<Vec<Rating>> {
        let rows = sqlx::query(
            "SELECT * FROM ratings WHERE reviewee_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        Ok(rows.iter().map(rating_from_row).collect())
    }
}

#[async_trait]
impl CreatorRepo for PgRepo {
    async fn onboard_creator(
        &self,
        user_id: Id,
        stripe_account_id: String,
    ) -> RepoResult<CreatorProfile> {
        let row = sqlx::query(
            r#"
            INSERT INTO creator_profiles (user_id, stripe_account_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET user_id = EXCLUDED.user_id
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(&stripe_account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(creator_from_row(&row))
    }

    async fn get_creator(&self, user_id: Id) -> RepoResult<CreatorProfile> {
        let row = sqlx::query("SELECT * FROM creator_profiles WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        Ok(creator_from_row(&row))
    }

    async fn create_promotion(&self, user_id: Id, new: NewPromotion) -> RepoResult<Promotion> {
        let profile = self.get_creator(user_id).await?;
        if !(1..=90).contains(&new.percent_off) {
            return Err(RepoError::validation("percent_off", "must be between 1 and 90"));
        }
        let code = new
            .code
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase());
        let row = sqlx::query(
            r#"
            INSERT INTO promotions (creator_id, code, percent_off, max_uses, expires_at)
            VALUES ($1,$2,$3,$4,$5)
            RETURNING *
            "#,
        )
        .bind(profile.id)
        .bind(&code)
        .bind(new.percent_off)
        .bind(new.max_uses)
        .bind(new.expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.as_database_error()
                .and_then(|d| d.code())
                .map_or(false, |c| c == "23505")
            {
                RepoError::conflict("promotion code already exists")
            } else {
                internal(e)
            }
        })?;
        Ok(promotion_from_row(&row))
    }

    async fn list_promotions(&self, user_id: Id) -> RepoResult<Vec<Promotion>> {
        let profile = self.get_creator(user_id).await?;
        let rows = sqlx::query(
            "SELECT * FROM promotions WHERE creator_id = $1 ORDER BY created_at",
        )
        .bind(profile.id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        Ok(rows.iter().map(promotion_from_row).collect())
    }

    async fn record_sale(
        &self,
        creator_user_id: Id,
        item_id: Id,
        buyer_id: Id,
        promo_code: Option<String>,
    ) -> RepoResult<SaleRecord> {
        if buyer_id == creator_user_id {
            return Err(RepoError::validation("buyer", "cannot buy your own item"));
        }
        self.get_user(buyer_id).await?;
        let mut tx = self.pool.begin().await.map_err(internal)?;
        // FOR UPDATE serializes concurrent sales at a tier boundary
        let row = sqlx::query("SELECT * FROM creator_profiles WHERE user_id = $1 FOR UPDATE")
            .bind(creator_user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(internal)?;
        let profile = creator_from_row(&row);
        let row = sqlx::query(
            "SELECT * FROM wardrobe_items WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
        )
        .bind(item_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        let item = item_from_row(&row);
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
                let row = sqlx::query(
                    "SELECT * FROM promotions WHERE creator_id = $1 AND code = $2 FOR UPDATE",
                )
                .bind(profile.id)
                .bind(&code)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?
                .ok_or_else(|| RepoError::validation("promo_code", "unknown promotion code"))?;
                let promo = promotion_from_row(&row);
                if promo.expires_at.map_or(false, |e| e < now) {
                    return Err(RepoError::validation("promo_code", "promotion has expired"));
                }
                if promo.max_uses.map_or(false, |m| promo.uses >= m) {
                    return Err(RepoError::validation("promo_code", "promotion is exhausted"));
                }
                sqlx::query("UPDATE promotions SET uses = uses + 1 WHERE id = $1")
                    .bind(promo.id)
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                commission::discounted_price_cents(base_price, promo.percent_off)
            }
            None => base_price,
        };

        let rate_bps = commission::commission_rate_bps(profile.total_sales);
        let earnings = commission::creator_earnings_cents(price_cents, rate_bps);

        let row = sqlx::query(
            r#"
            INSERT INTO sales (creator_id, item_id, buyer_id, price_cents, commission_rate_bps, earnings_cents)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING *
            "#,
        )
        .bind(profile.id)
        .bind(item_id)
        .bind(buyer_id)
        .bind(price_cents)
        .bind(rate_bps)
        .bind(earnings)
        .fetch_one(&mut *tx)
        .await
        .map_err(internal)?;
        sqlx::query(
            r#"
            UPDATE creator_profiles
            SET total_sales = total_sales + 1,
                total_revenue_cents = total_revenue_cents + $2,
                balance_cents = balance_cents + $3
            WHERE user_id = $1
            "#,
        )
        .bind(creator_user_id)
        .bind(price_cents)
        .bind(earnings)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        sqlx::query(
            r#"
            UPDATE wardrobe_items
            SET owner_id = $2, available_for_sale = FALSE, available_for_swap = FALSE, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(buyer_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(internal)?;
        sqlx::query("INSERT INTO item_history (item_id, kind) VALUES ($1, 'SALE')")
            .bind(item_id)
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
        tx.commit().await.map_err(internal)?;

        let sale = SaleRecord {
            id: row.get("id"),
            creator_id: row.get("creator_id"),
            item_id: row.get("item_id"),
            buyer_id: row.get("buyer_id"),
            price_cents: row.get("price_cents"),
            commission_rate_bps: row.get("commission_rate_bps"),
            earnings_cents: row.get("earnings_cents"),
            created_at: row.get("created_at"),
        };
        Ok(sale)
    }

    async fn run_payouts(&self) -> RepoResult<Vec<PayoutRecord>> {
        let mut tx = self.pool.begin().await.map_err(internal)?;
        let rows = sqlx::query(
            "SELECT * FROM creator_profiles WHERE balance_cents >= $1 FOR UPDATE",
        )
        .bind(commission::PAYOUT_MINIMUM_CENTS)
        .fetch_all(&mut *tx)
        .await
        .map_err(internal)?;
        let mut payouts = Vec::new();
        for row in &rows {
            let profile = creator_from_row(row);
            sqlx::query("UPDATE creator_profiles SET balance_cents = 0 WHERE id = $1")
                .bind(profile.id)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            let amount = profile.balance_cents;
            sqlx::query(
                "INSERT INTO notifications (user_id, kind, body) VALUES ($1, 'PAYOUT', $2)",
            )
            .bind(profile.user_id)
            .bind(format!(
                "Payout of ${}.{:02} on its way",
                amount / 100,
                amount % 100
            ))
            .execute(&mut *tx)
            .await
            .map_err(internal)?;
            payouts.push(PayoutRecord {
                user_id: profile.user_id,
                amount_cents: amount,
            });
        }
        tx.commit().await.map_err(internal)?;
        Ok(payouts)
    }

    async fn get_store(
        &self,
        creator_user_id: Id,
    ) -> RepoResult<(CreatorProfile, Vec<WardrobeItem>)> {
        let profile = self.get_creator(creator_user_id).await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM wardrobe_items
            WHERE owner_id = $1 AND deleted_at IS NULL AND available_for_sale
            ORDER BY created_at DESC
            "#,
        )
        .bind(creator_user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        let mut items: Vec<WardrobeItem> = rows.iter().map(item_from_row).collect();
        self.attach_images(&mut items).await?;
        Ok((profile, items))
    }
}

#[async_trait]
impl CollectionRepo for PgRepo {
    async fn list_collections(&self, viewer_id: Option<Id>) -> RepoResult<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT * FROM collections WHERE public OR owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(viewer_id.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        Ok(rows.iter().map(collection_from_row).collect())
    }

    async fn create_collection(&self, owner_id: Id, new: NewCollection) -> RepoResult<Collection> {
        for item_id in &new.item_ids {
            self.get_item(*item_id)
                .await
                .map_err(|_| RepoError::validation("item_ids", "unknown item reference"))?;
        }
        let row = sqlx::query(
            r#"
            INSERT INTO collections (owner_id, name, description, public, cover_image_url, item_ids)
            VALUES ($1,$2,$3,$4,$5,$6)
            RETURNING *
            "#,
        )
        .bind(owner_id)
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.public)
        .bind(&new.cover_image_url)
        .bind(&new.item_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(collection_from_row(&row))
    }

    async fn get_collection(&self, id: Id, viewer_id: Option<Id>) -> RepoResult<Collection> {
        let row = sqlx::query("SELECT * FROM collections WHERE id = $1")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
        let col = collection_from_row(&row);
        if !col.public && viewer_id != Some(col.owner_id) {
            return Err(RepoError::NotFound);
        }
        Ok(col)
    }

    async fn update_collection(
        &self,
        id: Id,
        owner_id: Id,
        upd: UpdateCollection,
    ) -> RepoResult<Collection> {
        let current = self.get_collection(id, Some(owner_id)).await?;
        if current.owner_id != owner_id {
            return Err(RepoError::NotFound);
        }
        if let Some(ids) = &upd.item_ids {
            for item_id in ids {
                self.get_item(*item_id)
                    .await
                    .map_err(|_| RepoError::validation("item_ids", "unknown item reference"))?;
            }
        }
        let row = sqlx::query(
            r#"
            UPDATE collections SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                public = COALESCE($4, public),
                cover_image_url = COALESCE($5, cover_image_url),
                item_ids = COALESCE($6, item_ids),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(upd.name)
        .bind(upd.description)
        .bind(upd.public)
        .bind(upd.cover_image_url)
        .bind(upd.item_ids)
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;
        Ok(collection_from_row(&row))
    }

    async fn delete_collection(&self, id: Id, owner_id: Id) -> RepoResult<()> {
        let current = self.get_collection(id, Some(owner_id)).await?;
        if current.owner_id != owner_id {
            return Err(RepoError::NotFound);
        }
        sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }
}

#[async_trait]
impl NotificationRepo for PgRepo {
    async fn list_notifications(&self, user_id: Id) -> RepoResult<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM notifications
            WHERE user_id = $1 AND (due_at IS NULL OR due_at <= now())
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;
        rows.iter().map(notification_from_row).collect()
    }

    async fn mark_notification_read(&self, id: Id, user_id: Id) -> RepoResult<()> {
        let res = sqlx::query("UPDATE notifications SET read = TRUE WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        if res.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
