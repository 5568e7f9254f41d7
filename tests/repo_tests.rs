#![cfg(feature = "inmem-store")]

use chrono::{Duration, Utc};
use serial_test::serial;
use threadswap::models::*;
use threadswap::repo::inmem::InMemRepo;
use threadswap::repo::{
    CollectionRepo, CreatorRepo, MessageRepo, NotificationRepo, RatingRepo, RepoError, SwapRepo,
    UserRepo, WardrobeRepo,
};

fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
    let tmp = tempfile::tempdir().unwrap();
    std::env::set_var("THREADSWAP_DATA_DIR", tmp.into_path().to_str().unwrap());
}

async fn new_user(repo: &InMemRepo, subject: &str, name: &str) -> User {
    repo.upsert_user(NewUser {
        subject: subject.into(),
        email: format!("{name}@example.com"),
        display_name: name.into(),
        avatar_url: None,
    })
    .await
    .unwrap()
}

fn swap_item(title: &str) -> NewWardrobeItem {
    NewWardrobeItem {
        title: title.into(),
        description: String::new(),
        category: "outerwear".into(),
        size: "M".into(),
        condition: "good".into(),
        colors: vec!["blue".into()],
        tags: vec!["vintage".into()],
        available_for_swap: true,
        available_for_sale: false,
        sale_price_cents: None,
        images: vec![],
    }
}

fn sale_item(title: &str, price: i64) -> NewWardrobeItem {
    NewWardrobeItem {
        available_for_swap: false,
        available_for_sale: true,
        sale_price_cents: Some(price),
        ..swap_item(title)
    }
}

/// Sets up two users with one swappable item each and a PENDING request
/// from a's item to b's item.
async fn pending_swap(repo: &InMemRepo) -> (User, User, WardrobeItem, WardrobeItem, SwapRequest) {
    let a = new_user(repo, "google:a", "alice").await;
    let b = new_user(repo, "google:b", "bob").await;
    let item_a = repo.create_item(a.id, swap_item("denim jacket")).await.unwrap();
    let item_b = repo.create_item(b.id, swap_item("wool coat")).await.unwrap();
    let swap = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: item_a.id,
                target_item_id: item_b.id,
                message: Some("interested?".into()),
            },
        )
        .await
        .unwrap();
    (a, b, item_a, item_b, swap)
}

#[actix_rt::test]
#[serial]
async fn wardrobe_crud_and_filtering() {
    setup_env();
    let repo = InMemRepo::new();
    let a = new_user(&repo, "google:a", "alice").await;

    let item = repo.create_item(a.id, swap_item("denim jacket")).await.unwrap();
    assert_eq!(item.swap_count, 0);

    // UPLOAD history written on create
    let history = repo.item_history(item.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, HistoryKind::Upload);

    // filter hits and misses
    let hits = repo
        .list_items(WardrobeFilter {
            category: Some("outerwear".into()),
            color: Some("blue".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let misses = repo
        .list_items(WardrobeFilter {
            q: Some("ballgown".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(misses.is_empty());

    // owner-checked update; strangers get NotFound, not Forbidden
    let b = new_user(&repo, "google:b", "bob").await;
    let err = repo
        .update_item(item.id, b.id, UpdateWardrobeItem::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    // REPAIR event lands in the history
    let upd = UpdateWardrobeItem {
        history_event: Some(HistoryKind::Repair),
        history_note: Some("new zipper".into()),
        ..Default::default()
    };
    repo.update_item(item.id, a.id, upd).await.unwrap();
    let history = repo.item_history(item.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].kind, HistoryKind::Repair);

    // soft delete hides the item from reads and listings
    repo.delete_item(item.id, a.id).await.unwrap();
    assert!(matches!(
        repo.get_item(item.id).await.unwrap_err(),
        RepoError::NotFound
    ));
    assert_eq!(repo.count_active_items(a.id).await.unwrap(), 0);
}

#[actix_rt::test]
#[serial]
async fn swap_create_validations() {
    setup_env();
    let repo = InMemRepo::new();
    let a = new_user(&repo, "google:a", "alice").await;
    let b = new_user(&repo, "google:b", "bob").await;
    let mine = repo.create_item(a.id, swap_item("jacket")).await.unwrap();
    let also_mine = repo.create_item(a.id, swap_item("scarf")).await.unwrap();
    let unavailable = repo
        .create_item(
            b.id,
            NewWardrobeItem {
                available_for_swap: false,
                ..swap_item("coat")
            },
        )
        .await
        .unwrap();

    // own target item
    let err = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: mine.id,
                target_item_id: also_mine.id,
                message: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { .. }));

    // unavailable target
    let err = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: mine.id,
                target_item_id: unavailable.id,
                message: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
}

#[actix_rt::test]
#[serial]
async fn one_active_request_per_item_pair() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, _b, item_a, item_b, _swap) = pending_swap(&repo).await;

    let err = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: item_a.id,
                target_item_id: item_b.id,
                message: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
}

#[actix_rt::test]
#[serial]
async fn rejected_request_enforces_cooldown() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, item_a, item_b, swap) = pending_swap(&repo).await;

    repo.act_on_swap(swap.id, b.id, SwapAction::Reject).await.unwrap();

    // immediate retry blocked by the 24h cooldown
    let err = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: item_a.id,
                target_item_id: item_b.id,
                message: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
}

#[actix_rt::test]
#[serial]
async fn terminal_requests_are_immutable() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;

    repo.act_on_swap(swap.id, b.id, SwapAction::Reject).await.unwrap();
    for (actor, action) in [
        (b.id, SwapAction::Accept),
        (a.id, SwapAction::Cancel),
        (a.id, SwapAction::Confirm),
    ] {
        let err = repo.act_on_swap(swap.id, actor, action).await.unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }
    let after = repo.get_swap(swap.id).await.unwrap();
    assert_eq!(after.status, SwapStatus::Rejected);
}

#[actix_rt::test]
#[serial]
async fn counter_offer_flips_responder() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;
    let other_b_item = repo.create_item(b.id, swap_item("leather boots")).await.unwrap();

    let countered = repo
        .act_on_swap(
            swap.id,
            b.id,
            SwapAction::Counter {
                counter_item_id: other_b_item.id,
            },
        )
        .await
        .unwrap();
    assert_eq!(countered.status, SwapStatus::Countered);
    assert_eq!(countered.target_item_id, other_b_item.id);
    assert_eq!(countered.responder_id(), a.id);

    // now only the original requester may accept
    let err = repo
        .act_on_swap(swap.id, b.id, SwapAction::Accept)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
    let accepted = repo.act_on_swap(swap.id, a.id, SwapAction::Accept).await.unwrap();
    assert_eq!(accepted.status, SwapStatus::Accepted);
}

#[actix_rt::test]
#[serial]
async fn completion_transfers_ownership_atomically() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, item_a, item_b, swap) = pending_swap(&repo).await;

    repo.act_on_swap(swap.id, b.id, SwapAction::Accept).await.unwrap();
    let first = repo.act_on_swap(swap.id, a.id, SwapAction::Confirm).await.unwrap();
    assert_eq!(first.status, SwapStatus::Accepted);

    // duplicate confirm from the same party conflicts
    let err = repo
        .act_on_swap(swap.id, a.id, SwapAction::Confirm)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));

    let done = repo.act_on_swap(swap.id, b.id, SwapAction::Confirm).await.unwrap();
    assert_eq!(done.status, SwapStatus::Completed);
    assert!(done.completed_at.is_some());

    let item_a_after = repo.get_item(item_a.id).await.unwrap();
    let item_b_after = repo.get_item(item_b.id).await.unwrap();
    assert_eq!(item_a_after.owner_id, b.id);
    assert_eq!(item_b_after.owner_id, a.id);
    assert!(!item_a_after.available_for_swap);
    assert!(!item_b_after.available_for_swap);
    assert_eq!(item_a_after.swap_count, 1);
    assert_eq!(item_b_after.swap_count, 1);

    // SWAP history on both items
    let h = repo.item_history(item_a.id).await.unwrap();
    assert_eq!(h.last().unwrap().kind, HistoryKind::Swap);

    // both participants' completed counters moved
    assert_eq!(repo.get_user(a.id).await.unwrap().completed_swap_count, 1);
    assert_eq!(repo.get_user(b.id).await.unwrap().completed_swap_count, 1);
}

#[actix_rt::test]
#[serial]
async fn sweep_expires_stale_requests_idempotently() {
    setup_env();
    let repo = InMemRepo::new();
    let (_a, _b, _item_a, _item_b, swap) = pending_swap(&repo).await;

    let later = Utc::now() + Duration::days(8);
    let report = repo.run_sweep(later).await.unwrap();
    assert_eq!(report.expired_swaps, 1);
    assert_eq!(
        repo.get_swap(swap.id).await.unwrap().status,
        SwapStatus::Expired
    );

    // second run is a no-op
    let report = repo.run_sweep(later).await.unwrap();
    assert_eq!(report.expired_swaps, 0);
}

#[actix_rt::test]
#[serial]
async fn sweep_purges_old_threads() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;
    repo.post_message(swap.id, b.id, "let me think".into()).await.unwrap();
    repo.act_on_swap(swap.id, b.id, SwapAction::Reject).await.unwrap();

    // a second terminated request whose thread never had a message
    let item_c = repo.create_item(a.id, swap_item("felt hat")).await.unwrap();
    let item_d = repo.create_item(b.id, swap_item("rain boots")).await.unwrap();
    let silent = repo
        .create_swap(
            a.id,
            NewSwapRequest {
                requester_item_id: item_c.id,
                target_item_id: item_d.id,
                message: None,
            },
        )
        .await
        .unwrap();
    repo.act_on_swap(silent.id, b.id, SwapAction::Reject).await.unwrap();

    // past archive but short of purge: counted, not deleted
    let report = repo.run_sweep(Utc::now() + Duration::days(40)).await.unwrap();
    assert_eq!(report.archived_threads, 2);
    assert_eq!(report.purged_threads, 0);
    assert!(!repo.list_messages(swap.id, a.id).await.unwrap().is_empty());

    // past the 120 day retention: one purged thread even though it held two
    // messages, and the message-less thread is not counted
    let report = repo.run_sweep(Utc::now() + Duration::days(130)).await.unwrap();
    assert_eq!(report.purged_threads, 1);
    assert_eq!(report.archived_threads, 0);
    assert!(repo.list_messages(swap.id, a.id).await.unwrap().is_empty());
}

#[actix_rt::test]
#[serial]
async fn disabling_a_user_is_sticky_until_reenabled() {
    setup_env();
    let repo = InMemRepo::new();
    let a = new_user(&repo, "google:a", "alice").await;
    assert!(a.disabled_at.is_none());

    let disabled = repo.set_user_disabled(a.id, true).await.unwrap();
    assert!(disabled.disabled_at.is_some());

    // logging in again does not clear the flag
    let again = new_user(&repo, "google:a", "alice").await;
    assert!(again.disabled_at.is_some());

    let enabled = repo.set_user_disabled(a.id, false).await.unwrap();
    assert!(enabled.disabled_at.is_none());

    assert!(matches!(
        repo.set_user_disabled(9999, true).await.unwrap_err(),
        RepoError::NotFound
    ));
}

#[actix_rt::test]
#[serial]
async fn rating_prompts_remind_at_most_twice() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;
    repo.act_on_swap(swap.id, b.id, SwapAction::Accept).await.unwrap();
    repo.act_on_swap(swap.id, a.id, SwapAction::Confirm).await.unwrap();
    repo.act_on_swap(swap.id, b.id, SwapAction::Confirm).await.unwrap();

    // prompt deferred 24h: not listed immediately
    let notes = repo.list_notifications(a.id).await.unwrap();
    assert!(notes.iter().all(|n| n.kind != NotificationKind::RatingPrompt));

    // two reminders fire, then the prompt goes quiet
    let r1 = repo.run_sweep(Utc::now() + Duration::days(2)).await.unwrap();
    assert_eq!(r1.rating_reminders, 2); // one per participant
    let r2 = repo.run_sweep(Utc::now() + Duration::days(4)).await.unwrap();
    assert_eq!(r2.rating_reminders, 2);
    let r3 = repo.run_sweep(Utc::now() + Duration::days(6)).await.unwrap();
    assert_eq!(r3.rating_reminders, 0);
}

#[actix_rt::test]
#[serial]
async fn messaging_rules() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;

    // opening message became the first thread entry
    let thread = repo.list_messages(swap.id, a.id).await.unwrap();
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].content, "interested?");

    let outsider = new_user(&repo, "google:c", "carol").await;
    let err = repo
        .post_message(swap.id, outsider.id, "hello".into())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
    let err = repo.list_messages(swap.id, outsider.id).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));

    let msg = repo.post_message(swap.id, b.id, "tempting".into()).await.unwrap();
    assert!(!msg.read);
    // idempotent read marking by the counterparty
    repo.mark_read(msg.id, a.id).await.unwrap();
    repo.mark_read(msg.id, a.id).await.unwrap();
    let thread = repo.list_messages(swap.id, a.id).await.unwrap();
    assert!(thread.iter().find(|m| m.id == msg.id).unwrap().read);
}

#[actix_rt::test]
#[serial]
async fn rating_exactly_once_and_average() {
    setup_env();
    let repo = InMemRepo::new();
    let (a, b, _item_a, _item_b, swap) = pending_swap(&repo).await;

    // not completed yet
    let err = repo.submit_rating(swap.id, a.id, 5, None).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));

    repo.act_on_swap(swap.id, b.id, SwapAction::Accept).await.unwrap();
    repo.act_on_swap(swap.id, a.id, SwapAction::Confirm).await.unwrap();
    repo.act_on_swap(swap.id, b.id, SwapAction::Confirm).await.unwrap();

    let err = repo.submit_rating(swap.id, a.id, 9, None).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation { .. }));

    let rating = repo
        .submit_rating(swap.id, b.id, 5, Some("great jacket".into()))
        .await
        .unwrap();
    assert_eq!(rating.reviewee_id, a.id);
    let rated = repo.get_user(a.id).await.unwrap();
    assert_eq!(rated.rating_average(), Some(5.0));

    // duplicate leaves the average untouched
    let err = repo.submit_rating(swap.id, b.id, 1, None).await.unwrap_err();
    assert!(matches!(err, RepoError::Conflict(_)));
    assert_eq!(repo.get_user(a.id).await.unwrap().rating_average(), Some(5.0));

    // non-participant
    let outsider = new_user(&repo, "google:c", "carol").await;
    let err = repo.submit_rating(swap.id, outsider.id, 3, None).await.unwrap_err();
    assert!(matches!(err, RepoError::Forbidden));
}

#[actix_rt::test]
#[serial]
async fn commission_tier_boundary_on_50th_sale() {
    setup_env();
    let repo = InMemRepo::new();
    let creator = new_user(&repo, "google:c", "creator").await;
    repo.update_user(
        creator.id,
        UpdateUser {
            tier: Some(MembershipTier::Pro),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let buyer = new_user(&repo, "google:d", "buyer").await;
    repo.onboard_creator(creator.id, "acct_123".into()).await.unwrap();

    let mut last = None;
    for n in 0..51 {
        let item = repo
            .create_item(creator.id, sale_item(&format!("piece {n}"), 10_000))
            .await
            .unwrap();
        last = Some(
            repo.record_sale(creator.id, item.id, buyer.id, None)
                .await
                .unwrap(),
        );
        if n == 49 {
            // the 50th sale still pays the 15% tier (count was 49 before it)
            assert_eq!(last.as_ref().unwrap().commission_rate_bps, 1500);
            assert_eq!(last.as_ref().unwrap().earnings_cents, 8_500);
        }
    }
    // the 51st sale drops to 12%
    let last = last.unwrap();
    assert_eq!(last.commission_rate_bps, 1200);
    assert_eq!(last.earnings_cents, 8_800);

    let profile = repo.get_creator(creator.id).await.unwrap();
    assert_eq!(profile.total_sales, 51);
}

#[actix_rt::test]
#[serial]
async fn sale_applies_promotion_and_transfers_item() {
    setup_env();
    let repo = InMemRepo::new();
    let creator = new_user(&repo, "google:c", "creator").await;
    let buyer = new_user(&repo, "google:d", "buyer").await;
    repo.onboard_creator(creator.id, "acct_123".into()).await.unwrap();
    let promo = repo
        .create_promotion(
            creator.id,
            NewPromotion {
                code: Some("SPRING25".into()),
                percent_off: 25,
                max_uses: Some(1),
                expires_at: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(promo.code, "SPRING25");

    let item = repo.create_item(creator.id, sale_item("silk dress", 2_000)).await.unwrap();
    let sale = repo
        .record_sale(creator.id, item.id, buyer.id, Some("SPRING25".into()))
        .await
        .unwrap();
    assert_eq!(sale.price_cents, 1_500);
    assert_eq!(sale.earnings_cents, 1_275); // 15% commission on the discounted price

    let sold = repo.get_item(item.id).await.unwrap();
    assert_eq!(sold.owner_id, buyer.id);
    assert!(!sold.available_for_sale);
    let h = repo.item_history(item.id).await.unwrap();
    assert_eq!(h.last().unwrap().kind, HistoryKind::Sale);

    // single-use promotion is exhausted
    let item2 = repo.create_item(creator.id, sale_item("linen shirt", 2_000)).await.unwrap();
    let err = repo
        .record_sale(creator.id, item2.id, buyer.id, Some("SPRING25".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { .. }));
}

#[actix_rt::test]
#[serial]
async fn payouts_respect_threshold_and_reset_balance() {
    setup_env();
    let repo = InMemRepo::new();
    let creator = new_user(&repo, "google:c", "creator").await;
    let buyer = new_user(&repo, "google:d", "buyer").await;
    repo.onboard_creator(creator.id, "acct_123".into()).await.unwrap();

    // one small sale: balance below the $25 minimum rolls forward
    let item = repo.create_item(creator.id, sale_item("patch", 1_000)).await.unwrap();
    repo.record_sale(creator.id, item.id, buyer.id, None).await.unwrap();
    assert!(repo.run_payouts().await.unwrap().is_empty());

    let item = repo.create_item(creator.id, sale_item("jacket", 10_000)).await.unwrap();
    repo.record_sale(creator.id, item.id, buyer.id, None).await.unwrap();
    let payouts = repo.run_payouts().await.unwrap();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].amount_cents, 850 + 8_500);
    assert_eq!(repo.get_creator(creator.id).await.unwrap().balance_cents, 0);

    // idempotent when nothing new happened
    assert!(repo.run_payouts().await.unwrap().is_empty());
}

#[actix_rt::test]
#[serial]
async fn private_collections_hide_from_strangers() {
    setup_env();
    let repo = InMemRepo::new();
    let a = new_user(&repo, "google:a", "alice").await;
    let b = new_user(&repo, "google:b", "bob").await;
    let item = repo.create_item(a.id, swap_item("jacket")).await.unwrap();

    let col = repo
        .create_collection(
            a.id,
            NewCollection {
                name: "capsule".into(),
                description: None,
                public: false,
                cover_image_url: None,
                item_ids: vec![item.id],
            },
        )
        .await
        .unwrap();

    assert!(repo.get_collection(col.id, Some(a.id)).await.is_ok());
    assert!(matches!(
        repo.get_collection(col.id, Some(b.id)).await.unwrap_err(),
        RepoError::NotFound
    ));
    assert!(matches!(
        repo.get_collection(col.id, None).await.unwrap_err(),
        RepoError::NotFound
    ));

    // unknown item reference is a validation failure
    let err = repo
        .create_collection(
            a.id,
            NewCollection {
                name: "broken".into(),
                description: None,
                public: true,
                cover_image_url: None,
                item_ids: vec![9999],
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation { .. }));
}
