use super::*;
use chrono::TimeDelta;

use crate::config::{default_giveaways, Cadence};
use crate::fulfillment::RecordingFulfillment;
use crate::sampling::SeededRandom;
use crate::services::Ledger;
use crate::storage::MockEconomyStore;

const WEEKLY: &str = "weekly-credits";
const MONTHLY: &str = "monthly-gift-card";

struct Fixture {
    store: Arc<MockEconomyStore>,
    ledger: Ledger,
    service: Arc<GiveawayService>,
    fulfillment: Arc<RecordingFulfillment>,
}

async fn fixture(users: &[&str]) -> Fixture {
    let store = Arc::new(MockEconomyStore::new());
    let ledger = Ledger::new(store.clone());
    for user in users {
        ledger.open_account(user).await.unwrap();
        ledger.credit(user, 1000, "seed").await.unwrap();
    }
    let fulfillment = Arc::new(RecordingFulfillment::new());
    let service = Arc::new(GiveawayService::new(
        store.clone(),
        default_giveaways(),
        Arc::new(SeededRandom::new(7)),
        fulfillment.clone(),
    ));
    Fixture {
        store,
        ledger,
        service,
        fulfillment,
    }
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

#[tokio::test]
async fn test_free_entry_at_most_once() {
    let f = fixture(&["u1"]).await;
    let set = f.service.claim_free_entry("u1", WEEKLY).await.unwrap();
    assert_eq!(set.free, 1);
    assert!(matches!(
        f.service.claim_free_entry("u1", WEEKLY).await,
        Err(EconomyError::AlreadyRecorded(_))
    ));
    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_bonus_entries_are_capped() {
    let f = fixture(&["u1"]).await;
    for _ in 0..10 {
        f.service.add_bonus_entry("u1", WEEKLY).await.unwrap();
    }
    assert!(matches!(
        f.service.add_bonus_entry("u1", WEEKLY).await,
        Err(EconomyError::Validation(_))
    ));

    // silently ignored when granted as an earn bonus
    f.service.grant_earn_bonus("u1").await;
    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().bonus, 10);
    assert_eq!(f.service.entries("u1", MONTHLY).await.unwrap().bonus, 1);
}

#[tokio::test]
async fn test_buy_entries_debits_price() {
    let f = fixture(&["u1"]).await;
    let purchase = f.service.buy_entries("u1", WEEKLY, 4).await.unwrap();
    assert_eq!(purchase.entries.paid, 4);
    assert_eq!(purchase.balance.credits, 800);

    assert!(matches!(
        f.service.buy_entries("u1", WEEKLY, 17).await,
        Err(EconomyError::InsufficientBalance { requested: 850, available: 800 })
    ));
    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().paid, 4);
    assert!(matches!(
        f.service.buy_entries("u1", WEEKLY, 0).await,
        Err(EconomyError::Validation(_))
    ));
}

#[tokio::test]
async fn test_unknown_giveaway() {
    let f = fixture(&["u1"]).await;
    assert!(matches!(
        f.service.claim_free_entry("u1", "nope").await,
        Err(EconomyError::NotFound { .. })
    ));
    assert!(matches!(
        f.service.run_draw("nope").await,
        Err(EconomyError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_draw_with_no_participants_records_nothing() {
    let f = fixture(&["u1"]).await;
    assert!(matches!(
        f.service.run_draw(WEEKLY).await,
        Err(EconomyError::NoParticipants(_))
    ));
    assert!(f.service.draws(WEEKLY).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_credit_draw_archives_and_clears_entries() {
    let f = fixture(&["u1", "u2"]).await;
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();
    f.service.claim_free_entry("u2", WEEKLY).await.unwrap();
    f.service.buy_entries("u2", WEEKLY, 3).await.unwrap();

    let outcome = f.service.run_draw(WEEKLY).await.unwrap();
    let draw = &outcome.draw;
    assert_eq!(draw.total_entries, 5);
    assert_eq!(draw.participants, 2);
    assert_eq!(draw.delivery, DeliveryStatus::Credited);
    assert_eq!(outcome.archived_rows, 3);

    let expected_entries = if draw.winner_id == "u1" { 1 } else { 4 };
    assert_eq!(draw.winner_entries, expected_entries);

    // live set empty, archive intact, exactly one draw
    let state = f.store.snapshot().await;
    assert!(state.entries.is_empty());
    assert_eq!(f.service.archived_entries(draw.id).await.unwrap().len(), 3);
    assert_eq!(f.service.draws(WEEKLY).await.unwrap().len(), 1);

    let winner = f.ledger.balance(&draw.winner_id).await.unwrap();
    let spent = if draw.winner_id == "u2" { 150 } else { 0 };
    assert_eq!(winner.credits, 1000 - spent + 5000);
    assert!(state
        .earn_events
        .iter()
        .any(|e| e.earn_type == EarnType::GiveawayPrize && e.user_id == draw.winner_id));

    // next period starts from zero
    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().total(), 0);
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();
}

#[tokio::test]
async fn test_gift_card_draw_hands_off_after_commit() {
    let f = fixture(&["u1"]).await;
    f.service.claim_free_entry("u1", MONTHLY).await.unwrap();

    let outcome = f.service.run_draw(MONTHLY).await.unwrap();
    assert_eq!(outcome.draw.delivery, DeliveryStatus::PendingFulfillment);
    let redemption = outcome.redemption.unwrap();
    assert_eq!(outcome.draw.redemption_id, Some(redemption.id));
    assert_eq!(redemption.status, RedemptionStatus::Pending);

    let requests = f.fulfillment.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sku, "gift-card-25");
    assert_eq!(requests[0].face_value, Some(2500));
    assert_eq!(requests[0].source, "giveaway:monthly-gift-card");
}

#[tokio::test]
async fn test_failed_hand_off_keeps_draw() {
    let f = fixture(&["u1"]).await;
    f.fulfillment.set_failing(true).await;
    f.service.claim_free_entry("u1", MONTHLY).await.unwrap();

    f.service.run_draw(MONTHLY).await.unwrap();
    assert_eq!(f.service.draws(MONTHLY).await.unwrap().len(), 1);
    assert_eq!(f.store.snapshot().await.redemptions.len(), 1);
}

#[tokio::test]
async fn test_failed_commit_keeps_entries() {
    let f = fixture(&["u1"]).await;
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();

    f.store.set_fail_on_commit(true).await;
    assert!(matches!(
        f.service.run_draw(WEEKLY).await,
        Err(EconomyError::Persistence(_))
    ));
    f.store.set_fail_on_commit(false).await;

    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().free, 1);
    assert!(f.service.draws(WEEKLY).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_draw_is_exclusive_per_giveaway() {
    let f = fixture(&["u1"]).await;
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();

    let held = f.service.get(WEEKLY).unwrap().lock.clone();
    let guard = held.lock().await;
    assert!(matches!(
        f.service.run_draw(WEEKLY).await,
        Err(EconomyError::DrawInProgress(_))
    ));
    drop(guard);
    f.service.run_draw(WEEKLY).await.unwrap();
}

#[tokio::test]
async fn test_mid_period_entry_waits_for_boundary() {
    let f = fixture(&["early"]).await;
    assert_eq!(f.service.config(WEEKLY).unwrap().cadence, Cadence::Weekly);
    f.service.claim_free_entry("early", WEEKLY).await.unwrap();

    assert!(f.service.run_due_draws(Utc::now()).await.is_empty());
    assert!(f.service.run_due_draw(WEEKLY, Utc::now()).await.unwrap().is_none());
    assert!(f.service.draws(WEEKLY).await.unwrap().is_empty());
    assert_eq!(f.service.entries("early", WEEKLY).await.unwrap().free, 1);

    let next_week = Utc::now() + TimeDelta::days(7);
    let outcome = f.service.run_due_draw(WEEKLY, next_week).await.unwrap().unwrap();
    assert_eq!(outcome.draw.winner_id, "early");
    assert_eq!(f.service.entries("early", WEEKLY).await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_due_draw_runs_once_per_period() {
    let f = fixture(&["u1", "u2"]).await;
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();
    f.service.claim_free_entry("u2", WEEKLY).await.unwrap();
    f.store.backdate_entries(WEEKLY, TimeDelta::days(8)).await;

    let now = Utc::now();
    let outcome = f.service.run_due_draw(WEEKLY, now).await.unwrap().unwrap();
    assert_eq!(outcome.draw.total_entries, 2);

    // entered before the boundary, but this period already has its draw
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();
    f.store.backdate_entries(WEEKLY, TimeDelta::days(8)).await;
    assert!(f.service.run_due_draw(WEEKLY, now).await.unwrap().is_none());
    assert_eq!(f.service.draws(WEEKLY).await.unwrap().len(), 1);
    assert_eq!(f.service.entries("u1", WEEKLY).await.unwrap().free, 1);

    let next_week = now + TimeDelta::days(7);
    let outcome = f.service.run_due_draw(WEEKLY, next_week).await.unwrap().unwrap();
    assert_eq!(outcome.draw.winner_id, "u1");
    assert_eq!(outcome.draw.total_entries, 1);
}

#[tokio::test]
async fn test_due_draw_leaves_current_period_entries() {
    let f = fixture(&["early", "late"]).await;
    f.service.claim_free_entry("early", WEEKLY).await.unwrap();
    f.store.backdate_entries(WEEKLY, TimeDelta::days(8)).await;
    f.service.claim_free_entry("late", WEEKLY).await.unwrap();

    let outcome = f.service.run_due_draw(WEEKLY, Utc::now()).await.unwrap().unwrap();
    assert_eq!(outcome.draw.winner_id, "early");
    assert_eq!(outcome.draw.participants, 1);
    assert_eq!(outcome.archived_rows, 1);
    assert_eq!(f.service.entries("late", WEEKLY).await.unwrap().free, 1);

    // a manual draw takes whatever is live
    let manual = f.service.run_draw(WEEKLY).await.unwrap();
    assert_eq!(manual.draw.winner_id, "late");
}

#[tokio::test]
async fn test_run_due_draws_skips_empty_giveaways() {
    let f = fixture(&["u1"]).await;
    f.service.claim_free_entry("u1", WEEKLY).await.unwrap();

    let completed = f.service.run_due_draws(at("2030-01-01T00:00:00Z")).await;
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].draw.giveaway_id, WEEKLY);
}

#[tokio::test]
async fn test_heavier_holder_wins_more_often() {
    let mut wins_heavy = 0;
    for seed in 0..200 {
        let store = Arc::new(MockEconomyStore::new());
        let ledger = Ledger::new(store.clone());
        for user in ["heavy", "light"] {
            ledger.open_account(user).await.unwrap();
        }
        let service = GiveawayService::new(
            store.clone(),
            default_giveaways(),
            Arc::new(SeededRandom::new(seed)),
            Arc::new(RecordingFulfillment::new()),
        );
        service.claim_free_entry("light", WEEKLY).await.unwrap();
        service.claim_free_entry("heavy", WEEKLY).await.unwrap();
        for _ in 0..8 {
            service.add_bonus_entry("heavy", WEEKLY).await.unwrap();
        }
        if service.run_draw(WEEKLY).await.unwrap().draw.winner_id == "heavy" {
            wins_heavy += 1;
        }
    }
    // expected 180 of 200
    assert!((160..=195).contains(&wins_heavy), "heavy won {wins_heavy}");
}
