//! Shared economy contract tests.
//!
//! Every backend builds an [`Economy`] over its store and runs the same
//! scenarios through `run_economy_contract!`. Scenarios use their own user
//! ids and giveaways so they can share one store.

#![allow(dead_code)]

use chrono::NaiveDate;

use reward_ledger::config::Config;
use reward_ledger::model::{DeliveryStatus, EarnType, RedemptionStatus};
use reward_ledger::sampling::SeededRandom;
use reward_ledger::services::{AdCallback, AdCallbackOutcome, CheckinRequest, EarnRequest};
use reward_ledger::services::RequestOrigin;
use reward_ledger::streak::TransitionKind;
use reward_ledger::{Economy, EconomyError};

use std::sync::Arc;

pub async fn build(config: Config) -> Economy {
    Economy::builder(config)
        .with_random(Arc::new(SeededRandom::new(2026)))
        .build()
        .await
        .expect("economy should build")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
}

async fn funded(economy: &Economy, user: &str, credits: i64, tokens: i64) {
    economy.open_account(user).await.unwrap();
    if credits > 0 {
        economy.credit(user, credits, "seed").await.unwrap();
    }
    if tokens > 0 {
        economy.adjust_tokens(user, tokens, "seed").await.unwrap();
    }
}

pub async fn test_ledger_arithmetic(economy: &Economy) {
    funded(economy, "ledger-1", 100, 0).await;
    economy.debit("ledger-1", 60, "spend").await.unwrap();
    let err = economy.debit("ledger-1", 41, "spend").await.unwrap_err();
    assert!(matches!(
        err,
        EconomyError::InsufficientBalance {
            requested: 41,
            available: 40
        }
    ));
    assert_eq!(err.code(), "insufficient_balance");

    let balance = economy.balance("ledger-1").await.unwrap();
    assert_eq!(balance.credits, 40);
    assert_eq!(balance.lifetime_earned, 100);
    assert_eq!(balance.lifetime_spent, 60);

    let journal = economy.journal("ledger-1", 10).await.unwrap();
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[0].delta, -60);
    assert_eq!(journal[0].balance_after, 40);

    assert!(matches!(
        economy.balance("nobody").await,
        Err(EconomyError::NotFound { .. })
    ));
}

pub async fn test_earn_dedup(economy: &Economy) {
    funded(economy, "earn-1", 0, 0).await;
    let request = EarnRequest::new("earn-1", EarnType::Referral, 50).with_dedup_key("ref:earn-1");
    assert!(economy.record_earn_event(request.clone()).await.unwrap().applied);
    let again = economy.record_earn_event(request).await.unwrap();
    assert!(!again.applied);
    assert_eq!(economy.balance("earn-1").await.unwrap().credits, 50);
}

pub async fn test_ad_callback(economy: &Economy) {
    funded(economy, "ad-1", 0, 0).await;
    let callback = AdCallback {
        network: "unity".to_string(),
        transaction_id: "txn-1".to_string(),
        user_id: "ad-1".to_string(),
        reward_amount: 12,
    };
    assert!(matches!(
        economy.handle_ad_callback(callback.clone()).await.unwrap(),
        AdCallbackOutcome::Credited(_)
    ));
    assert!(matches!(
        economy.handle_ad_callback(callback).await.unwrap(),
        AdCallbackOutcome::AlreadyCredited(_)
    ));
    assert_eq!(economy.balance("ad-1").await.unwrap().credits, 12);
}

pub async fn test_learn_module(economy: &Economy) {
    funded(economy, "learn-1", 0, 0).await;
    let origin = RequestOrigin::default();
    let first = economy
        .record_learn_module("learn-1", "m1", day(5), 30, origin.clone())
        .await
        .unwrap();
    let repeat = economy
        .record_learn_module("learn-1", "m1", day(5), 30, origin.clone())
        .await
        .unwrap();
    let next_day = economy
        .record_learn_module("learn-1", "m1", day(6), 30, origin)
        .await
        .unwrap();
    assert!(first.applied && !repeat.applied && next_day.applied);
    assert_eq!(economy.balance("learn-1").await.unwrap().credits, 60);
}

pub async fn test_checkin_streaks(economy: &Economy) {
    funded(economy, "streak-1", 0, 0).await;
    let first = economy
        .checkin(CheckinRequest::new("streak-1", day(1)))
        .await
        .unwrap();
    assert_eq!(first.kind, TransitionKind::Started);

    let repeat = economy
        .checkin(CheckinRequest::new("streak-1", day(1)))
        .await
        .unwrap();
    assert!(!repeat.applied);
    assert_eq!(economy.balance("streak-1").await.unwrap().credits, 10);

    economy.grant_streak_saver("streak-1", 1).await.unwrap();
    let saved = economy
        .checkin(CheckinRequest::new("streak-1", day(3)))
        .await
        .unwrap();
    assert_eq!(saved.kind, TransitionKind::Saved);
    assert_eq!(saved.streak.current_streak, 2);
    assert_eq!(saved.streak.streak_savers, 0);

    let reset = economy
        .checkin(CheckinRequest::new("streak-1", day(5)))
        .await
        .unwrap();
    assert_eq!(reset.kind, TransitionKind::Reset);
    assert_eq!(reset.streak.current_streak, 1);
    assert_eq!(reset.streak.longest_streak, 2);

    let streak = economy.streak("streak-1").await.unwrap();
    assert_eq!(streak.last_checkin_date, Some(day(5)));
}

pub async fn test_jackpot(economy: &Economy) {
    funded(economy, "spin-1", 0, 50_000).await;
    let mut expected_tokens = 50_000;
    for _ in 0..40 {
        let outcome = economy.spin_jackpot("spin-1", 100).await.unwrap();
        expected_tokens += outcome.spin.win_tokens - 100;
        assert!(outcome.pool.pool_tokens >= 0);
        assert_eq!(outcome.balance.tokens, expected_tokens);
    }
    assert_eq!(economy.my_history("spin-1", 100).await.unwrap().len(), 40);
    assert!(economy.jackpot_pool().await.unwrap().pool_tokens >= 0);

    assert!(matches!(
        economy.spin_jackpot("spin-1", 5).await,
        Err(EconomyError::Validation(_))
    ));
}

pub async fn test_mystery_bag(economy: &Economy) {
    funded(economy, "bag-1", 150, 0).await;
    let outcome = economy.purchase_mystery_bag("bag-1").await.unwrap();
    assert_eq!(outcome.opening.price_credits, 100);
    assert_eq!(outcome.balance.lifetime_spent, 100);
    assert!(matches!(
        economy.purchase_mystery_bag("poor").await,
        Err(EconomyError::NotFound { .. })
    ));
}

pub async fn test_giveaway_draw(economy: &Economy) {
    funded(economy, "draw-1", 500, 0).await;
    funded(economy, "draw-2", 500, 0).await;
    economy.claim_free_entry("draw-1", "weekly-credits").await.unwrap();
    economy.buy_entries("draw-2", "weekly-credits", 2).await.unwrap();

    let outcome = economy.run_giveaway_draw("weekly-credits").await.unwrap();
    assert_eq!(outcome.draw.total_entries, 3);
    assert_eq!(outcome.draw.delivery, DeliveryStatus::Credited);

    for user in ["draw-1", "draw-2"] {
        assert_eq!(economy.entries(user, "weekly-credits").await.unwrap().total(), 0);
    }
    assert_eq!(economy.archived_entries(outcome.draw.id).await.unwrap().len(), 2);
    let draws = economy.draws("weekly-credits").await.unwrap();
    assert_eq!(draws.len(), 1);
    assert_eq!(draws[0].id, outcome.draw.id);
    assert_eq!(draws[0].winner_id, outcome.draw.winner_id);

    let winner = economy.balance(&outcome.draw.winner_id).await.unwrap();
    assert!(winner.credits >= 5000);

    assert!(matches!(
        economy.run_giveaway_draw("weekly-credits").await,
        Err(EconomyError::NoParticipants(_))
    ));
}

pub async fn test_gift_card_giveaway(economy: &Economy) {
    funded(economy, "gift-1", 0, 0).await;
    economy.claim_free_entry("gift-1", "monthly-gift-card").await.unwrap();
    let outcome = economy.run_giveaway_draw("monthly-gift-card").await.unwrap();
    assert_eq!(outcome.draw.delivery, DeliveryStatus::PendingFulfillment);
    let redemptions = economy.redemptions("gift-1").await.unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(Some(redemptions[0].id), outcome.draw.redemption_id);
}

pub async fn test_store_redemption(economy: &Economy) {
    assert_eq!(economy.get_adjusted_price(5000, Some("US")).unwrap(), 5000);
    assert_eq!(economy.get_adjusted_price(5000, Some("KR")).unwrap(), 7500);
    assert_eq!(economy.get_adjusted_price(5000, None).unwrap(), 15000);

    funded(economy, "shop-1", 5000, 0).await;
    let outcome = economy
        .redeem_store_item("shop-1", "gift-card-5", Some("US"))
        .await
        .unwrap();
    assert_eq!(outcome.balance.credits, 0);
    assert_eq!(outcome.redemption.status, RedemptionStatus::Pending);
    assert!(matches!(
        economy
            .redeem_store_item("shop-1", "gift-card-5", Some("US"))
            .await,
        Err(EconomyError::InsufficientBalance { .. })
    ));
    assert_eq!(economy.redemptions("shop-1").await.unwrap().len(), 1);
}

pub async fn test_fraud_velocity(economy: &Economy) {
    funded(economy, "fast-1", 0, 0).await;
    let origin = RequestOrigin::new(Some("fast-device"), None);
    for _ in 0..10 {
        economy
            .record_earn_event(
                EarnRequest::new("fast-1", EarnType::AdView, 1).with_origin(origin.clone()),
            )
            .await
            .unwrap();
    }
    let err = economy
        .record_earn_event(EarnRequest::new("fast-1", EarnType::AdView, 1).with_origin(origin))
        .await
        .unwrap_err();
    assert!(matches!(err, EconomyError::FraudBlocked { .. }));
    assert_eq!(err.status(), 403);
    assert_eq!(economy.balance("fast-1").await.unwrap().credits, 10);

    let device = economy.device("fast-device").await.unwrap().unwrap();
    assert_eq!(device.risk_score, 10);
    let flags = economy.fraud_flags("fast-1").await.unwrap();
    assert!(flags.iter().any(|f| f.flag_type == "velocity_abuse"));
}

pub async fn test_banned_account(economy: &Economy) {
    funded(economy, "banned-1", 1000, 0).await;
    economy.set_banned("banned-1", true).await.unwrap();
    assert!(matches!(
        economy
            .record_earn_event(EarnRequest::new("banned-1", EarnType::Bonus, 5))
            .await,
        Err(EconomyError::BannedAccount(_))
    ));
    assert!(matches!(
        economy.purchase_mystery_bag("banned-1").await,
        Err(EconomyError::BannedAccount(_))
    ));
    let eligibility = economy
        .check_earn_eligibility("banned-1", None, None)
        .await
        .unwrap();
    assert_eq!(eligibility.risk_score, 100);
}

#[macro_export]
macro_rules! run_economy_contract {
    ($economy:expr) => {
        use $crate::economy::*;

        test_ledger_arithmetic($economy).await;
        test_earn_dedup($economy).await;
        test_ad_callback($economy).await;
        test_learn_module($economy).await;
        test_checkin_streaks($economy).await;
        test_jackpot($economy).await;
        test_mystery_bag($economy).await;
        test_giveaway_draw($economy).await;
        test_gift_card_giveaway($economy).await;
        test_store_redemption($economy).await;
        test_fraud_velocity($economy).await;
        test_banned_account($economy).await;
    };
}
