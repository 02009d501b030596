use std::time::Duration;

use super::*;
use crate::model::{EarnEvent, EarnType};
use crate::services::Ledger;
use crate::storage::MockEconomyStore;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

async fn gate_with(ranges: &[&str]) -> (Arc<MockEconomyStore>, FraudGate, Ledger) {
    let store = Arc::new(MockEconomyStore::new());
    let ledger = Ledger::new(store.clone());
    ledger.open_account("u1").await.unwrap();
    let ranges = Arc::new(NetworkRanges::new(
        Arc::new(StaticRanges::parse(ranges).unwrap()),
        Duration::from_secs(60),
    ));
    let gate = FraudGate::new(store.clone(), FraudConfig::default(), ranges);
    (store, gate, ledger)
}

/// Seed `n` earn events for `u1` directly in the store.
async fn seed_events(store: &MockEconomyStore, n: usize) {
    let mut tx = store.begin().await.unwrap();
    for _ in 0..n {
        tx.insert_earn_event(&EarnEvent {
            id: Uuid::new_v4(),
            user_id: "u1".into(),
            device_id: Some("dev-1".into()),
            earn_type: EarnType::AdView,
            credits_amount: 1,
            dedup_key: None,
            metadata: serde_json::json!({}),
            created_at: now(),
        })
        .await
        .unwrap();
    }
    tx.commit().await.unwrap();
}

#[tokio::test]
async fn test_clean_request_is_allowed() {
    let (store, gate, _) = gate_with(&["203.0.113.0/24"]).await;
    let result = gate
        .check_eligibility("u1", Some("dev-1"), Some(ip("198.51.100.7")))
        .await
        .unwrap();
    assert_eq!(result, Eligibility::allowed(0));
    assert!(result.into_result("u1").is_ok());
    assert!(store.snapshot().await.fraud_flags.is_empty());
}

#[tokio::test]
async fn test_banned_account_is_hard_blocked() {
    let (_, gate, ledger) = gate_with(&[]).await;
    ledger.set_banned("u1", true).await.unwrap();
    let result = gate.check_eligibility("u1", None, None).await.unwrap();
    assert!(!result.allowed);
    assert_eq!(result.reason, Some(BlockReason::Banned));
    assert_eq!(result.risk_score, BANNED_RISK_SCORE);
    assert!(matches!(
        result.into_result("u1"),
        Err(crate::EconomyError::BannedAccount(_))
    ));
}

#[tokio::test]
async fn test_datacenter_ip_adds_penalty_and_flag() {
    let (store, gate, _) = gate_with(&["203.0.113.0/24"]).await;
    let result = gate
        .check_eligibility("u1", None, Some(ip("203.0.113.50")))
        .await
        .unwrap();
    assert!(result.allowed);
    assert_eq!(result.risk_score, 30);

    let flags = gate.flags("u1").await.unwrap();
    assert_eq!(flags.len(), 1);
    assert_eq!(flags[0].flag_type, "datacenter_ip");
    assert_eq!(flags[0].severity, Severity::Medium);
    assert_eq!(store.snapshot().await.fraud_flags.len(), 1);
}

#[tokio::test]
async fn test_datacenter_plus_device_risk_reaches_threshold() {
    let (store, gate, _) = gate_with(&["203.0.113.0/24"]).await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.raise_device_risk("dev-1", 20).await.unwrap();
        tx.commit().await.unwrap();
    }

    let result = gate
        .check_eligibility("u1", Some("dev-1"), Some(ip("203.0.113.50")))
        .await
        .unwrap();
    assert!(!result.allowed);
    assert_eq!(result.reason, Some(BlockReason::DeviceFlagged));
    assert_eq!(result.risk_score, 50);
    assert!(matches!(
        result.into_result("u1"),
        Err(crate::EconomyError::FraudBlocked { risk_score: 50, .. })
    ));

    let types: Vec<_> = gate
        .flags("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.flag_type)
        .collect();
    assert!(types.contains(&"datacenter_ip".to_string()));
    assert!(types.contains(&"device_flagged".to_string()));
}

#[tokio::test]
async fn test_device_risk_below_threshold_is_reported() {
    let (store, gate, _) = gate_with(&[]).await;
    {
        let mut tx = store.begin().await.unwrap();
        tx.raise_device_risk("dev-1", 49).await.unwrap();
        tx.commit().await.unwrap();
    }
    let result = gate.check_eligibility("u1", Some("dev-1"), None).await.unwrap();
    assert!(result.allowed);
    assert_eq!(result.risk_score, 49);
}

#[tokio::test]
async fn test_blocked_device_is_hard_blocked() {
    let (_, gate, _) = gate_with(&[]).await;
    gate.set_device_blocked("dev-1", true).await.unwrap();
    let result = gate.check_eligibility("u1", Some("dev-1"), None).await.unwrap();
    assert_eq!(result.reason, Some(BlockReason::DeviceBlocked));

    gate.set_device_blocked("dev-1", false).await.unwrap();
    assert!(gate
        .check_eligibility("u1", Some("dev-1"), None)
        .await
        .unwrap()
        .allowed);
}

#[tokio::test]
async fn test_velocity_blocks_and_raises_device_risk_permanently() {
    let (store, gate, _) = gate_with(&[]).await;
    seed_events(&store, 9).await;
    assert!(gate
        .check_eligibility("u1", Some("dev-1"), None)
        .await
        .unwrap()
        .allowed);

    seed_events(&store, 1).await;
    let result = gate.check_eligibility("u1", Some("dev-1"), None).await.unwrap();
    assert_eq!(result.reason, Some(BlockReason::Velocity));

    let device = gate.device("dev-1").await.unwrap().unwrap();
    assert_eq!(device.risk_score, 10);
    let flags = gate.flags("u1").await.unwrap();
    assert_eq!(flags[0].flag_type, "velocity_abuse");
    assert_eq!(flags[0].severity, Severity::High);

    // the raise persisted; a second block adds another ten
    gate.check_eligibility("u1", Some("dev-1"), None).await.unwrap();
    assert_eq!(gate.device("dev-1").await.unwrap().unwrap().risk_score, 20);
}

#[tokio::test]
async fn test_old_events_do_not_count_toward_velocity() {
    let (store, gate, _) = gate_with(&[]).await;
    {
        let mut tx = store.begin().await.unwrap();
        for _ in 0..20 {
            tx.insert_earn_event(&EarnEvent {
                id: Uuid::new_v4(),
                user_id: "u1".into(),
                device_id: None,
                earn_type: EarnType::AdView,
                credits_amount: 1,
                dedup_key: None,
                metadata: serde_json::json!({}),
                created_at: now() - TimeDelta::minutes(10),
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
    }
    assert!(gate.check_eligibility("u1", None, None).await.unwrap().allowed);
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let (_, gate, _) = gate_with(&[]).await;
    assert!(matches!(
        gate.check_eligibility("ghost", None, None).await,
        Err(crate::EconomyError::NotFound { .. })
    ));
}
