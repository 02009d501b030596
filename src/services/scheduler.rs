//! Background giveaway draw scheduler.
//!
//! Wakes on a fixed interval and draws, for every giveaway whose current
//! period has no draw yet, the entries written before that period began.
//! Running it twice in one period is harmless: the due check happens inside
//! the draw's own unit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use super::giveaway::{DrawOutcome, GiveawayService};

pub struct GiveawayScheduler {
    giveaways: Arc<GiveawayService>,
    interval: Duration,
}

impl GiveawayScheduler {
    /// Checks once a minute unless told otherwise.
    pub fn new(giveaways: Arc<GiveawayService>) -> Self {
        Self {
            giveaways,
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the scheduler as a background task. Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Giveaway scheduler started");
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let completed = self.run_once().await;
                if !completed.is_empty() {
                    info!(draws = completed.len(), "Scheduled giveaway draws completed");
                }
            }
        })
    }

    /// Run due draws once.
    pub async fn run_once(&self) -> Vec<DrawOutcome> {
        self.giveaways.run_due_draws(Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    use crate::config::default_giveaways;
    use crate::fulfillment::LogFulfillment;
    use crate::sampling::SeededRandom;
    use crate::services::Ledger;
    use crate::storage::MockEconomyStore;

    async fn service() -> (Arc<MockEconomyStore>, Arc<GiveawayService>) {
        let store = Arc::new(MockEconomyStore::new());
        Ledger::new(store.clone()).open_account("u1").await.unwrap();
        let giveaways = Arc::new(GiveawayService::new(
            store.clone(),
            default_giveaways(),
            Arc::new(SeededRandom::new(1)),
            Arc::new(LogFulfillment),
        ));
        (store, giveaways)
    }

    #[tokio::test]
    async fn test_run_once_skips_current_period_entries() {
        let (_store, giveaways) = service().await;
        giveaways.claim_free_entry("u1", "weekly-credits").await.unwrap();
        let scheduler = GiveawayScheduler::new(giveaways.clone());

        assert!(scheduler.run_once().await.is_empty());
        assert!(giveaways.draws("weekly-credits").await.unwrap().is_empty());
        assert_eq!(giveaways.entries("u1", "weekly-credits").await.unwrap().free, 1);
    }

    #[tokio::test]
    async fn test_run_once_is_idempotent_within_period() {
        let (store, giveaways) = service().await;
        giveaways.claim_free_entry("u1", "weekly-credits").await.unwrap();
        store.backdate_entries("weekly-credits", TimeDelta::days(8)).await;
        let scheduler = GiveawayScheduler::new(giveaways.clone());

        assert_eq!(scheduler.run_once().await.len(), 1);
        giveaways.claim_free_entry("u1", "weekly-credits").await.unwrap();
        store.backdate_entries("weekly-credits", TimeDelta::days(8)).await;
        assert!(scheduler.run_once().await.is_empty());
        assert_eq!(giveaways.draws("weekly-credits").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_with_interval() {
        let (_store, giveaways) = service().await;
        let scheduler = GiveawayScheduler::new(giveaways).with_interval(Duration::from_secs(5));
        assert_eq!(scheduler.interval, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_spawn_draws_then_abort() {
        let (store, giveaways) = service().await;
        giveaways.claim_free_entry("u1", "weekly-credits").await.unwrap();
        store.backdate_entries("weekly-credits", TimeDelta::days(8)).await;
        let handle = GiveawayScheduler::new(giveaways.clone())
            .with_interval(Duration::from_millis(20))
            .spawn();

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();
        let result = tokio::time::timeout(Duration::from_millis(100), handle).await;
        assert!(result.is_ok());
        assert_eq!(giveaways.draws("weekly-credits").await.unwrap().len(), 1);
    }
}
