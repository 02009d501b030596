//! Economy facade for in-process library usage.
//!
//! Wires storage, the fraud gate and every service from one [`Config`] and
//! exposes the operations the routing layer calls.
//!
//! # Example
//!
//! ```ignore
//! use reward_ledger::config::Config;
//! use reward_ledger::facade::Economy;
//!
//! let economy = Economy::builder(Config::for_test()).build().await?;
//! economy.open_account("u1").await?;
//! let outcome = economy.checkin(CheckinRequest::new("u1", today)).await?;
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::{Config, ConfigError, StoreItem};
use crate::error::{EconomyError, Result};
use crate::fraud::{Eligibility, FraudGate, NetworkRanges, RangeError, RangeSource, StaticRanges};
use crate::fulfillment::{init_fulfillment, Fulfillment, FulfillmentError};
use crate::model::{
    Balance, Device, EntrySet, FraudFlag, GiveawayDraw, GiveawayEntry, JackpotPool, JackpotSpin,
    JournalEntry, Redemption, Streak,
};
use crate::sampling::{OsRandom, RandomSource};
use crate::services::store::{get_adjusted_price, price_for};
use crate::services::{
    AdCallback, AdCallbackOutcome, BagOutcome, CheckinOutcome, CheckinRequest, CheckinService,
    DrawOutcome, EarnOutcome, EarnRecorder, EarnRequest, EntryPurchase, GiveawayScheduler,
    GiveawayService, JackpotService, Ledger, MysteryBagService, RedeemOutcome, RequestOrigin,
    SpinOutcome, StoreService,
};
use crate::storage::{init_storage, EconomyStore, StorageError};
use crate::streak::StreakState;

/// Errors raised while assembling an [`Economy`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Datacenter ranges error: {0}")]
    Ranges(#[from] RangeError),

    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    #[error("Economy error: {0}")]
    Economy(#[from] EconomyError),
}

/// Builder for [`Economy`]. Anything not supplied comes from the config.
pub struct EconomyBuilder {
    config: Config,
    store: Option<Arc<dyn EconomyStore>>,
    random: Option<Arc<dyn RandomSource>>,
    fulfillment: Option<Arc<dyn Fulfillment>>,
    range_source: Option<Arc<dyn RangeSource>>,
}

impl EconomyBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            random: None,
            fulfillment: None,
            range_source: None,
        }
    }

    /// Use an existing store instead of `config.storage`.
    pub fn with_store(mut self, store: Arc<dyn EconomyStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Randomness for jackpot, mystery bag and giveaway draws.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = Some(random);
        self
    }

    pub fn with_fulfillment(mut self, fulfillment: Arc<dyn Fulfillment>) -> Self {
        self.fulfillment = Some(fulfillment);
        self
    }

    /// Datacenter range source instead of `fraud.datacenter_ranges`.
    pub fn with_range_source(mut self, source: Arc<dyn RangeSource>) -> Self {
        self.range_source = Some(source);
        self
    }

    pub async fn build(self) -> std::result::Result<Economy, BuildError> {
        let config = self.config;
        config.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => init_storage(&config.storage).await?,
        };
        let random = self.random.unwrap_or_else(|| Arc::new(OsRandom));
        let fulfillment = match self.fulfillment {
            Some(fulfillment) => fulfillment,
            None => init_fulfillment(&config.fulfillment)?,
        };
        let range_source = match self.range_source {
            Some(source) => source,
            None => Arc::new(StaticRanges::parse(&config.fraud.datacenter_ranges)?),
        };

        let ranges = Arc::new(NetworkRanges::new(
            range_source,
            Duration::from_secs(config.fraud.ranges_ttl_secs),
        ));
        let gate = Arc::new(FraudGate::new(store.clone(), config.fraud.clone(), ranges));

        let giveaways = Arc::new(GiveawayService::new(
            store.clone(),
            config.giveaways.clone(),
            random.clone(),
            fulfillment.clone(),
        ));

        let mut recorder = EarnRecorder::new(store.clone(), gate.clone());
        let mut checkin = CheckinService::new(store.clone(), gate.clone(), config.earn.clone());
        if config.earn.bonus_entry_per_earn {
            recorder = recorder.with_bonus_entries(giveaways.clone());
            checkin = checkin.with_bonus_entries(giveaways.clone());
        }

        let jackpot = JackpotService::new(store.clone(), config.jackpot.clone(), random.clone())?;
        let mystery_bag =
            MysteryBagService::new(store.clone(), config.mystery_bag.clone(), random)?;
        let shop = StoreService::new(store.clone(), config.store.clone(), fulfillment);

        info!(
            giveaways = config.giveaways.len(),
            store_items = config.store.items.len(),
            "Economy ready"
        );

        Ok(Economy {
            ledger: Ledger::new(store),
            gate,
            recorder,
            checkin,
            jackpot,
            mystery_bag,
            giveaways,
            shop,
            config,
        })
    }
}

/// The economy integrity engine.
pub struct Economy {
    config: Config,
    ledger: Ledger,
    gate: Arc<FraudGate>,
    recorder: EarnRecorder,
    checkin: CheckinService,
    jackpot: JackpotService,
    mystery_bag: MysteryBagService,
    giveaways: Arc<GiveawayService>,
    shop: StoreService,
}

impl Economy {
    pub fn builder(config: Config) -> EconomyBuilder {
        EconomyBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn giveaways(&self) -> &Arc<GiveawayService> {
        &self.giveaways
    }

    // --- accounts and ledger ---

    pub async fn open_account(&self, user_id: &str) -> Result<Balance> {
        self.ledger.open_account(user_id).await
    }

    pub async fn set_banned(&self, user_id: &str, banned: bool) -> Result<()> {
        self.ledger.set_banned(user_id, banned).await
    }

    pub async fn balance(&self, user_id: &str) -> Result<Balance> {
        self.ledger.balance(user_id).await
    }

    pub async fn journal(&self, user_id: &str, limit: u32) -> Result<Vec<JournalEntry>> {
        self.ledger.journal(user_id, limit).await
    }

    /// Direct ledger credit for administrative adjustments.
    pub async fn credit(&self, user_id: &str, amount: i64, reason: &str) -> Result<Balance> {
        self.ledger.credit(user_id, amount, reason).await
    }

    pub async fn debit(&self, user_id: &str, amount: i64, reason: &str) -> Result<Balance> {
        self.ledger.debit(user_id, amount, reason).await
    }

    pub async fn adjust_tokens(&self, user_id: &str, delta: i64, reason: &str) -> Result<Balance> {
        self.ledger.adjust_tokens(user_id, delta, reason).await
    }

    // --- earning ---

    pub async fn check_earn_eligibility(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        ip: Option<IpAddr>,
    ) -> Result<Eligibility> {
        self.gate.check_eligibility(user_id, device_id, ip).await
    }

    pub async fn record_earn_event(&self, request: EarnRequest) -> Result<EarnOutcome> {
        self.recorder.record(request).await
    }

    pub async fn record_learn_module(
        &self,
        user_id: &str,
        module_id: &str,
        day: NaiveDate,
        credits: i64,
        origin: RequestOrigin,
    ) -> Result<EarnOutcome> {
        self.recorder
            .record_learn_module(user_id, module_id, day, credits, origin)
            .await
    }

    pub async fn handle_ad_callback(&self, callback: AdCallback) -> Result<AdCallbackOutcome> {
        self.recorder.handle_ad_callback(callback).await
    }

    // --- streaks ---

    pub async fn checkin(&self, request: CheckinRequest) -> Result<CheckinOutcome> {
        self.checkin.checkin(request).await
    }

    pub async fn streak(&self, user_id: &str) -> Result<Streak> {
        self.checkin.streak(user_id).await
    }

    pub async fn streak_state(&self, user_id: &str, day: NaiveDate) -> Result<StreakState> {
        self.checkin.state(user_id, day).await
    }

    pub async fn grant_streak_saver(&self, user_id: &str, count: u32) -> Result<Streak> {
        self.checkin.grant_streak_saver(user_id, count).await
    }

    // --- games ---

    pub async fn spin_jackpot(&self, user_id: &str, bet_tokens: i64) -> Result<SpinOutcome> {
        self.jackpot.spin(user_id, bet_tokens).await
    }

    pub async fn jackpot_pool(&self) -> Result<JackpotPool> {
        self.jackpot.pool().await
    }

    pub async fn my_history(&self, user_id: &str, limit: u32) -> Result<Vec<JackpotSpin>> {
        self.jackpot.history(user_id, limit).await
    }

    pub async fn purchase_mystery_bag(&self, user_id: &str) -> Result<BagOutcome> {
        self.mystery_bag.purchase(user_id).await
    }

    // --- giveaways ---

    pub async fn claim_free_entry(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        self.giveaways.claim_free_entry(user_id, giveaway_id).await
    }

    pub async fn add_bonus_entry(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        self.giveaways.add_bonus_entry(user_id, giveaway_id).await
    }

    pub async fn buy_entries(
        &self,
        user_id: &str,
        giveaway_id: &str,
        count: u32,
    ) -> Result<EntryPurchase> {
        self.giveaways.buy_entries(user_id, giveaway_id, count).await
    }

    pub async fn entries(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        self.giveaways.entries(user_id, giveaway_id).await
    }

    pub async fn run_giveaway_draw(&self, giveaway_id: &str) -> Result<DrawOutcome> {
        self.giveaways.run_draw(giveaway_id).await
    }

    pub async fn run_due_draws(&self, now: DateTime<Utc>) -> Vec<DrawOutcome> {
        self.giveaways.run_due_draws(now).await
    }

    pub async fn draws(&self, giveaway_id: &str) -> Result<Vec<GiveawayDraw>> {
        self.giveaways.draws(giveaway_id).await
    }

    pub async fn archived_entries(&self, draw_id: Uuid) -> Result<Vec<GiveawayEntry>> {
        self.giveaways.archived_entries(draw_id).await
    }

    /// Scheduler for due draws, configured from `scheduler.interval_secs`.
    pub fn scheduler(&self) -> GiveawayScheduler {
        GiveawayScheduler::new(self.giveaways.clone())
            .with_interval(Duration::from_secs(self.config.scheduler.interval_secs.max(1)))
    }

    /// Spawn the scheduler if enabled.
    pub fn spawn_scheduler(&self) -> Option<JoinHandle<()>> {
        self.config
            .scheduler
            .enabled
            .then(|| self.scheduler().spawn())
    }

    // --- store ---

    pub fn get_adjusted_price(&self, base_price: i64, country_code: Option<&str>) -> Result<i64> {
        get_adjusted_price(base_price, country_code)
    }

    pub fn store_items(&self) -> &[StoreItem] {
        self.shop.items()
    }

    pub fn price_for(&self, item_id: &str, country_code: Option<&str>) -> Result<i64> {
        Ok(price_for(self.shop.item(item_id)?, country_code))
    }

    pub async fn redeem_store_item(
        &self,
        user_id: &str,
        item_id: &str,
        country_code: Option<&str>,
    ) -> Result<RedeemOutcome> {
        self.shop.redeem(user_id, item_id, country_code).await
    }

    pub async fn redemptions(&self, user_id: &str) -> Result<Vec<Redemption>> {
        self.shop.redemptions(user_id).await
    }

    // --- fraud administration ---

    pub async fn fraud_flags(&self, user_id: &str) -> Result<Vec<FraudFlag>> {
        self.gate.flags(user_id).await
    }

    pub async fn device(&self, fingerprint: &str) -> Result<Option<Device>> {
        self.gate.device(fingerprint).await
    }

    pub async fn set_device_blocked(&self, fingerprint: &str, blocked: bool) -> Result<Device> {
        self.gate.set_device_blocked(fingerprint, blocked).await
    }

    /// Force the next eligibility check to refetch datacenter ranges.
    pub async fn invalidate_ranges(&self) {
        self.gate.ranges().invalidate().await;
    }
}
