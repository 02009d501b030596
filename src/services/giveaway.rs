//! Giveaway entries and draws.
//!
//! Each configured giveaway owns an async mutex. Entry writes wait for it;
//! a draw only try-locks it and reports `DrawInProgress` when it is held, so
//! two draws for the same giveaway never overlap and no entry lands between
//! a draw's read and its archive. The lock covers the store unit only: prize
//! fulfillment runs after commit with the lock released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use backon::Retryable;
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GiveawayConfig;
use crate::error::{EconomyError, Result};
use crate::fulfillment::{Fulfillment, FulfillmentRequest};
use crate::model::{
    Balance, DeliveryStatus, EarnEvent, EarnType, EntrySet, EntryType, GiveawayDraw,
    GiveawayEntry, Prize, Redemption, RedemptionStatus,
};
use crate::sampling::{RandomSource, WeightedTable};
use crate::services::earn::record_in;
use crate::services::{finish, ledger};
use crate::storage::helpers::now;
use crate::storage::{EconomyStore, EconomyTx};
use crate::utils::retry::persistence_backoff;

/// A completed draw.
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub draw: GiveawayDraw,
    /// Entry rows moved to the archive.
    pub archived_rows: u64,
    /// Pending redemption for gift-card prizes.
    pub redemption: Option<Redemption>,
}

#[derive(Debug, Clone)]
pub struct EntryPurchase {
    pub entries: EntrySet,
    pub balance: Balance,
}

struct Giveaway {
    config: GiveawayConfig,
    lock: Arc<Mutex<()>>,
}

pub struct GiveawayService {
    store: Arc<dyn EconomyStore>,
    giveaways: HashMap<String, Giveaway>,
    /// Configuration order, for scheduling.
    order: Vec<String>,
    random: Arc<dyn RandomSource>,
    fulfillment: Arc<dyn Fulfillment>,
}

impl GiveawayService {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        configs: Vec<GiveawayConfig>,
        random: Arc<dyn RandomSource>,
        fulfillment: Arc<dyn Fulfillment>,
    ) -> Self {
        let order = configs.iter().map(|c| c.id.clone()).collect();
        let giveaways = configs
            .into_iter()
            .map(|config| {
                let giveaway = Giveaway {
                    config,
                    lock: Arc::new(Mutex::new(())),
                };
                (giveaway.config.id.clone(), giveaway)
            })
            .collect();
        Self {
            store,
            giveaways,
            order,
            random,
            fulfillment,
        }
    }

    pub fn giveaway_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn config(&self, giveaway_id: &str) -> Result<&GiveawayConfig> {
        Ok(&self.get(giveaway_id)?.config)
    }

    fn get(&self, giveaway_id: &str) -> Result<&Giveaway> {
        self.giveaways
            .get(giveaway_id)
            .ok_or_else(|| EconomyError::not_found("giveaway", giveaway_id))
    }

    // --- entries ---

    /// Record entries under the giveaway lock, then return the user's set.
    async fn add(
        &self,
        user_id: &str,
        giveaway_id: &str,
        entry_type: EntryType,
        count: u32,
        cap: Option<u32>,
    ) -> Result<EntrySet> {
        let giveaway = self.get(giveaway_id)?;
        let _guard = giveaway.lock.lock().await;

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::require_active(tx.as_mut(), user_id).await?;
            if tx
                .add_entries(giveaway_id, user_id, entry_type, count, cap)
                .await?
                .is_none()
            {
                return Err(cap_error(giveaway_id, user_id, entry_type, cap));
            }
            Ok(EntrySet::from_rows(
                &tx.user_entries(giveaway_id, user_id).await?,
            ))
        }
        .await;
        let entries = finish(tx, result).await?;
        debug!(%user_id, %giveaway_id, entry_type = %entry_type, total = entries.total(), "Entries recorded");
        Ok(entries)
    }

    /// The single free entry per user per draw period.
    pub async fn claim_free_entry(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        self.add(user_id, giveaway_id, EntryType::Free, 1, Some(1))
            .await
    }

    pub async fn add_bonus_entry(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        let cap = self.config(giveaway_id)?.max_bonus_entries;
        self.add(user_id, giveaway_id, EntryType::Bonus, 1, Some(cap))
            .await
    }

    /// One bonus entry in every giveaway. Capped or failed grants are skipped.
    pub async fn grant_earn_bonus(&self, user_id: &str) {
        for giveaway_id in self.giveaway_ids() {
            match self.add_bonus_entry(user_id, giveaway_id).await {
                Ok(_) | Err(EconomyError::Validation(_)) => {}
                Err(e) => {
                    warn!(%user_id, %giveaway_id, error = %e, "Failed to grant earn bonus entry")
                }
            }
        }
    }

    /// Debit `count * entry_price` and add paid entries in one unit.
    pub async fn buy_entries(
        &self,
        user_id: &str,
        giveaway_id: &str,
        count: u32,
    ) -> Result<EntryPurchase> {
        if count == 0 {
            return Err(EconomyError::validation("entry count must be positive"));
        }
        let giveaway = self.get(giveaway_id)?;
        let cost = giveaway
            .config
            .entry_price_credits
            .checked_mul(i64::from(count))
            .ok_or_else(|| EconomyError::validation("entry purchase too large"))?;
        let _guard = giveaway.lock.lock().await;

        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::require_active(tx.as_mut(), user_id).await?;
            let reason = format!("giveaway_entries:{giveaway_id}");
            let balance = ledger::debit_in(tx.as_mut(), user_id, cost, &reason).await?;
            tx.add_entries(giveaway_id, user_id, EntryType::Paid, count, None)
                .await?;
            let entries = EntrySet::from_rows(&tx.user_entries(giveaway_id, user_id).await?);
            Ok(EntryPurchase { entries, balance })
        }
        .await;
        let purchase = finish(tx, result).await?;
        info!(%user_id, %giveaway_id, count, cost, "Giveaway entries purchased");
        Ok(purchase)
    }

    pub async fn entries(&self, user_id: &str, giveaway_id: &str) -> Result<EntrySet> {
        self.get(giveaway_id)?;
        let mut tx = self.store.begin().await?;
        let result = tx
            .user_entries(giveaway_id, user_id)
            .await
            .map(|rows| EntrySet::from_rows(&rows))
            .map_err(Into::into);
        finish(tx, result).await
    }

    // --- draws ---

    /// Draw now, regardless of schedule.
    pub async fn run_draw(&self, giveaway_id: &str) -> Result<DrawOutcome> {
        self.draw(giveaway_id, None)
            .await?
            .ok_or_else(|| EconomyError::NoParticipants(giveaway_id.to_string()))
    }

    /// Draw the entries written before the start of the current period, if
    /// no draw happened since that boundary. Returns `None` when the period
    /// already has its draw or nothing was entered before it.
    pub async fn run_due_draw(
        &self,
        giveaway_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DrawOutcome>> {
        let period_start = self.config(giveaway_id)?.cadence.period_start(now);
        self.draw(giveaway_id, Some(period_start)).await
    }

    /// Run every due draw, retrying transient failures. Returns the draws that
    /// completed.
    pub async fn run_due_draws(&self, now: DateTime<Utc>) -> Vec<DrawOutcome> {
        let mut completed = Vec::new();
        for giveaway_id in self.giveaway_ids() {
            let result = (|| async { self.run_due_draw(giveaway_id, now).await })
                .retry(persistence_backoff())
                .when(EconomyError::is_transient)
                .notify(|e, delay| {
                    warn!(%giveaway_id, error = %e, delay_ms = delay.as_millis() as u64, "Retrying giveaway draw");
                })
                .await;
            match result {
                Ok(Some(outcome)) => completed.push(outcome),
                Ok(None) => debug!(%giveaway_id, "No draw due"),
                Err(e) => error!(%giveaway_id, error = %e, "Due draw failed"),
            }
        }
        completed
    }

    async fn draw(
        &self,
        giveaway_id: &str,
        due_since: Option<DateTime<Utc>>,
    ) -> Result<Option<DrawOutcome>> {
        let giveaway = self.get(giveaway_id)?;
        let guard = giveaway
            .lock
            .try_lock()
            .map_err(|_| EconomyError::DrawInProgress(giveaway_id.to_string()))?;

        let mut tx = self.store.begin().await?;
        let result = self.draw_in(tx.as_mut(), &giveaway.config, due_since).await;
        let outcome = finish(tx, result).await?;
        drop(guard);

        if let Some(outcome) = &outcome {
            info!(
                %giveaway_id,
                winner = %outcome.draw.winner_id,
                winner_entries = outcome.draw.winner_entries,
                total_entries = outcome.draw.total_entries,
                participants = outcome.draw.participants,
                delivery = %outcome.draw.delivery,
                "Giveaway drawn"
            );
            self.hand_off(&giveaway.config, outcome).await;
        }
        Ok(outcome)
    }

    async fn draw_in(
        &self,
        tx: &mut dyn EconomyTx,
        config: &GiveawayConfig,
        due_since: Option<DateTime<Utc>>,
    ) -> Result<Option<DrawOutcome>> {
        let giveaway_id = config.id.as_str();
        if let Some(since) = due_since {
            if let Some(last) = tx.last_draw(giveaway_id).await? {
                if last.created_at >= since {
                    return Ok(None);
                }
            }
        }

        // per-user totals, ordered by user id so seeded draws reproduce
        let mut totals: BTreeMap<String, u64> = BTreeMap::new();
        for row in tx.giveaway_entries(giveaway_id, due_since).await? {
            *totals.entry(row.user_id).or_default() += u64::from(row.count);
        }
        totals.retain(|_, n| *n > 0);
        if totals.is_empty() {
            return match due_since {
                Some(_) => Ok(None),
                None => Err(EconomyError::NoParticipants(giveaway_id.to_string())),
            };
        }
        let participants = u32::try_from(totals.len()).unwrap_or(u32::MAX);
        let table = WeightedTable::new(totals)
            .map_err(|e| EconomyError::validation(format!("giveaway {giveaway_id}: {e}")))?;
        let winner_id = table.sample(self.random.as_ref()).clone();
        let winner_entries = table
            .iter()
            .find(|(user, _)| **user == winner_id)
            .map_or(0, |(_, n)| n);

        let draw_id = Uuid::new_v4();
        let (delivery, redemption) = match &config.prize {
            Prize::Credits { amount } => {
                let event = EarnEvent {
                    id: Uuid::new_v4(),
                    user_id: winner_id.clone(),
                    device_id: None,
                    earn_type: EarnType::GiveawayPrize,
                    credits_amount: *amount,
                    dedup_key: Some(format!("giveaway:{giveaway_id}:{draw_id}")),
                    metadata: json!({ "giveaway_id": giveaway_id, "draw_id": draw_id }),
                    created_at: now(),
                };
                record_in(tx, &event).await?;
                (DeliveryStatus::Credited, None)
            }
            Prize::GiftCard { sku, .. } => {
                ledger::require_account(tx, &winner_id).await?;
                let redemption = Redemption {
                    id: Uuid::new_v4(),
                    user_id: winner_id.clone(),
                    item_id: sku.clone(),
                    item_kind: "gift_card".to_string(),
                    cost_credits: 0,
                    country_code: None,
                    status: RedemptionStatus::Pending,
                    created_at: now(),
                };
                tx.insert_redemption(&redemption).await?;
                (DeliveryStatus::PendingFulfillment, Some(redemption))
            }
        };

        let archived_rows = tx.archive_entries(giveaway_id, draw_id, due_since).await?;
        let draw = GiveawayDraw {
            id: draw_id,
            giveaway_id: giveaway_id.to_string(),
            winner_id,
            winner_entries,
            total_entries: table.total(),
            participants,
            prize: config.prize.clone(),
            delivery,
            redemption_id: redemption.as_ref().map(|r| r.id),
            created_at: now(),
        };
        tx.insert_draw(&draw).await?;

        Ok(Some(DrawOutcome {
            draw,
            archived_rows,
            redemption,
        }))
    }

    async fn hand_off(&self, config: &GiveawayConfig, outcome: &DrawOutcome) {
        let (Some(redemption), Prize::GiftCard { sku, face_value }) =
            (&outcome.redemption, &config.prize)
        else {
            return;
        };
        let request = FulfillmentRequest {
            redemption: redemption.clone(),
            sku: sku.clone(),
            face_value: Some(*face_value),
            source: format!("giveaway:{}", config.id),
        };
        if let Err(e) = self.fulfillment.fulfill(&request).await {
            warn!(
                redemption_id = %redemption.id,
                fulfillment = self.fulfillment.name(),
                error = %e,
                "Fulfillment hand-off failed, redemption stays pending"
            );
        }
    }

    /// Completed draws, newest first.
    pub async fn draws(&self, giveaway_id: &str) -> Result<Vec<GiveawayDraw>> {
        let mut tx = self.store.begin().await?;
        let result = tx.draws(giveaway_id).await.map_err(Into::into);
        finish(tx, result).await
    }

    /// Entry rows a draw consumed.
    pub async fn archived_entries(&self, draw_id: Uuid) -> Result<Vec<GiveawayEntry>> {
        let mut tx = self.store.begin().await?;
        let result = tx.archived_entries(draw_id).await.map_err(Into::into);
        finish(tx, result).await
    }
}

fn cap_error(giveaway_id: &str, user_id: &str, entry_type: EntryType, cap: Option<u32>) -> EconomyError {
    match entry_type {
        EntryType::Free => {
            EconomyError::AlreadyRecorded(format!("free entry for {user_id} in {giveaway_id}"))
        }
        _ => EconomyError::validation(format!(
            "{entry_type} entries for {giveaway_id} are capped at {}",
            cap.unwrap_or(u32::MAX)
        )),
    }
}

#[cfg(test)]
mod tests;
