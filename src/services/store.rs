//! Store redemptions with geo-adjusted gift-card pricing.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ItemKind, StoreConfig, StoreItem};
use crate::error::{EconomyError, Result};
use crate::fulfillment::{Fulfillment, FulfillmentRequest};
use crate::model::{Balance, Redemption, RedemptionStatus};
use crate::pricing;
use crate::services::{finish, ledger};
use crate::storage::helpers::now;
use crate::storage::{EconomyStore, EconomyTx};

#[derive(Debug, Clone)]
pub struct RedeemOutcome {
    pub redemption: Redemption,
    pub balance: Balance,
}

/// `round(base_price * tier multiplier)` for the caller's country.
pub fn get_adjusted_price(base_price: i64, country_code: Option<&str>) -> Result<i64> {
    if base_price < 0 {
        return Err(EconomyError::validation("base price must not be negative"));
    }
    Ok(pricing::adjusted_price(base_price, country_code))
}

/// Geo pricing applies to gift cards only.
pub fn price_for(item: &StoreItem, country_code: Option<&str>) -> i64 {
    match item.kind {
        ItemKind::GiftCard => pricing::adjusted_price(item.base_price, country_code),
        _ => item.base_price,
    }
}

pub struct StoreService {
    store: Arc<dyn EconomyStore>,
    catalog: StoreConfig,
    fulfillment: Arc<dyn Fulfillment>,
}

impl StoreService {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        catalog: StoreConfig,
        fulfillment: Arc<dyn Fulfillment>,
    ) -> Self {
        Self {
            store,
            catalog,
            fulfillment,
        }
    }

    pub fn items(&self) -> &[StoreItem] {
        &self.catalog.items
    }

    pub fn item(&self, item_id: &str) -> Result<&StoreItem> {
        self.catalog
            .item(item_id)
            .ok_or_else(|| EconomyError::not_found("store item", item_id))
    }

    pub fn price(&self, item_id: &str, country_code: Option<&str>) -> Result<i64> {
        Ok(price_for(self.item(item_id)?, country_code))
    }

    /// Debit the adjusted price, apply the item and record the redemption
    /// in one unit. Gift cards are handed to fulfillment after commit.
    pub async fn redeem(
        &self,
        user_id: &str,
        item_id: &str,
        country_code: Option<&str>,
    ) -> Result<RedeemOutcome> {
        let item = self.item(item_id)?;
        let cost = price_for(item, country_code);

        let mut tx = self.store.begin().await?;
        let result = Self::apply(tx.as_mut(), user_id, item, cost, country_code).await;
        let outcome = finish(tx, result).await?;

        info!(
            %user_id,
            item_id = %item.id,
            cost,
            country = ?country_code,
            status = %outcome.redemption.status,
            "Store item redeemed"
        );

        if item.kind == ItemKind::GiftCard {
            let request = FulfillmentRequest {
                redemption: outcome.redemption.clone(),
                sku: item.id.clone(),
                face_value: None,
                source: "store".to_string(),
            };
            if let Err(e) = self.fulfillment.fulfill(&request).await {
                warn!(
                    redemption_id = %outcome.redemption.id,
                    fulfillment = self.fulfillment.name(),
                    error = %e,
                    "Fulfillment hand-off failed, redemption stays pending"
                );
            }
        }
        Ok(outcome)
    }

    async fn apply(
        tx: &mut dyn EconomyTx,
        user_id: &str,
        item: &StoreItem,
        cost: i64,
        country_code: Option<&str>,
    ) -> Result<RedeemOutcome> {
        ledger::require_active(tx, user_id).await?;
        let reason = format!("redeem:{}", item.id);
        let mut balance = ledger::debit_in(tx, user_id, cost, &reason).await?;

        let status = match &item.kind {
            ItemKind::GiftCard => RedemptionStatus::Pending,
            ItemKind::StreakSaver => {
                tx.add_streak_savers(user_id, 1).await?;
                RedemptionStatus::Completed
            }
            ItemKind::TokenPack { tokens } => {
                balance = ledger::adjust_tokens_in(tx, user_id, *tokens, &reason).await?;
                RedemptionStatus::Completed
            }
        };

        let redemption = Redemption {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            item_id: item.id.clone(),
            item_kind: item.kind.as_str().to_string(),
            cost_credits: cost,
            country_code: country_code.map(|c| c.trim().to_ascii_uppercase()),
            status,
            created_at: now(),
        };
        tx.insert_redemption(&redemption).await?;
        Ok(RedeemOutcome {
            redemption,
            balance,
        })
    }

    /// Redemptions for a user, newest first.
    pub async fn redemptions(&self, user_id: &str) -> Result<Vec<Redemption>> {
        let mut tx = self.store.begin().await?;
        let result = tx.redemptions(user_id).await.map_err(Into::into);
        finish(tx, result).await
    }
}
