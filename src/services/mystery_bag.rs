//! Mystery bag purchases.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::MysteryBagConfig;
use crate::error::{EconomyError, Result};
use crate::model::{BagPrize, Balance, MysteryBagOpening};
use crate::sampling::{RandomSource, WeightedTable};
use crate::services::{finish, ledger};
use crate::storage::helpers::now;
use crate::storage::{EconomyStore, EconomyTx};

#[derive(Debug, Clone)]
pub struct BagOutcome {
    pub opening: MysteryBagOpening,
    pub balance: Balance,
}

pub struct MysteryBagService {
    store: Arc<dyn EconomyStore>,
    price: i64,
    prizes: WeightedTable<BagPrize>,
    random: Arc<dyn RandomSource>,
}

impl MysteryBagService {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        config: MysteryBagConfig,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let prizes = WeightedTable::new(config.prizes.into_iter().map(|p| (p.prize, p.weight)))
            .map_err(|e| EconomyError::validation(format!("mystery bag prizes: {e}")))?;
        Ok(Self {
            store,
            price: config.price_credits,
            prizes,
            random,
        })
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    /// Debit the price, draw a prize and apply it in one unit.
    pub async fn purchase(&self, user_id: &str) -> Result<BagOutcome> {
        let mut tx = self.store.begin().await?;
        let result = self.open(tx.as_mut(), user_id).await;
        let outcome = finish(tx, result).await?;
        info!(%user_id, price = self.price, prize = ?outcome.opening.prize, "Mystery bag opened");
        Ok(outcome)
    }

    async fn open(&self, tx: &mut dyn EconomyTx, user_id: &str) -> Result<BagOutcome> {
        ledger::require_active(tx, user_id).await?;
        let mut balance = ledger::debit_in(tx, user_id, self.price, "mystery_bag").await?;

        let prize = self.prizes.sample(self.random.as_ref()).clone();
        match &prize {
            BagPrize::Credits { amount } => {
                balance = ledger::credit_in(tx, user_id, *amount, "mystery_bag_prize").await?;
            }
            BagPrize::Tokens { amount } => {
                balance = ledger::adjust_tokens_in(tx, user_id, *amount, "mystery_bag_prize").await?;
            }
            BagPrize::StreakSaver => {
                tx.add_streak_savers(user_id, 1).await?;
            }
        }

        let opening = MysteryBagOpening {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            price_credits: self.price,
            prize,
            created_at: now(),
        };
        tx.insert_bag_opening(&opening).await?;
        Ok(BagOutcome { opening, balance })
    }
}
