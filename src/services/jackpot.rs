//! Jackpot spins.
//!
//! Stake debit, draw, pool settlement, winnings credit and the spin record
//! are one unit: an interrupted spin never keeps the stake without its
//! recorded outcome.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::config::JackpotConfig;
use crate::error::{EconomyError, Result};
use crate::model::{Balance, JackpotPool, JackpotSpin};
use crate::sampling::{RandomSource, WeightedTable};
use crate::services::{finish, ledger};
use crate::storage::helpers::now;
use crate::storage::{EconomyStore, EconomyTx};

#[derive(Debug, Clone)]
pub struct SpinOutcome {
    pub spin: JackpotSpin,
    pub balance: Balance,
    pub pool: JackpotPool,
}

pub struct JackpotService {
    store: Arc<dyn EconomyStore>,
    config: JackpotConfig,
    table: WeightedTable<u32>,
    random: Arc<dyn RandomSource>,
}

/// `floor(amount * fraction)`, never negative.
fn fraction_of(amount: i64, fraction: f64) -> i64 {
    ((amount as f64) * fraction).floor().max(0.0) as i64
}

impl JackpotService {
    pub fn new(
        store: Arc<dyn EconomyStore>,
        config: JackpotConfig,
        random: Arc<dyn RandomSource>,
    ) -> Result<Self> {
        let table = WeightedTable::new(
            config
                .table
                .iter()
                .map(|row| (row.multiplier_pct, row.weight)),
        )
        .map_err(|e| EconomyError::validation(format!("jackpot table: {e}")))?;
        Ok(Self {
            store,
            config,
            table,
            random,
        })
    }

    pub async fn spin(&self, user_id: &str, bet_tokens: i64) -> Result<SpinOutcome> {
        if !(self.config.min_bet..=self.config.max_bet).contains(&bet_tokens) {
            return Err(EconomyError::validation(format!(
                "bet must be between {} and {} tokens, got {bet_tokens}",
                self.config.min_bet, self.config.max_bet
            )));
        }

        let mut tx = self.store.begin().await?;
        let result = self.settle(tx.as_mut(), user_id, bet_tokens).await;
        let outcome = finish(tx, result).await?;

        info!(
            %user_id,
            bet = bet_tokens,
            win = outcome.spin.win_tokens,
            jackpot = outcome.spin.jackpot,
            pool = outcome.pool.pool_tokens,
            "Jackpot spin settled"
        );
        Ok(outcome)
    }

    async fn settle(&self, tx: &mut dyn EconomyTx, user_id: &str, bet: i64) -> Result<SpinOutcome> {
        ledger::require_active(tx, user_id).await?;
        ledger::adjust_tokens_in(tx, user_id, -bet, "jackpot_bet").await?;

        let (win, multiplier_pct, jackpot) = if self.random.chance(self.config.jackpot_probability) {
            let pool = tx.jackpot_pool().await?;
            let bonus = fraction_of(pool.pool_tokens, self.config.payout_fraction);
            let paid = if bonus > 0 {
                tx.pay_from_pool(bonus, user_id).await?.map_or(0, |_| bonus)
            } else {
                0
            };
            let win = bet.saturating_add(paid);
            let pct = u32::try_from(win.saturating_mul(100) / bet).unwrap_or(u32::MAX);
            (win, pct, true)
        } else {
            let pct = *self.table.sample(self.random.as_ref());
            (bet.saturating_mul(i64::from(pct)) / 100, pct, false)
        };

        let contribution = if win < bet {
            fraction_of(bet - win, self.config.loss_contribution_fraction)
        } else {
            0
        };
        let pool = if contribution > 0 {
            tx.contribute_to_pool(contribution).await?
        } else {
            tx.jackpot_pool().await?
        };

        let balance = if win > 0 {
            let reason = if jackpot { "jackpot_payout" } else { "jackpot_win" };
            ledger::adjust_tokens_in(tx, user_id, win, reason).await?
        } else {
            ledger::require_account(tx, user_id).await?.balance
        };

        let spin = JackpotSpin {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            bet_tokens: bet,
            multiplier_pct,
            win_tokens: win,
            jackpot,
            pool_contribution: contribution,
            created_at: now(),
        };
        tx.insert_spin(&spin).await?;

        Ok(SpinOutcome { spin, balance, pool })
    }

    pub async fn pool(&self) -> Result<JackpotPool> {
        let mut tx = self.store.begin().await?;
        let result = tx.jackpot_pool().await.map_err(Into::into);
        finish(tx, result).await
    }

    /// The user's spins, newest first.
    pub async fn history(&self, user_id: &str, limit: u32) -> Result<Vec<JackpotSpin>> {
        let mut tx = self.store.begin().await?;
        let result = tx.spins(user_id, limit).await.map_err(Into::into);
        finish(tx, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MultiplierWeight;
    use crate::sampling::SeededRandom;
    use crate::services::Ledger;
    use crate::storage::MockEconomyStore;

    /// Fires the jackpot branch on demand; table draws always pick index 0.
    struct Rigged {
        jackpot: bool,
    }

    impl RandomSource for Rigged {
        fn below(&self, _bound: u64) -> u64 {
            0
        }

        fn chance(&self, _p: f64) -> bool {
            self.jackpot
        }
    }

    fn table(rows: &[(u32, u64)]) -> Vec<MultiplierWeight> {
        rows.iter()
            .map(|&(multiplier_pct, weight)| MultiplierWeight {
                multiplier_pct,
                weight,
            })
            .collect()
    }

    async fn setup(config: JackpotConfig, random: Arc<dyn RandomSource>, tokens: i64) -> (Arc<MockEconomyStore>, JackpotService) {
        let store = Arc::new(MockEconomyStore::new());
        let ledger = Ledger::new(store.clone());
        ledger.open_account("u1").await.unwrap();
        ledger.adjust_tokens("u1", tokens, "grant").await.unwrap();
        let service = JackpotService::new(store.clone(), config, random).unwrap();
        (store, service)
    }

    #[tokio::test]
    async fn test_bet_outside_range_is_rejected() {
        let (_, service) = setup(JackpotConfig::default(), Arc::new(SeededRandom::new(1)), 5000).await;
        assert!(matches!(service.spin("u1", 9).await, Err(EconomyError::Validation(_))));
        assert!(matches!(service.spin("u1", 1001).await, Err(EconomyError::Validation(_))));
    }

    #[tokio::test]
    async fn test_total_loss_feeds_pool() {
        let config = JackpotConfig {
            table: table(&[(0, 1)]),
            ..JackpotConfig::default()
        };
        let (_, service) = setup(config, Arc::new(Rigged { jackpot: false }), 500).await;

        let outcome = service.spin("u1", 100).await.unwrap();
        assert_eq!(outcome.spin.win_tokens, 0);
        assert_eq!(outcome.spin.net_tokens(), -100);
        assert_eq!(outcome.spin.pool_contribution, 10);
        assert_eq!(outcome.balance.tokens, 400);
        assert_eq!(outcome.pool.pool_tokens, 10);
        assert_eq!(outcome.pool.total_contributed, 10);
    }

    #[tokio::test]
    async fn test_partial_loss_contributes_fraction_of_loss() {
        let config = JackpotConfig {
            table: table(&[(50, 1)]),
            ..JackpotConfig::default()
        };
        let (_, service) = setup(config, Arc::new(Rigged { jackpot: false }), 500).await;

        let outcome = service.spin("u1", 75).await.unwrap();
        // win 37, loss 38, contribution floor(3.8)
        assert_eq!(outcome.spin.win_tokens, 37);
        assert_eq!(outcome.spin.pool_contribution, 3);
        assert_eq!(outcome.balance.tokens, 500 - 75 + 37);
    }

    #[tokio::test]
    async fn test_win_does_not_touch_pool() {
        let config = JackpotConfig {
            table: table(&[(200, 1)]),
            ..JackpotConfig::default()
        };
        let (_, service) = setup(config, Arc::new(Rigged { jackpot: false }), 100).await;
        let outcome = service.spin("u1", 100).await.unwrap();
        assert_eq!(outcome.balance.tokens, 200);
        assert_eq!(outcome.pool, JackpotPool::default());
    }

    #[tokio::test]
    async fn test_true_jackpot_pays_stake_plus_pool_share() {
        let config = JackpotConfig {
            table: table(&[(0, 1)]),
            ..JackpotConfig::default()
        };
        let store = Arc::new(MockEconomyStore::new());
        let ledger = Ledger::new(store.clone());
        for user in ["u1", "u2"] {
            ledger.open_account(user).await.unwrap();
            ledger.adjust_tokens(user, 1000, "grant").await.unwrap();
        }

        // u2 seeds the pool with ten full losses: 10 * floor(1000 * 0.1)
        let losing = JackpotService::new(store.clone(), config.clone(), Arc::new(Rigged { jackpot: false })).unwrap();
        for _ in 0..10 {
            losing.spin("u2", 100).await.unwrap();
        }
        assert_eq!(losing.pool().await.unwrap().pool_tokens, 100);

        let lucky = JackpotService::new(store, config, Arc::new(Rigged { jackpot: true })).unwrap();
        let outcome = lucky.spin("u1", 100).await.unwrap();
        assert!(outcome.spin.jackpot);
        assert_eq!(outcome.spin.win_tokens, 150);
        assert_eq!(outcome.balance.tokens, 1050);
        assert_eq!(outcome.pool.pool_tokens, 50);
        assert_eq!(outcome.pool.total_won, 50);
        assert_eq!(outcome.pool.last_winner_id.as_deref(), Some("u1"));
        assert_eq!(outcome.pool.last_amount, 50);
    }

    #[tokio::test]
    async fn test_jackpot_on_empty_pool_returns_stake() {
        let (_, service) = setup(JackpotConfig::default(), Arc::new(Rigged { jackpot: true }), 100).await;
        let outcome = service.spin("u1", 100).await.unwrap();
        assert!(outcome.spin.jackpot);
        assert_eq!(outcome.spin.win_tokens, 100);
        assert_eq!(outcome.balance.tokens, 100);
        assert_eq!(outcome.pool.pool_tokens, 0);
    }

    #[tokio::test]
    async fn test_insufficient_tokens_takes_nothing() {
        let (store, service) = setup(JackpotConfig::default(), Arc::new(SeededRandom::new(3)), 50).await;
        assert!(matches!(
            service.spin("u1", 100).await,
            Err(EconomyError::InsufficientTokens { requested: 100, available: 50 })
        ));
        let state = store.snapshot().await;
        assert!(state.spins.is_empty());
        assert_eq!(state.accounts["u1"].balance.tokens, 50);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_stake() {
        let (store, service) = setup(JackpotConfig::default(), Arc::new(SeededRandom::new(3)), 500).await;
        store.set_fail_on_commit(true).await;
        assert!(service.spin("u1", 100).await.is_err());
        store.set_fail_on_commit(false).await;
        let state = store.snapshot().await;
        assert_eq!(state.accounts["u1"].balance.tokens, 500);
        assert!(state.spins.is_empty());
    }

    #[tokio::test]
    async fn test_pool_never_negative_and_history_is_newest_first() {
        let (_, service) = setup(JackpotConfig::default(), Arc::new(SeededRandom::new(42)), 100_000).await;
        for bet in [10, 20, 30, 40, 50] {
            let outcome = service.spin("u1", bet).await.unwrap();
            assert!(outcome.pool.pool_tokens >= 0);
        }
        let history = service.history("u1", 3).await.unwrap();
        assert_eq!(
            history.iter().map(|s| s.bet_tokens).collect::<Vec<_>>(),
            vec![50, 40, 30]
        );
    }
}
