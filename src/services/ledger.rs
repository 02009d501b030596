//! Ledger: the only path by which balances change.
//!
//! The `*_in` functions run inside a caller's transaction so a balance change
//! and the record that explains it commit together. The store primitives are
//! conditional updates; these wrappers turn a refused update into the right
//! error.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{EconomyError, Result};
use crate::model::{Account, Balance, JournalEntry};
use crate::services::finish;
use crate::storage::{EconomyStore, EconomyTx};

pub(crate) async fn require_account(tx: &mut dyn EconomyTx, user_id: &str) -> Result<Account> {
    tx.account(user_id)
        .await?
        .ok_or_else(|| EconomyError::not_found("account", user_id))
}

/// Account that exists and is not banned.
pub(crate) async fn require_active(tx: &mut dyn EconomyTx, user_id: &str) -> Result<Account> {
    let account = require_account(tx, user_id).await?;
    if account.banned {
        return Err(EconomyError::BannedAccount(user_id.to_string()));
    }
    Ok(account)
}

pub async fn credit_in(
    tx: &mut dyn EconomyTx,
    user_id: &str,
    amount: i64,
    reason: &str,
) -> Result<Balance> {
    if amount <= 0 {
        return Err(EconomyError::validation(format!(
            "credit amount must be positive, got {amount}"
        )));
    }
    let balance = tx
        .credit(user_id, amount, reason)
        .await?
        .ok_or_else(|| EconomyError::not_found("account", user_id))?;
    debug!(%user_id, amount, reason, credits = balance.credits, "Credited");
    Ok(balance)
}

pub async fn debit_in(
    tx: &mut dyn EconomyTx,
    user_id: &str,
    amount: i64,
    reason: &str,
) -> Result<Balance> {
    if amount <= 0 {
        return Err(EconomyError::validation(format!(
            "debit amount must be positive, got {amount}"
        )));
    }
    if let Some(balance) = tx.debit(user_id, amount, reason).await? {
        debug!(%user_id, amount, reason, credits = balance.credits, "Debited");
        return Ok(balance);
    }
    let account = require_account(tx, user_id).await?;
    Err(EconomyError::InsufficientBalance {
        requested: amount,
        available: account.balance.credits,
    })
}

pub async fn adjust_tokens_in(
    tx: &mut dyn EconomyTx,
    user_id: &str,
    delta: i64,
    reason: &str,
) -> Result<Balance> {
    if delta == 0 {
        return Err(EconomyError::validation("token delta must be non-zero"));
    }
    if let Some(balance) = tx.adjust_tokens(user_id, delta, reason).await? {
        debug!(%user_id, delta, reason, tokens = balance.tokens, "Tokens adjusted");
        return Ok(balance);
    }
    let account = require_account(tx, user_id).await?;
    Err(EconomyError::InsufficientTokens {
        requested: delta.saturating_neg(),
        available: account.balance.tokens,
    })
}

/// Stand-alone ledger operations, one unit each.
pub struct Ledger {
    store: Arc<dyn EconomyStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn EconomyStore>) -> Self {
        Self { store }
    }

    /// Create a zero balance. Opening an existing account returns its balance.
    pub async fn open_account(&self, user_id: &str) -> Result<Balance> {
        if user_id.trim().is_empty() {
            return Err(EconomyError::validation("user id must not be empty"));
        }
        let mut tx = self.store.begin().await?;
        let result = async {
            if tx.open_account(user_id).await? {
                info!(%user_id, "Account opened");
            }
            Ok(require_account(tx.as_mut(), user_id).await?.balance)
        }
        .await;
        finish(tx, result).await
    }

    pub async fn set_banned(&self, user_id: &str, banned: bool) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = match tx.set_banned(user_id, banned).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EconomyError::not_found("account", user_id)),
            Err(e) => Err(e.into()),
        };
        finish(tx, result).await?;
        info!(%user_id, banned, "Account ban status changed");
        Ok(())
    }

    pub async fn account(&self, user_id: &str) -> Result<Account> {
        let mut tx = self.store.begin().await?;
        let result = require_account(tx.as_mut(), user_id).await;
        finish(tx, result).await
    }

    pub async fn balance(&self, user_id: &str) -> Result<Balance> {
        Ok(self.account(user_id).await?.balance)
    }

    pub async fn credit(&self, user_id: &str, amount: i64, reason: &str) -> Result<Balance> {
        let mut tx = self.store.begin().await?;
        let result = credit_in(tx.as_mut(), user_id, amount, reason).await;
        finish(tx, result).await
    }

    pub async fn debit(&self, user_id: &str, amount: i64, reason: &str) -> Result<Balance> {
        let mut tx = self.store.begin().await?;
        let result = debit_in(tx.as_mut(), user_id, amount, reason).await;
        finish(tx, result).await
    }

    pub async fn adjust_tokens(&self, user_id: &str, delta: i64, reason: &str) -> Result<Balance> {
        let mut tx = self.store.begin().await?;
        let result = adjust_tokens_in(tx.as_mut(), user_id, delta, reason).await;
        finish(tx, result).await
    }

    /// Journal rows for a user, newest first.
    pub async fn journal(&self, user_id: &str, limit: u32) -> Result<Vec<JournalEntry>> {
        let mut tx = self.store.begin().await?;
        let result = tx.journal(user_id, limit).await.map_err(Into::into);
        finish(tx, result).await
    }
}
