//! Persistence for the economy.
//!
//! A store hands out transactions; one transaction is one atomic unit. Every
//! service operation begins a transaction, performs its reads, conditional
//! updates and inserts through [`EconomyTx`], then commits. Any error before
//! commit rolls the whole unit back, so a debit never survives without the
//! record that explains it.
//!
//! Implementations:
//! - `SqliteEconomyStore`: SQLite via sqlx, `BEGIN IMMEDIATE` transactions
//! - `MockEconomyStore`: in-memory, for tests and local tooling

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::config::{StorageConfig, StorageType};
use crate::model::{
    Account, Balance, Device, EarnEvent, EntryType, FraudFlag, GiveawayDraw, GiveawayEntry,
    JackpotPool, JackpotSpin, JournalEntry, MysteryBagOpening, Redemption, Streak,
};

pub mod helpers;
pub mod mock;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MockEconomyStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEconomyStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("JSON column error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transaction already finished")]
    TransactionClosed,

    /// An amount would leave the 64-bit range of its column.
    #[error("Arithmetic overflow: {0}")]
    Overflow(String),

    /// Failure injected by the in-memory store.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StorageError {
    pub fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        Self::Corrupt {
            table,
            detail: detail.into(),
        }
    }

    /// Busy/locked databases, pool exhaustion and dropped connections.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
                // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
                sqlx::Error::Database(db) => db
                    .code()
                    .and_then(|c| c.parse::<i32>().ok())
                    .map(|c| matches!(c & 0xff, 5 | 6))
                    .unwrap_or(false),
                _ => false,
            },
            Self::Io(_) | Self::Injected(_) => true,
            _ => false,
        }
    }
}

/// One atomic unit of work against the store.
///
/// Balance primitives are conditional: they return `None` instead of
/// writing when the condition (account exists, funds suffice) fails, and
/// the caller decides which error to surface. Every successful balance
/// change appends a journal row inside the same transaction.
#[async_trait]
pub trait EconomyTx: Send {
    // --- accounts and ledger ---

    /// Create a zero balance. Returns false if the account already exists.
    async fn open_account(&mut self, user_id: &str) -> Result<bool>;

    async fn account(&mut self, user_id: &str) -> Result<Option<Account>>;

    /// Returns false if the account does not exist.
    async fn set_banned(&mut self, user_id: &str, banned: bool) -> Result<bool>;

    /// `credits += amount`, `lifetime_earned += amount`.
    async fn credit(&mut self, user_id: &str, amount: i64, reason: &str)
        -> Result<Option<Balance>>;

    /// `credits -= amount`, `lifetime_spent += amount`, only if
    /// `credits >= amount`.
    async fn debit(&mut self, user_id: &str, amount: i64, reason: &str) -> Result<Option<Balance>>;

    /// `tokens += delta`, only if the result stays non-negative.
    async fn adjust_tokens(
        &mut self,
        user_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<Option<Balance>>;

    /// Journal rows for a user, newest first.
    async fn journal(&mut self, user_id: &str, limit: u32) -> Result<Vec<JournalEntry>>;

    // --- earn events ---

    /// Insert unless the dedup key is already taken. Returns whether the
    /// row was written.
    async fn insert_earn_event(&mut self, event: &EarnEvent) -> Result<bool>;

    async fn earn_event_by_dedup_key(&mut self, dedup_key: &str) -> Result<Option<EarnEvent>>;

    async fn count_earn_events_since(&mut self, user_id: &str, since: DateTime<Utc>)
        -> Result<u32>;

    // --- streaks ---

    async fn streak(&mut self, user_id: &str) -> Result<Option<Streak>>;

    async fn put_streak(&mut self, streak: &Streak) -> Result<()>;

    /// `streak_savers += count`, creating a fresh streak row if needed.
    async fn add_streak_savers(&mut self, user_id: &str, count: u32) -> Result<Streak>;

    // --- devices and fraud flags ---

    async fn device(&mut self, fingerprint: &str) -> Result<Option<Device>>;

    /// `risk_score += delta`, creating the device row if needed.
    async fn raise_device_risk(&mut self, fingerprint: &str, delta: u32) -> Result<Device>;

    async fn set_device_blocked(&mut self, fingerprint: &str, blocked: bool) -> Result<Device>;

    async fn insert_fraud_flag(&mut self, flag: &FraudFlag) -> Result<()>;

    async fn fraud_flags(&mut self, user_id: &str) -> Result<Vec<FraudFlag>>;

    // --- jackpot ---

    async fn jackpot_pool(&mut self) -> Result<JackpotPool>;

    async fn contribute_to_pool(&mut self, amount: i64) -> Result<JackpotPool>;

    /// `pool_tokens -= amount` only if the pool holds at least `amount`.
    async fn pay_from_pool(&mut self, amount: i64, winner_id: &str)
        -> Result<Option<JackpotPool>>;

    async fn insert_spin(&mut self, spin: &JackpotSpin) -> Result<()>;

    /// Spins for a user, newest first.
    async fn spins(&mut self, user_id: &str, limit: u32) -> Result<Vec<JackpotSpin>>;

    // --- mystery bags ---

    async fn insert_bag_opening(&mut self, opening: &MysteryBagOpening) -> Result<()>;

    // --- giveaways ---

    /// `count += n` for one `(giveaway, user, entry_type)` row. Returns the
    /// new count, or `None` without writing if it would exceed `cap`.
    async fn add_entries(
        &mut self,
        giveaway_id: &str,
        user_id: &str,
        entry_type: EntryType,
        n: u32,
        cap: Option<u32>,
    ) -> Result<Option<u32>>;

    /// Live entries for a giveaway, ordered by user then entry type. With
    /// `before`, only rows first written before that instant.
    async fn giveaway_entries(
        &mut self,
        giveaway_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<GiveawayEntry>>;

    async fn user_entries(&mut self, giveaway_id: &str, user_id: &str)
        -> Result<Vec<GiveawayEntry>>;

    /// Copy live entries to the archive under `draw_id`, then clear them.
    /// `before` limits both steps to the rows `giveaway_entries` returns.
    async fn archive_entries(
        &mut self,
        giveaway_id: &str,
        draw_id: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64>;

    async fn archived_entries(&mut self, draw_id: Uuid) -> Result<Vec<GiveawayEntry>>;

    async fn last_draw(&mut self, giveaway_id: &str) -> Result<Option<GiveawayDraw>>;

    async fn insert_draw(&mut self, draw: &GiveawayDraw) -> Result<()>;

    /// Completed draws, newest first.
    async fn draws(&mut self, giveaway_id: &str) -> Result<Vec<GiveawayDraw>>;

    // --- redemptions ---

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()>;

    /// Redemptions for a user, newest first.
    async fn redemptions(&mut self, user_id: &str) -> Result<Vec<Redemption>>;

    // --- completion ---

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Factory for transactions.
#[async_trait]
pub trait EconomyStore: Send + Sync {
    /// Begin an atomic unit. Writers are serialized from here until
    /// commit or rollback.
    async fn begin(&self) -> Result<Box<dyn EconomyTx>>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> Result<Arc<dyn EconomyStore>> {
    info!(storage_type = ?config.storage_type, path = %config.path, "Initializing storage");

    match config.storage_type {
        StorageType::Memory => Ok(Arc::new(MockEconomyStore::new())),
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let store = SqliteEconomyStore::connect(&config.path, config.max_connections).await?;
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "sqlite feature not enabled",
            )))
        }
    }
}
