//! SQLite implementation of the economy store.

mod tx;

use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use super::schema::CREATE_SCHEMA;
use super::{EconomyStore, EconomyTx, Result};

pub use tx::SqliteTx;

/// How long a writer waits for the database lock before failing with
/// SQLITE_BUSY.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite implementation of EconomyStore.
pub struct SqliteEconomyStore {
    pool: SqlitePool,
}

impl SqliteEconomyStore {
    /// Create a new SQLite store over an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) a database file in WAL mode.
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::raw_sql(CREATE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EconomyStore for SqliteEconomyStore {
    async fn begin(&self) -> Result<Box<dyn EconomyTx>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(SqliteTx::begin(conn).await?))
    }
}
