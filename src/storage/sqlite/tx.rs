//! SQLite transaction implementing every economy primitive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{
    Alias, Condition, Expr, OnConflict, Order, Query, SelectStatement, SqliteQueryBuilder,
};
use sea_query_binder::SqlxBinder;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection};
use tracing::warn;
use uuid::Uuid;

use crate::model::{
    Account, Asset, Balance, BagPrize, DeliveryStatus, Device, EarnEvent, EarnType, EntryType,
    FraudFlag, GiveawayDraw, GiveawayEntry, JackpotPool, JackpotSpin, JournalEntry,
    MysteryBagOpening, Redemption, RedemptionStatus, Severity, Streak,
};
use crate::storage::helpers::{
    format_date, format_ts, now, parse_date, parse_text, parse_ts, to_u32,
};
use crate::storage::schema::{
    Accounts, Devices, EarnEvents, FraudFlags, GiveawayDraws, GiveawayEntries,
    GiveawayEntriesArchive, JackpotPool as PoolTable, JackpotSpins, LedgerJournal, MysteryBagOpenings, Redemptions,
    Rowid, Streaks,
};
use crate::storage::{EconomyTx, Result, StorageError};

/// A pooled connection inside `BEGIN IMMEDIATE`.
///
/// Dropping an unfinished transaction detaches the connection from the pool
/// and closes it, which rolls the transaction back.
pub struct SqliteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl SqliteTx {
    pub(super) async fn begin(mut conn: PoolConnection<Sqlite>) -> Result<Self> {
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or(StorageError::TransactionClosed)
    }

    async fn execute<S: SqlxBinder + Sync>(&mut self, stmt: &S) -> Result<u64> {
        let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
        let done = sqlx::query_with(&sql, values)
            .execute(self.conn()?)
            .await?;
        Ok(done.rows_affected())
    }

    async fn fetch_optional(&mut self, stmt: &SelectStatement) -> Result<Option<SqliteRow>> {
        let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
        Ok(sqlx::query_with(&sql, values)
            .fetch_optional(self.conn()?)
            .await?)
    }

    async fn fetch_all(&mut self, stmt: &SelectStatement) -> Result<Vec<SqliteRow>> {
        let (sql, values) = stmt.build_sqlx(SqliteQueryBuilder);
        Ok(sqlx::query_with(&sql, values)
            .fetch_all(self.conn()?)
            .await?)
    }

    async fn append_journal(
        &mut self,
        user_id: &str,
        asset: Asset,
        delta: i64,
        reason: &str,
        balance_after: i64,
    ) -> Result<()> {
        let stmt = Query::insert()
            .into_table(LedgerJournal::Table)
            .columns([
                LedgerJournal::Id,
                LedgerJournal::UserId,
                LedgerJournal::Asset,
                LedgerJournal::Delta,
                LedgerJournal::Reason,
                LedgerJournal::BalanceAfter,
                LedgerJournal::CreatedAt,
            ])
            .values_panic([
                Uuid::new_v4().to_string().into(),
                user_id.into(),
                asset.as_str().into(),
                delta.into(),
                reason.into(),
                balance_after.into(),
                format_ts(&now()).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    /// Run a conditional balance update, then journal the change.
    /// Reject a mutation whose result would leave the 64-bit column range.
    /// SQLite would otherwise promote the sum to REAL.
    async fn ensure_headroom(&mut self, user_id: &str, asset: Asset, delta: i64) -> Result<()> {
        let Some(account) = self.account(user_id).await? else {
            return Ok(());
        };
        let b = &account.balance;
        let fits = match asset {
            Asset::Credits if delta >= 0 => {
                b.credits.checked_add(delta).is_some() && b.lifetime_earned.checked_add(delta).is_some()
            }
            Asset::Credits => delta
                .checked_neg()
                .and_then(|spent| b.lifetime_spent.checked_add(spent))
                .is_some(),
            Asset::Tokens => b.tokens.checked_add(delta).is_some(),
        };
        if fits {
            Ok(())
        } else {
            Err(StorageError::Overflow(format!("{asset} of {user_id}")))
        }
    }

    async fn apply_balance_update(
        &mut self,
        stmt: sea_query::UpdateStatement,
        user_id: &str,
        asset: Asset,
        delta: i64,
        reason: &str,
    ) -> Result<Option<Balance>> {
        if self.execute(&stmt).await? == 0 {
            return Ok(None);
        }
        let Some(account) = self.account(user_id).await? else {
            return Ok(None);
        };
        let after = match asset {
            Asset::Credits => account.balance.credits,
            Asset::Tokens => account.balance.tokens,
        };
        self.append_journal(user_id, asset, delta, reason, after)
            .await?;
        Ok(Some(account.balance))
    }

    async fn upsert_device(&mut self, device: &Device) -> Result<()> {
        let stmt = Query::insert()
            .into_table(Devices::Table)
            .columns([
                Devices::Fingerprint,
                Devices::RiskScore,
                Devices::IsBlocked,
                Devices::UpdatedAt,
            ])
            .values_panic([
                device.fingerprint.as_str().into(),
                i64::from(device.risk_score).into(),
                device.is_blocked.into(),
                format_ts(&now()).into(),
            ])
            .on_conflict(
                OnConflict::column(Devices::Fingerprint)
                    .update_columns([Devices::RiskScore, Devices::IsBlocked, Devices::UpdatedAt])
                    .to_owned(),
            )
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn device_or_new(&mut self, fingerprint: &str) -> Result<Device> {
        Ok(self.device(fingerprint).await?.unwrap_or_else(|| Device {
            fingerprint: fingerprint.to_string(),
            risk_score: 0,
            is_blocked: false,
        }))
    }

    fn entry_select() -> SelectStatement {
        Query::select()
            .columns([
                GiveawayEntries::GiveawayId,
                GiveawayEntries::UserId,
                GiveawayEntries::EntryType,
                GiveawayEntries::Count,
                GiveawayEntries::CreatedAt,
            ])
            .from(GiveawayEntries::Table)
            .to_owned()
    }

    /// Live entry rows of one giveaway, optionally only those written before `before`.
    fn entries_where(giveaway_id: &str, before: Option<DateTime<Utc>>) -> Condition {
        let mut cond = Condition::all().add(Expr::col(GiveawayEntries::GiveawayId).eq(giveaway_id));
        if let Some(before) = before {
            cond = cond.add(Expr::col(GiveawayEntries::CreatedAt).lt(format_ts(&before)));
        }
        cond
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!("SQLite transaction dropped without commit or rollback; closing connection");
            drop(conn.detach());
        }
    }
}

// --- row decoding ---

fn to_u64(table: &'static str, value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StorageError::corrupt(table, format!("counter out of range: {value}")))
}

fn account_from_row(row: &SqliteRow) -> Result<Account> {
    Ok(Account {
        balance: Balance {
            user_id: row.try_get("user_id")?,
            credits: row.try_get("credits")?,
            tokens: row.try_get("tokens")?,
            lifetime_earned: row.try_get("lifetime_earned")?,
            lifetime_spent: row.try_get("lifetime_spent")?,
        },
        banned: row.try_get("banned")?,
    })
}

fn journal_from_row(row: &SqliteRow) -> Result<JournalEntry> {
    const T: &str = "ledger_journal";
    Ok(JournalEntry {
        id: Uuid::parse_str(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        asset: parse_text(T, row.try_get("asset")?, Asset::parse)?,
        delta: row.try_get("delta")?,
        reason: row.try_get("reason")?,
        balance_after: row.try_get("balance_after")?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn earn_event_from_row(row: &SqliteRow) -> Result<EarnEvent> {
    const T: &str = "earn_events";
    Ok(EarnEvent {
        id: Uuid::parse_str(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        device_id: row.try_get("device_id")?,
        earn_type: parse_text(T, row.try_get("earn_type")?, EarnType::parse)?,
        credits_amount: row.try_get("credits_amount")?,
        dedup_key: row.try_get("dedup_key")?,
        metadata: serde_json::from_str(row.try_get("metadata")?)?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn streak_from_row(row: &SqliteRow) -> Result<Streak> {
    const T: &str = "streaks";
    let last: Option<String> = row.try_get("last_checkin_date")?;
    Ok(Streak {
        user_id: row.try_get("user_id")?,
        current_streak: to_u32(T, row.try_get("current_streak")?)?,
        longest_streak: to_u32(T, row.try_get("longest_streak")?)?,
        last_checkin_date: last.as_deref().map(|d| parse_date(T, d)).transpose()?,
        streak_savers: to_u32(T, row.try_get("streak_savers")?)?,
    })
}

fn device_from_row(row: &SqliteRow) -> Result<Device> {
    Ok(Device {
        fingerprint: row.try_get("fingerprint")?,
        risk_score: to_u32("devices", row.try_get("risk_score")?)?,
        is_blocked: row.try_get("is_blocked")?,
    })
}

fn flag_from_row(row: &SqliteRow) -> Result<FraudFlag> {
    const T: &str = "fraud_flags";
    Ok(FraudFlag {
        id: Uuid::parse_str(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        device_id: row.try_get("device_id")?,
        flag_type: row.try_get("flag_type")?,
        severity: parse_text(T, row.try_get("severity")?, Severity::parse)?,
        reason: row.try_get("reason")?,
        metadata: serde_json::from_str(row.try_get("metadata")?)?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn pool_from_row(row: &SqliteRow) -> Result<JackpotPool> {
    Ok(JackpotPool {
        pool_tokens: row.try_get("pool_tokens")?,
        total_contributed: row.try_get("total_contributed")?,
        total_won: row.try_get("total_won")?,
        last_winner_id: row.try_get("last_winner_id")?,
        last_amount: row.try_get("last_amount")?,
    })
}

fn spin_from_row(row: &SqliteRow) -> Result<JackpotSpin> {
    const T: &str = "jackpot_spins";
    Ok(JackpotSpin {
        id: Uuid::parse_str(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        bet_tokens: row.try_get("bet_tokens")?,
        multiplier_pct: to_u32(T, row.try_get("multiplier_pct")?)?,
        win_tokens: row.try_get("win_tokens")?,
        jackpot: row.try_get("jackpot")?,
        pool_contribution: row.try_get("pool_contribution")?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<GiveawayEntry> {
    const T: &str = "giveaway_entries";
    Ok(GiveawayEntry {
        giveaway_id: row.try_get("giveaway_id")?,
        user_id: row.try_get("user_id")?,
        entry_type: parse_text(T, row.try_get("entry_type")?, EntryType::parse)?,
        count: to_u32(T, row.try_get("count")?)?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn draw_from_row(row: &SqliteRow) -> Result<GiveawayDraw> {
    const T: &str = "giveaway_draws";
    let redemption_id: Option<String> = row.try_get("redemption_id")?;
    Ok(GiveawayDraw {
        id: Uuid::parse_str(row.try_get("id")?)?,
        giveaway_id: row.try_get("giveaway_id")?,
        winner_id: row.try_get("winner_id")?,
        winner_entries: to_u64(T, row.try_get("winner_entries")?)?,
        total_entries: to_u64(T, row.try_get("total_entries")?)?,
        participants: to_u32(T, row.try_get("participants")?)?,
        prize: serde_json::from_str(row.try_get("prize")?)?,
        delivery: parse_text(T, row.try_get("delivery")?, DeliveryStatus::parse)?,
        redemption_id: redemption_id.as_deref().map(Uuid::parse_str).transpose()?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn redemption_from_row(row: &SqliteRow) -> Result<Redemption> {
    const T: &str = "redemptions";
    Ok(Redemption {
        id: Uuid::parse_str(row.try_get("id")?)?,
        user_id: row.try_get("user_id")?,
        item_id: row.try_get("item_id")?,
        item_kind: row.try_get("item_kind")?,
        cost_credits: row.try_get("cost_credits")?,
        country_code: row.try_get("country_code")?,
        status: parse_text(T, row.try_get("status")?, RedemptionStatus::parse)?,
        created_at: parse_ts(T, row.try_get("created_at")?)?,
    })
}

fn i64_of(table: &'static str, value: u64) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::corrupt(table, format!("value out of range: {value}")))
}

#[async_trait]
impl EconomyTx for SqliteTx {
    async fn open_account(&mut self, user_id: &str) -> Result<bool> {
        let stmt = Query::insert()
            .into_table(Accounts::Table)
            .columns([Accounts::UserId, Accounts::CreatedAt])
            .values_panic([user_id.into(), format_ts(&now()).into()])
            .on_conflict(OnConflict::column(Accounts::UserId).do_nothing().to_owned())
            .to_owned();
        Ok(self.execute(&stmt).await? > 0)
    }

    async fn account(&mut self, user_id: &str) -> Result<Option<Account>> {
        let stmt = Query::select()
            .columns([
                Accounts::UserId,
                Accounts::Credits,
                Accounts::Tokens,
                Accounts::LifetimeEarned,
                Accounts::LifetimeSpent,
                Accounts::Banned,
            ])
            .from(Accounts::Table)
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .to_owned();
        self.fetch_optional(&stmt)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }

    async fn set_banned(&mut self, user_id: &str, banned: bool) -> Result<bool> {
        let stmt = Query::update()
            .table(Accounts::Table)
            .value(Accounts::Banned, banned)
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .to_owned();
        Ok(self.execute(&stmt).await? > 0)
    }

    async fn credit(
        &mut self,
        user_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<Option<Balance>> {
        let stmt = Query::update()
            .table(Accounts::Table)
            .value(Accounts::Credits, Expr::col(Accounts::Credits).add(amount))
            .value(
                Accounts::LifetimeEarned,
                Expr::col(Accounts::LifetimeEarned).add(amount),
            )
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .to_owned();
        self.ensure_headroom(user_id, Asset::Credits, amount).await?;
        self.apply_balance_update(stmt, user_id, Asset::Credits, amount, reason)
            .await
    }

    async fn debit(&mut self, user_id: &str, amount: i64, reason: &str) -> Result<Option<Balance>> {
        let stmt = Query::update()
            .table(Accounts::Table)
            .value(Accounts::Credits, Expr::col(Accounts::Credits).sub(amount))
            .value(
                Accounts::LifetimeSpent,
                Expr::col(Accounts::LifetimeSpent).add(amount),
            )
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .and_where(Expr::col(Accounts::Credits).gte(amount))
            .to_owned();
        self.ensure_headroom(user_id, Asset::Credits, -amount).await?;
        self.apply_balance_update(stmt, user_id, Asset::Credits, -amount, reason)
            .await
    }

    async fn adjust_tokens(
        &mut self,
        user_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<Option<Balance>> {
        let required = delta.saturating_neg().max(0);
        let stmt = Query::update()
            .table(Accounts::Table)
            .value(Accounts::Tokens, Expr::col(Accounts::Tokens).add(delta))
            .and_where(Expr::col(Accounts::UserId).eq(user_id))
            .and_where(Expr::col(Accounts::Tokens).gte(required))
            .to_owned();
        self.ensure_headroom(user_id, Asset::Tokens, delta).await?;
        self.apply_balance_update(stmt, user_id, Asset::Tokens, delta, reason)
            .await
    }

    async fn journal(&mut self, user_id: &str, limit: u32) -> Result<Vec<JournalEntry>> {
        let stmt = Query::select()
            .columns([
                LedgerJournal::Id,
                LedgerJournal::UserId,
                LedgerJournal::Asset,
                LedgerJournal::Delta,
                LedgerJournal::Reason,
                LedgerJournal::BalanceAfter,
                LedgerJournal::CreatedAt,
            ])
            .from(LedgerJournal::Table)
            .and_where(Expr::col(LedgerJournal::UserId).eq(user_id))
            .order_by(Rowid, Order::Desc)
            .limit(u64::from(limit))
            .to_owned();
        self.fetch_all(&stmt)
            .await?
            .iter()
            .map(journal_from_row)
            .collect()
    }

    async fn insert_earn_event(&mut self, event: &EarnEvent) -> Result<bool> {
        let stmt = Query::insert()
            .into_table(EarnEvents::Table)
            .columns([
                EarnEvents::Id,
                EarnEvents::UserId,
                EarnEvents::DeviceId,
                EarnEvents::EarnType,
                EarnEvents::CreditsAmount,
                EarnEvents::DedupKey,
                EarnEvents::Metadata,
                EarnEvents::CreatedAt,
            ])
            .values_panic([
                event.id.to_string().into(),
                event.user_id.as_str().into(),
                event.device_id.clone().into(),
                event.earn_type.as_str().into(),
                event.credits_amount.into(),
                event.dedup_key.clone().into(),
                serde_json::to_string(&event.metadata)?.into(),
                format_ts(&event.created_at).into(),
            ])
            .on_conflict(OnConflict::column(EarnEvents::DedupKey).do_nothing().to_owned())
            .to_owned();
        Ok(self.execute(&stmt).await? > 0)
    }

    async fn earn_event_by_dedup_key(&mut self, dedup_key: &str) -> Result<Option<EarnEvent>> {
        let stmt = Query::select()
            .columns([
                EarnEvents::Id,
                EarnEvents::UserId,
                EarnEvents::DeviceId,
                EarnEvents::EarnType,
                EarnEvents::CreditsAmount,
                EarnEvents::DedupKey,
                EarnEvents::Metadata,
                EarnEvents::CreatedAt,
            ])
            .from(EarnEvents::Table)
            .and_where(Expr::col(EarnEvents::DedupKey).eq(dedup_key))
            .to_owned();
        self.fetch_optional(&stmt)
            .await?
            .map(|row| earn_event_from_row(&row))
            .transpose()
    }

    async fn count_earn_events_since(
        &mut self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let stmt = Query::select()
            .expr(Expr::col(EarnEvents::Id).count())
            .from(EarnEvents::Table)
            .and_where(Expr::col(EarnEvents::UserId).eq(user_id))
            .and_where(Expr::col(EarnEvents::CreatedAt).gte(format_ts(&since)))
            .to_owned();
        let count: i64 = match self.fetch_optional(&stmt).await? {
            Some(row) => row.try_get(0)?,
            None => 0,
        };
        to_u32("earn_events", count)
    }

    async fn streak(&mut self, user_id: &str) -> Result<Option<Streak>> {
        let stmt = Query::select()
            .columns([
                Streaks::UserId,
                Streaks::CurrentStreak,
                Streaks::LongestStreak,
                Streaks::LastCheckinDate,
                Streaks::StreakSavers,
            ])
            .from(Streaks::Table)
            .and_where(Expr::col(Streaks::UserId).eq(user_id))
            .to_owned();
        self.fetch_optional(&stmt)
            .await?
            .map(|row| streak_from_row(&row))
            .transpose()
    }

    async fn put_streak(&mut self, streak: &Streak) -> Result<()> {
        let stmt = Query::insert()
            .into_table(Streaks::Table)
            .columns([
                Streaks::UserId,
                Streaks::CurrentStreak,
                Streaks::LongestStreak,
                Streaks::LastCheckinDate,
                Streaks::StreakSavers,
                Streaks::UpdatedAt,
            ])
            .values_panic([
                streak.user_id.as_str().into(),
                i64::from(streak.current_streak).into(),
                i64::from(streak.longest_streak).into(),
                streak.last_checkin_date.map(format_date).into(),
                i64::from(streak.streak_savers).into(),
                format_ts(&now()).into(),
            ])
            .on_conflict(
                OnConflict::column(Streaks::UserId)
                    .update_columns([
                        Streaks::CurrentStreak,
                        Streaks::LongestStreak,
                        Streaks::LastCheckinDate,
                        Streaks::StreakSavers,
                        Streaks::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn add_streak_savers(&mut self, user_id: &str, count: u32) -> Result<Streak> {
        let mut streak = self
            .streak(user_id)
            .await?
            .unwrap_or_else(|| Streak::fresh(user_id));
        streak.streak_savers = streak.streak_savers.saturating_add(count);
        self.put_streak(&streak).await?;
        Ok(streak)
    }

    async fn device(&mut self, fingerprint: &str) -> Result<Option<Device>> {
        let stmt = Query::select()
            .columns([Devices::Fingerprint, Devices::RiskScore, Devices::IsBlocked])
            .from(Devices::Table)
            .and_where(Expr::col(Devices::Fingerprint).eq(fingerprint))
            .to_owned();
        self.fetch_optional(&stmt)
            .await?
            .map(|row| device_from_row(&row))
            .transpose()
    }

    async fn raise_device_risk(&mut self, fingerprint: &str, delta: u32) -> Result<Device> {
        let mut device = self.device_or_new(fingerprint).await?;
        device.risk_score = device.risk_score.saturating_add(delta);
        self.upsert_device(&device).await?;
        Ok(device)
    }

    async fn set_device_blocked(&mut self, fingerprint: &str, blocked: bool) -> Result<Device> {
        let mut device = self.device_or_new(fingerprint).await?;
        device.is_blocked = blocked;
        self.upsert_device(&device).await?;
        Ok(device)
    }

    async fn insert_fraud_flag(&mut self, flag: &FraudFlag) -> Result<()> {
        let stmt = Query::insert()
            .into_table(FraudFlags::Table)
            .columns([
                FraudFlags::Id,
                FraudFlags::UserId,
                FraudFlags::DeviceId,
                FraudFlags::FlagType,
                FraudFlags::Severity,
                FraudFlags::Reason,
                FraudFlags::Metadata,
                FraudFlags::CreatedAt,
            ])
            .values_panic([
                flag.id.to_string().into(),
                flag.user_id.as_str().into(),
                flag.device_id.clone().into(),
                flag.flag_type.as_str().into(),
                flag.severity.as_str().into(),
                flag.reason.as_str().into(),
                serde_json::to_string(&flag.metadata)?.into(),
                format_ts(&flag.created_at).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn fraud_flags(&mut self, user_id: &str) -> Result<Vec<FraudFlag>> {
        let stmt = Query::select()
            .columns([
                FraudFlags::Id,
                FraudFlags::UserId,
                FraudFlags::DeviceId,
                FraudFlags::FlagType,
                FraudFlags::Severity,
                FraudFlags::Reason,
                FraudFlags::Metadata,
                FraudFlags::CreatedAt,
            ])
            .from(FraudFlags::Table)
            .and_where(Expr::col(FraudFlags::UserId).eq(user_id))
            .order_by(Rowid, Order::Desc)
            .to_owned();
        self.fetch_all(&stmt).await?.iter().map(flag_from_row).collect()
    }

    async fn jackpot_pool(&mut self) -> Result<JackpotPool> {
        let stmt = Query::select()
            .columns([
                PoolTable::PoolTokens,
                PoolTable::TotalContributed,
                PoolTable::TotalWon,
                PoolTable::LastWinnerId,
                PoolTable::LastAmount,
            ])
            .from(PoolTable::Table)
            .and_where(Expr::col(PoolTable::Id).eq(1))
            .to_owned();
        match self.fetch_optional(&stmt).await? {
            Some(row) => pool_from_row(&row),
            None => Err(StorageError::corrupt("jackpot_pool", "singleton row missing")),
        }
    }

    async fn contribute_to_pool(&mut self, amount: i64) -> Result<JackpotPool> {
        let stmt = Query::update()
            .table(PoolTable::Table)
            .value(PoolTable::PoolTokens, Expr::col(PoolTable::PoolTokens).add(amount))
            .value(
                PoolTable::TotalContributed,
                Expr::col(PoolTable::TotalContributed).add(amount),
            )
            .and_where(Expr::col(PoolTable::Id).eq(1))
            .to_owned();
        self.execute(&stmt).await?;
        self.jackpot_pool().await
    }

    async fn pay_from_pool(
        &mut self,
        amount: i64,
        winner_id: &str,
    ) -> Result<Option<JackpotPool>> {
        let stmt = Query::update()
            .table(PoolTable::Table)
            .value(PoolTable::PoolTokens, Expr::col(PoolTable::PoolTokens).sub(amount))
            .value(PoolTable::TotalWon, Expr::col(PoolTable::TotalWon).add(amount))
            .value(PoolTable::LastWinnerId, winner_id)
            .value(PoolTable::LastAmount, amount)
            .and_where(Expr::col(PoolTable::Id).eq(1))
            .and_where(Expr::col(PoolTable::PoolTokens).gte(amount))
            .to_owned();
        if self.execute(&stmt).await? == 0 {
            return Ok(None);
        }
        self.jackpot_pool().await.map(Some)
    }

    async fn insert_spin(&mut self, spin: &JackpotSpin) -> Result<()> {
        let stmt = Query::insert()
            .into_table(JackpotSpins::Table)
            .columns([
                JackpotSpins::Id,
                JackpotSpins::UserId,
                JackpotSpins::BetTokens,
                JackpotSpins::MultiplierPct,
                JackpotSpins::WinTokens,
                JackpotSpins::Jackpot,
                JackpotSpins::PoolContribution,
                JackpotSpins::CreatedAt,
            ])
            .values_panic([
                spin.id.to_string().into(),
                spin.user_id.as_str().into(),
                spin.bet_tokens.into(),
                i64::from(spin.multiplier_pct).into(),
                spin.win_tokens.into(),
                spin.jackpot.into(),
                spin.pool_contribution.into(),
                format_ts(&spin.created_at).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn spins(&mut self, user_id: &str, limit: u32) -> Result<Vec<JackpotSpin>> {
        let stmt = Query::select()
            .columns([
                JackpotSpins::Id,
                JackpotSpins::UserId,
                JackpotSpins::BetTokens,
                JackpotSpins::MultiplierPct,
                JackpotSpins::WinTokens,
                JackpotSpins::Jackpot,
                JackpotSpins::PoolContribution,
                JackpotSpins::CreatedAt,
            ])
            .from(JackpotSpins::Table)
            .and_where(Expr::col(JackpotSpins::UserId).eq(user_id))
            .order_by(Rowid, Order::Desc)
            .limit(u64::from(limit))
            .to_owned();
        self.fetch_all(&stmt).await?.iter().map(spin_from_row).collect()
    }

    async fn insert_bag_opening(&mut self, opening: &MysteryBagOpening) -> Result<()> {
        let prize: &BagPrize = &opening.prize;
        let stmt = Query::insert()
            .into_table(MysteryBagOpenings::Table)
            .columns([
                MysteryBagOpenings::Id,
                MysteryBagOpenings::UserId,
                MysteryBagOpenings::PriceCredits,
                MysteryBagOpenings::Prize,
                MysteryBagOpenings::CreatedAt,
            ])
            .values_panic([
                opening.id.to_string().into(),
                opening.user_id.as_str().into(),
                opening.price_credits.into(),
                serde_json::to_string(prize)?.into(),
                format_ts(&opening.created_at).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn add_entries(
        &mut self,
        giveaway_id: &str,
        user_id: &str,
        entry_type: EntryType,
        n: u32,
        cap: Option<u32>,
    ) -> Result<Option<u32>> {
        let select = Query::select()
            .column(GiveawayEntries::Count)
            .from(GiveawayEntries::Table)
            .and_where(Expr::col(GiveawayEntries::GiveawayId).eq(giveaway_id))
            .and_where(Expr::col(GiveawayEntries::UserId).eq(user_id))
            .and_where(Expr::col(GiveawayEntries::EntryType).eq(entry_type.as_str()))
            .to_owned();
        let current = match self.fetch_optional(&select).await? {
            Some(row) => to_u32("giveaway_entries", row.try_get("count")?)?,
            None => 0,
        };
        let next = current.saturating_add(n);
        if cap.is_some_and(|cap| next > cap) {
            return Ok(None);
        }

        let upsert = Query::insert()
            .into_table(GiveawayEntries::Table)
            .columns([
                GiveawayEntries::GiveawayId,
                GiveawayEntries::UserId,
                GiveawayEntries::EntryType,
                GiveawayEntries::Count,
                GiveawayEntries::CreatedAt,
            ])
            .values_panic([
                giveaway_id.into(),
                user_id.into(),
                entry_type.as_str().into(),
                i64::from(next).into(),
                format_ts(&now()).into(),
            ])
            .on_conflict(
                OnConflict::columns([
                    GiveawayEntries::GiveawayId,
                    GiveawayEntries::UserId,
                    GiveawayEntries::EntryType,
                ])
                .update_column(GiveawayEntries::Count)
                .to_owned(),
            )
            .to_owned();
        self.execute(&upsert).await?;
        Ok(Some(next))
    }

    async fn giveaway_entries(
        &mut self,
        giveaway_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<GiveawayEntry>> {
        let stmt = Self::entry_select()
            .cond_where(Self::entries_where(giveaway_id, before))
            .order_by(GiveawayEntries::UserId, Order::Asc)
            .order_by(GiveawayEntries::EntryType, Order::Asc)
            .to_owned();
        self.fetch_all(&stmt).await?.iter().map(entry_from_row).collect()
    }

    async fn user_entries(
        &mut self,
        giveaway_id: &str,
        user_id: &str,
    ) -> Result<Vec<GiveawayEntry>> {
        let stmt = Self::entry_select()
            .and_where(Expr::col(GiveawayEntries::GiveawayId).eq(giveaway_id))
            .and_where(Expr::col(GiveawayEntries::UserId).eq(user_id))
            .order_by(GiveawayEntries::EntryType, Order::Asc)
            .to_owned();
        self.fetch_all(&stmt).await?.iter().map(entry_from_row).collect()
    }

    async fn archive_entries(
        &mut self,
        giveaway_id: &str,
        draw_id: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let rows = Self::entry_select()
            .expr_as(Expr::val(draw_id.to_string()), Alias::new("draw_id"))
            .cond_where(Self::entries_where(giveaway_id, before))
            .to_owned();
        let copy = Query::insert()
            .into_table(GiveawayEntriesArchive::Table)
            .columns([
                GiveawayEntriesArchive::GiveawayId,
                GiveawayEntriesArchive::UserId,
                GiveawayEntriesArchive::EntryType,
                GiveawayEntriesArchive::Count,
                GiveawayEntriesArchive::CreatedAt,
                GiveawayEntriesArchive::DrawId,
            ])
            .select_from(rows)
            .map_err(|e| StorageError::corrupt("giveaway_entries_archive", e.to_string()))?
            .to_owned();
        self.execute(&copy).await?;

        let delete = Query::delete()
            .from_table(GiveawayEntries::Table)
            .cond_where(Self::entries_where(giveaway_id, before))
            .to_owned();
        self.execute(&delete).await
    }

    async fn archived_entries(&mut self, draw_id: Uuid) -> Result<Vec<GiveawayEntry>> {
        let rows = sqlx::query(
            "SELECT giveaway_id, user_id, entry_type, count, created_at \
             FROM giveaway_entries_archive WHERE draw_id = ? \
             ORDER BY user_id, entry_type",
        )
        .bind(draw_id.to_string())
        .fetch_all(self.conn()?)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn last_draw(&mut self, giveaway_id: &str) -> Result<Option<GiveawayDraw>> {
        let stmt = draw_select()
            .and_where(Expr::col(GiveawayDraws::GiveawayId).eq(giveaway_id))
            .order_by(Rowid, Order::Desc)
            .limit(1)
            .to_owned();
        self.fetch_optional(&stmt)
            .await?
            .map(|row| draw_from_row(&row))
            .transpose()
    }

    async fn insert_draw(&mut self, draw: &GiveawayDraw) -> Result<()> {
        const T: &str = "giveaway_draws";
        let stmt = Query::insert()
            .into_table(GiveawayDraws::Table)
            .columns([
                GiveawayDraws::Id,
                GiveawayDraws::GiveawayId,
                GiveawayDraws::WinnerId,
                GiveawayDraws::WinnerEntries,
                GiveawayDraws::TotalEntries,
                GiveawayDraws::Participants,
                GiveawayDraws::Prize,
                GiveawayDraws::Delivery,
                GiveawayDraws::RedemptionId,
                GiveawayDraws::CreatedAt,
            ])
            .values_panic([
                draw.id.to_string().into(),
                draw.giveaway_id.as_str().into(),
                draw.winner_id.as_str().into(),
                i64_of(T, draw.winner_entries)?.into(),
                i64_of(T, draw.total_entries)?.into(),
                i64::from(draw.participants).into(),
                serde_json::to_string(&draw.prize)?.into(),
                draw.delivery.as_str().into(),
                draw.redemption_id.map(|id| id.to_string()).into(),
                format_ts(&draw.created_at).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn draws(&mut self, giveaway_id: &str) -> Result<Vec<GiveawayDraw>> {
        let stmt = draw_select()
            .and_where(Expr::col(GiveawayDraws::GiveawayId).eq(giveaway_id))
            .order_by(Rowid, Order::Desc)
            .to_owned();
        self.fetch_all(&stmt).await?.iter().map(draw_from_row).collect()
    }

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()> {
        let stmt = Query::insert()
            .into_table(Redemptions::Table)
            .columns([
                Redemptions::Id,
                Redemptions::UserId,
                Redemptions::ItemId,
                Redemptions::ItemKind,
                Redemptions::CostCredits,
                Redemptions::CountryCode,
                Redemptions::Status,
                Redemptions::CreatedAt,
            ])
            .values_panic([
                redemption.id.to_string().into(),
                redemption.user_id.as_str().into(),
                redemption.item_id.as_str().into(),
                redemption.item_kind.as_str().into(),
                redemption.cost_credits.into(),
                redemption.country_code.clone().into(),
                redemption.status.as_str().into(),
                format_ts(&redemption.created_at).into(),
            ])
            .to_owned();
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn redemptions(&mut self, user_id: &str) -> Result<Vec<Redemption>> {
        let stmt = Query::select()
            .columns([
                Redemptions::Id,
                Redemptions::UserId,
                Redemptions::ItemId,
                Redemptions::ItemKind,
                Redemptions::CostCredits,
                Redemptions::CountryCode,
                Redemptions::Status,
                Redemptions::CreatedAt,
            ])
            .from(Redemptions::Table)
            .and_where(Expr::col(Redemptions::UserId).eq(user_id))
            .order_by(Rowid, Order::Desc)
            .to_owned();
        self.fetch_all(&stmt)
            .await?
            .iter()
            .map(redemption_from_row)
            .collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let mut conn = this.conn.take().ok_or(StorageError::TransactionClosed)?;
        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            // A failed COMMIT can leave the transaction open on this connection.
            if sqlx::query("ROLLBACK").execute(&mut *conn).await.is_err() {
                drop(conn.detach());
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let mut this = self;
        let mut conn = this.conn.take().ok_or(StorageError::TransactionClosed)?;
        if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            drop(conn.detach());
            return Err(e.into());
        }
        Ok(())
    }
}

fn draw_select() -> SelectStatement {
    Query::select()
        .columns([
            GiveawayDraws::Id,
            GiveawayDraws::GiveawayId,
            GiveawayDraws::WinnerId,
            GiveawayDraws::WinnerEntries,
            GiveawayDraws::TotalEntries,
            GiveawayDraws::Participants,
            GiveawayDraws::Prize,
            GiveawayDraws::Delivery,
            GiveawayDraws::RedemptionId,
            GiveawayDraws::CreatedAt,
        ])
        .from(GiveawayDraws::Table)
        .to_owned()
}
