//! In-memory store for testing.
//!
//! All state sits behind one async mutex. A transaction holds the lock for
//! its whole lifetime and works on a private copy, which replaces the shared
//! state only on commit. Dropping a transaction discards its copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::helpers::now;
use super::{EconomyStore, EconomyTx, Result, StorageError};
use crate::model::{
    Account, Asset, Balance, Device, EarnEvent, EntryType, FraudFlag, GiveawayDraw,
    GiveawayEntry, JackpotPool, JackpotSpin, JournalEntry, MysteryBagOpening, Redemption, Streak,
};

/// Key for live giveaway entries: (giveaway, user, entry type).
type EntryKey = (String, String, EntryType);

/// Live entry counter and the time its row was first written.
#[derive(Debug, Clone, Copy)]
pub struct EntryCount {
    pub count: u32,
    pub created_at: DateTime<Utc>,
}

/// Everything the in-memory store holds.
#[derive(Debug, Clone, Default)]
pub struct MockState {
    pub accounts: HashMap<String, Account>,
    pub journal: Vec<JournalEntry>,
    pub earn_events: Vec<EarnEvent>,
    pub streaks: HashMap<String, Streak>,
    pub devices: HashMap<String, Device>,
    pub fraud_flags: Vec<FraudFlag>,
    pub pool: JackpotPool,
    pub spins: Vec<JackpotSpin>,
    pub bag_openings: Vec<MysteryBagOpening>,
    pub entries: BTreeMap<EntryKey, EntryCount>,
    pub archived_entries: Vec<(Uuid, GiveawayEntry)>,
    pub draws: Vec<GiveawayDraw>,
    pub redemptions: Vec<Redemption>,
}

/// Mock economy store that keeps everything in memory.
#[derive(Default)]
pub struct MockEconomyStore {
    state: Arc<Mutex<MockState>>,
    fail_on_commit: RwLock<bool>,
}

impl MockEconomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent commit fail (and therefore roll back).
    pub async fn set_fail_on_commit(&self, fail: bool) {
        *self.fail_on_commit.write().await = fail;
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> MockState {
        self.state.lock().await.clone()
    }

    /// Move the write time of a giveaway's live entries back by `by`.
    pub async fn backdate_entries(&self, giveaway_id: &str, by: TimeDelta) {
        let mut state = self.state.lock().await;
        for ((giveaway, _, _), row) in state.entries.iter_mut() {
            if giveaway == giveaway_id {
                row.created_at -= by;
            }
        }
    }
}

#[async_trait]
impl EconomyStore for MockEconomyStore {
    async fn begin(&self) -> Result<Box<dyn EconomyTx>> {
        let fail_on_commit = *self.fail_on_commit.read().await;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MockTx {
            guard,
            work,
            fail_on_commit,
        }))
    }
}

/// Transaction over a private copy of the state.
pub struct MockTx {
    guard: OwnedMutexGuard<MockState>,
    work: MockState,
    fail_on_commit: bool,
}

impl MockTx {
    fn journal_entry(&mut self, user_id: &str, asset: Asset, delta: i64, reason: &str, after: i64) {
        self.work.journal.push(JournalEntry {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            asset,
            delta,
            reason: reason.to_string(),
            balance_after: after,
            created_at: now(),
        });
    }

    fn entry_rows<'a>(
        &'a self,
        pred: impl Fn(&EntryKey, &EntryCount) -> bool + 'a,
    ) -> impl Iterator<Item = GiveawayEntry> + 'a {
        self.work
            .entries
            .iter()
            .filter(move |(key, row)| pred(key, row))
            .map(|((giveaway_id, user_id, entry_type), row)| GiveawayEntry {
                giveaway_id: giveaway_id.clone(),
                user_id: user_id.clone(),
                entry_type: *entry_type,
                count: row.count,
                created_at: row.created_at,
            })
    }
}

fn written_before(row: &EntryCount, before: Option<DateTime<Utc>>) -> bool {
    before.map_or(true, |t| row.created_at < t)
}

#[async_trait]
impl EconomyTx for MockTx {
    async fn open_account(&mut self, user_id: &str) -> Result<bool> {
        if self.work.accounts.contains_key(user_id) {
            return Ok(false);
        }
        self.work.accounts.insert(
            user_id.to_string(),
            Account {
                balance: Balance::empty(user_id),
                banned: false,
            },
        );
        Ok(true)
    }

    async fn account(&mut self, user_id: &str) -> Result<Option<Account>> {
        Ok(self.work.accounts.get(user_id).cloned())
    }

    async fn set_banned(&mut self, user_id: &str, banned: bool) -> Result<bool> {
        match self.work.accounts.get_mut(user_id) {
            Some(account) => {
                account.banned = banned;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn credit(
        &mut self,
        user_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<Option<Balance>> {
        let Some(account) = self.work.accounts.get_mut(user_id) else {
            return Ok(None);
        };
        let (Some(credits), Some(earned)) = (
            account.balance.credits.checked_add(amount),
            account.balance.lifetime_earned.checked_add(amount),
        ) else {
            return Err(StorageError::Overflow(format!("credits of {user_id}")));
        };
        account.balance.credits = credits;
        account.balance.lifetime_earned = earned;
        let balance = account.balance.clone();
        self.journal_entry(user_id, Asset::Credits, amount, reason, balance.credits);
        Ok(Some(balance))
    }

    async fn debit(&mut self, user_id: &str, amount: i64, reason: &str) -> Result<Option<Balance>> {
        let Some(account) = self.work.accounts.get_mut(user_id) else {
            return Ok(None);
        };
        if account.balance.credits < amount {
            return Ok(None);
        }
        let Some(spent) = account.balance.lifetime_spent.checked_add(amount) else {
            return Err(StorageError::Overflow(format!("lifetime spend of {user_id}")));
        };
        account.balance.credits -= amount;
        account.balance.lifetime_spent = spent;
        let balance = account.balance.clone();
        self.journal_entry(user_id, Asset::Credits, -amount, reason, balance.credits);
        Ok(Some(balance))
    }

    async fn adjust_tokens(
        &mut self,
        user_id: &str,
        delta: i64,
        reason: &str,
    ) -> Result<Option<Balance>> {
        let Some(account) = self.work.accounts.get_mut(user_id) else {
            return Ok(None);
        };
        let Some(tokens) = account.balance.tokens.checked_add(delta) else {
            return Err(StorageError::Overflow(format!("tokens of {user_id}")));
        };
        if tokens < 0 {
            return Ok(None);
        }
        account.balance.tokens = tokens;
        let balance = account.balance.clone();
        self.journal_entry(user_id, Asset::Tokens, delta, reason, balance.tokens);
        Ok(Some(balance))
    }

    async fn journal(&mut self, user_id: &str, limit: u32) -> Result<Vec<JournalEntry>> {
        Ok(self
            .work
            .journal
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_earn_event(&mut self, event: &EarnEvent) -> Result<bool> {
        if let Some(key) = &event.dedup_key {
            if self
                .work
                .earn_events
                .iter()
                .any(|e| e.dedup_key.as_deref() == Some(key.as_str()))
            {
                return Ok(false);
            }
        }
        self.work.earn_events.push(event.clone());
        Ok(true)
    }

    async fn earn_event_by_dedup_key(&mut self, dedup_key: &str) -> Result<Option<EarnEvent>> {
        Ok(self
            .work
            .earn_events
            .iter()
            .find(|e| e.dedup_key.as_deref() == Some(dedup_key))
            .cloned())
    }

    async fn count_earn_events_since(
        &mut self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let count = self
            .work
            .earn_events
            .iter()
            .filter(|e| e.user_id == user_id && e.created_at >= since)
            .count();
        Ok(count as u32)
    }

    async fn streak(&mut self, user_id: &str) -> Result<Option<Streak>> {
        Ok(self.work.streaks.get(user_id).cloned())
    }

    async fn put_streak(&mut self, streak: &Streak) -> Result<()> {
        self.work
            .streaks
            .insert(streak.user_id.clone(), streak.clone());
        Ok(())
    }

    async fn add_streak_savers(&mut self, user_id: &str, count: u32) -> Result<Streak> {
        let streak = self
            .work
            .streaks
            .entry(user_id.to_string())
            .or_insert_with(|| Streak::fresh(user_id));
        streak.streak_savers += count;
        Ok(streak.clone())
    }

    async fn device(&mut self, fingerprint: &str) -> Result<Option<Device>> {
        Ok(self.work.devices.get(fingerprint).cloned())
    }

    async fn raise_device_risk(&mut self, fingerprint: &str, delta: u32) -> Result<Device> {
        let device = self
            .work
            .devices
            .entry(fingerprint.to_string())
            .or_insert_with(|| Device {
                fingerprint: fingerprint.to_string(),
                risk_score: 0,
                is_blocked: false,
            });
        device.risk_score = device.risk_score.saturating_add(delta);
        Ok(device.clone())
    }

    async fn set_device_blocked(&mut self, fingerprint: &str, blocked: bool) -> Result<Device> {
        let device = self
            .work
            .devices
            .entry(fingerprint.to_string())
            .or_insert_with(|| Device {
                fingerprint: fingerprint.to_string(),
                risk_score: 0,
                is_blocked: false,
            });
        device.is_blocked = blocked;
        Ok(device.clone())
    }

    async fn insert_fraud_flag(&mut self, flag: &FraudFlag) -> Result<()> {
        self.work.fraud_flags.push(flag.clone());
        Ok(())
    }

    async fn fraud_flags(&mut self, user_id: &str) -> Result<Vec<FraudFlag>> {
        Ok(self
            .work
            .fraud_flags
            .iter()
            .rev()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn jackpot_pool(&mut self) -> Result<JackpotPool> {
        Ok(self.work.pool.clone())
    }

    async fn contribute_to_pool(&mut self, amount: i64) -> Result<JackpotPool> {
        self.work.pool.pool_tokens += amount;
        self.work.pool.total_contributed += amount;
        Ok(self.work.pool.clone())
    }

    async fn pay_from_pool(
        &mut self,
        amount: i64,
        winner_id: &str,
    ) -> Result<Option<JackpotPool>> {
        let pool = &mut self.work.pool;
        if pool.pool_tokens < amount {
            return Ok(None);
        }
        pool.pool_tokens -= amount;
        pool.total_won += amount;
        pool.last_winner_id = Some(winner_id.to_string());
        pool.last_amount = amount;
        Ok(Some(pool.clone()))
    }

    async fn insert_spin(&mut self, spin: &JackpotSpin) -> Result<()> {
        self.work.spins.push(spin.clone());
        Ok(())
    }

    async fn spins(&mut self, user_id: &str, limit: u32) -> Result<Vec<JackpotSpin>> {
        Ok(self
            .work
            .spins
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_bag_opening(&mut self, opening: &MysteryBagOpening) -> Result<()> {
        self.work.bag_openings.push(opening.clone());
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
        let key = (giveaway_id.to_string(), user_id.to_string(), entry_type);
        let current = self.work.entries.get(&key).copied();
        let next = current.map_or(0, |row| row.count).saturating_add(n);
        if cap.is_some_and(|cap| next > cap) {
            return Ok(None);
        }
        let created_at = current.map_or_else(now, |row| row.created_at);
        self.work.entries.insert(
            key,
            EntryCount {
                count: next,
                created_at,
            },
        );
        Ok(Some(next))
    }

    async fn giveaway_entries(
        &mut self,
        giveaway_id: &str,
        before: Option<DateTime<Utc>>,
    ) -> Result<Vec<GiveawayEntry>> {
        Ok(self
            .entry_rows(|(g, _, _), row| g == giveaway_id && written_before(row, before))
            .collect())
    }

    async fn user_entries(
        &mut self,
        giveaway_id: &str,
        user_id: &str,
    ) -> Result<Vec<GiveawayEntry>> {
        Ok(self
            .entry_rows(|(g, u, _), _| g == giveaway_id && u == user_id)
            .collect())
    }

    async fn archive_entries(
        &mut self,
        giveaway_id: &str,
        draw_id: Uuid,
        before: Option<DateTime<Utc>>,
    ) -> Result<u64> {
        let rows = self.giveaway_entries(giveaway_id, before).await?;
        let archived = rows.len() as u64;
        self.work
            .entries
            .retain(|(g, _, _), row| g.as_str() != giveaway_id || !written_before(row, before));
        self.work
            .archived_entries
            .extend(rows.into_iter().map(|row| (draw_id, row)));
        Ok(archived)
    }

    async fn archived_entries(&mut self, draw_id: Uuid) -> Result<Vec<GiveawayEntry>> {
        Ok(self
            .work
            .archived_entries
            .iter()
            .filter(|(id, _)| *id == draw_id)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn last_draw(&mut self, giveaway_id: &str) -> Result<Option<GiveawayDraw>> {
        Ok(self
            .work
            .draws
            .iter()
            .rev()
            .find(|d| d.giveaway_id == giveaway_id)
            .cloned())
    }

    async fn insert_draw(&mut self, draw: &GiveawayDraw) -> Result<()> {
        self.work.draws.push(draw.clone());
        Ok(())
    }

    async fn draws(&mut self, giveaway_id: &str) -> Result<Vec<GiveawayDraw>> {
        Ok(self
            .work
            .draws
            .iter()
            .rev()
            .filter(|d| d.giveaway_id == giveaway_id)
            .cloned()
            .collect())
    }

    async fn insert_redemption(&mut self, redemption: &Redemption) -> Result<()> {
        self.work.redemptions.push(redemption.clone());
        Ok(())
    }

    async fn redemptions(&mut self, user_id: &str) -> Result<Vec<Redemption>> {
        Ok(self
            .work
            .redemptions
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MockTx {
            mut guard,
            work,
            fail_on_commit,
        } = *self;
        if fail_on_commit {
            return Err(StorageError::Injected("commit".to_string()));
        }
        *guard = work;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
