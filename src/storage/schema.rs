//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Implicit SQLite row id, used for newest-first ordering.
#[derive(Iden)]
pub struct Rowid;

#[derive(Iden)]
pub enum Accounts {
    Table,
    UserId,
    Credits,
    Tokens,
    LifetimeEarned,
    LifetimeSpent,
    Banned,
    CreatedAt,
}

#[derive(Iden)]
pub enum LedgerJournal {
    Table,
    Id,
    UserId,
    Asset,
    Delta,
    Reason,
    BalanceAfter,
    CreatedAt,
}

#[derive(Iden)]
pub enum EarnEvents {
    Table,
    Id,
    UserId,
    DeviceId,
    EarnType,
    CreditsAmount,
    DedupKey,
    Metadata,
    CreatedAt,
}

#[derive(Iden)]
pub enum Streaks {
    Table,
    UserId,
    CurrentStreak,
    LongestStreak,
    LastCheckinDate,
    StreakSavers,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Devices {
    Table,
    Fingerprint,
    RiskScore,
    IsBlocked,
    UpdatedAt,
}

#[derive(Iden)]
pub enum FraudFlags {
    Table,
    Id,
    UserId,
    DeviceId,
    FlagType,
    Severity,
    Reason,
    Metadata,
    CreatedAt,
}

#[derive(Iden)]
pub enum JackpotPool {
    Table,
    Id,
    PoolTokens,
    TotalContributed,
    TotalWon,
    LastWinnerId,
    LastAmount,
}

#[derive(Iden)]
pub enum JackpotSpins {
    Table,
    Id,
    UserId,
    BetTokens,
    MultiplierPct,
    WinTokens,
    Jackpot,
    PoolContribution,
    CreatedAt,
}

#[derive(Iden)]
pub enum MysteryBagOpenings {
    Table,
    Id,
    UserId,
    PriceCredits,
    Prize,
    CreatedAt,
}

#[derive(Iden)]
pub enum GiveawayEntries {
    Table,
    GiveawayId,
    UserId,
    EntryType,
    Count,
    CreatedAt,
}

#[derive(Iden)]
pub enum GiveawayEntriesArchive {
    Table,
    DrawId,
    GiveawayId,
    UserId,
    EntryType,
    Count,
    CreatedAt,
}

#[derive(Iden)]
pub enum GiveawayDraws {
    Table,
    Id,
    GiveawayId,
    WinnerId,
    WinnerEntries,
    TotalEntries,
    Participants,
    Prize,
    Delivery,
    RedemptionId,
    CreatedAt,
}

#[derive(Iden)]
pub enum Redemptions {
    Table,
    Id,
    UserId,
    ItemId,
    ItemKind,
    CostCredits,
    CountryCode,
    Status,
    CreatedAt,
}

/// SQL for creating every economy table. Idempotent.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    user_id TEXT PRIMARY KEY,
    credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
    tokens INTEGER NOT NULL DEFAULT 0 CHECK (tokens >= 0),
    lifetime_earned INTEGER NOT NULL DEFAULT 0,
    lifetime_spent INTEGER NOT NULL DEFAULT 0,
    banned INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS ledger_journal (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    asset TEXT NOT NULL,
    delta INTEGER NOT NULL,
    reason TEXT NOT NULL,
    balance_after INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ledger_journal_user ON ledger_journal(user_id);

CREATE TABLE IF NOT EXISTS earn_events (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    device_id TEXT,
    earn_type TEXT NOT NULL,
    credits_amount INTEGER NOT NULL,
    dedup_key TEXT UNIQUE,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_earn_events_user_created ON earn_events(user_id, created_at);

CREATE TABLE IF NOT EXISTS streaks (
    user_id TEXT PRIMARY KEY,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    last_checkin_date TEXT,
    streak_savers INTEGER NOT NULL DEFAULT 0 CHECK (streak_savers >= 0),
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS devices (
    fingerprint TEXT PRIMARY KEY,
    risk_score INTEGER NOT NULL DEFAULT 0,
    is_blocked INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fraud_flags (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    device_id TEXT,
    flag_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    reason TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fraud_flags_user ON fraud_flags(user_id);

CREATE TABLE IF NOT EXISTS jackpot_pool (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    pool_tokens INTEGER NOT NULL DEFAULT 0 CHECK (pool_tokens >= 0),
    total_contributed INTEGER NOT NULL DEFAULT 0,
    total_won INTEGER NOT NULL DEFAULT 0,
    last_winner_id TEXT,
    last_amount INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO jackpot_pool (id) VALUES (1);

CREATE TABLE IF NOT EXISTS jackpot_spins (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    bet_tokens INTEGER NOT NULL,
    multiplier_pct INTEGER NOT NULL,
    win_tokens INTEGER NOT NULL,
    jackpot INTEGER NOT NULL,
    pool_contribution INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jackpot_spins_user ON jackpot_spins(user_id);

CREATE TABLE IF NOT EXISTS mystery_bag_openings (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    price_credits INTEGER NOT NULL,
    prize TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS giveaway_entries (
    giveaway_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    count INTEGER NOT NULL CHECK (count >= 0),
    created_at TEXT NOT NULL,
    PRIMARY KEY (giveaway_id, user_id, entry_type)
);

CREATE TABLE IF NOT EXISTS giveaway_entries_archive (
    draw_id TEXT NOT NULL,
    giveaway_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    entry_type TEXT NOT NULL,
    count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_giveaway_entries_archive_draw ON giveaway_entries_archive(draw_id);

CREATE TABLE IF NOT EXISTS giveaway_draws (
    id TEXT NOT NULL UNIQUE,
    giveaway_id TEXT NOT NULL,
    winner_id TEXT NOT NULL,
    winner_entries INTEGER NOT NULL,
    total_entries INTEGER NOT NULL,
    participants INTEGER NOT NULL,
    prize TEXT NOT NULL,
    delivery TEXT NOT NULL,
    redemption_id TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_giveaway_draws_giveaway ON giveaway_draws(giveaway_id);

CREATE TABLE IF NOT EXISTS redemptions (
    id TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL,
    item_id TEXT NOT NULL,
    item_kind TEXT NOT NULL,
    cost_credits INTEGER NOT NULL,
    country_code TEXT,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_redemptions_user ON redemptions(user_id);
"#;
