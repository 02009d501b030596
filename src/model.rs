//! Records owned by the economy store.
//!
//! Everything here is plain data. Mutation rules live in the services and
//! the store transaction primitives.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Implements `as_str`/`parse` for string-backed enums stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Per-user balance. Mutated only through ledger primitives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub user_id: String,
    pub credits: i64,
    pub tokens: i64,
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
}

impl Balance {
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            credits: 0,
            tokens: 0,
            lifetime_earned: 0,
            lifetime_spent: 0,
        }
    }
}

/// Balance plus account status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub balance: Balance,
    pub banned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Asset {
    Credits,
    Tokens,
}

text_enum!(Asset {
    Credits => "credits",
    Tokens => "tokens",
});

/// Audit row written alongside every balance mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub id: Uuid,
    pub user_id: String,
    pub asset: Asset,
    pub delta: i64,
    pub reason: String,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarnType {
    AdView,
    Checkin,
    LearnModule,
    Referral,
    Bonus,
    GiveawayPrize,
}

text_enum!(EarnType {
    AdView => "ad_view",
    Checkin => "checkin",
    LearnModule => "learn_module",
    Referral => "referral",
    Bonus => "bonus",
    GiveawayPrize => "giveaway_prize",
});

/// Immutable record of one reward-granting action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EarnEvent {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: Option<String>,
    pub earn_type: EarnType,
    pub credits_amount: i64,
    pub dedup_key: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Daily check-in state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Streak {
    pub user_id: String,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_checkin_date: Option<NaiveDate>,
    pub streak_savers: u32,
}

impl Streak {
    pub fn fresh(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            current_streak: 0,
            longest_streak: 0,
            last_checkin_date: None,
            streak_savers: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub fingerprint: String,
    pub risk_score: u32,
    pub is_blocked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

text_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// Immutable fraud audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudFlag {
    pub id: Uuid,
    pub user_id: String,
    pub device_id: Option<String>,
    pub flag_type: String,
    pub severity: Severity,
    pub reason: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum EntryType {
    Free,
    Bonus,
    Paid,
}

text_enum!(EntryType {
    Free => "free",
    Bonus => "bonus",
    Paid => "paid",
});

/// One `(giveaway, user, entryType)` counter row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiveawayEntry {
    pub giveaway_id: String,
    pub user_id: String,
    pub entry_type: EntryType,
    pub count: u32,
    /// When the row was first written. Later increments keep it.
    pub created_at: DateTime<Utc>,
}

/// A user's entries in one giveaway. The total is derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntrySet {
    pub free: u32,
    pub bonus: u32,
    pub paid: u32,
}

impl EntrySet {
    pub fn total(&self) -> u64 {
        self.free as u64 + self.bonus as u64 + self.paid as u64
    }

    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a GiveawayEntry>) -> Self {
        let mut set = Self::default();
        for row in rows {
            match row.entry_type {
                EntryType::Free => set.free += row.count,
                EntryType::Bonus => set.bonus += row.count,
                EntryType::Paid => set.paid += row.count,
            }
        }
        set
    }
}

/// Singleton shared token reserve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JackpotPool {
    pub pool_tokens: i64,
    pub total_contributed: i64,
    pub total_won: i64,
    pub last_winner_id: Option<String>,
    pub last_amount: i64,
}

/// Immutable record of one bet and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JackpotSpin {
    pub id: Uuid,
    pub user_id: String,
    pub bet_tokens: i64,
    pub multiplier_pct: u32,
    pub win_tokens: i64,
    pub jackpot: bool,
    pub pool_contribution: i64,
    pub created_at: DateTime<Utc>,
}

impl JackpotSpin {
    pub fn net_tokens(&self) -> i64 {
        self.win_tokens - self.bet_tokens
    }
}

/// What a giveaway pays its winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prize {
    Credits { amount: i64 },
    GiftCard { sku: String, face_value: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryStatus {
    Credited,
    PendingFulfillment,
}

text_enum!(DeliveryStatus {
    Credited => "credited",
    PendingFulfillment => "pending_fulfillment",
});

/// Immutable record of one completed draw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GiveawayDraw {
    pub id: Uuid,
    pub giveaway_id: String,
    pub winner_id: String,
    pub winner_entries: u64,
    pub total_entries: u64,
    pub participants: u32,
    pub prize: Prize,
    pub delivery: DeliveryStatus,
    pub redemption_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RedemptionStatus {
    Pending,
    Completed,
}

text_enum!(RedemptionStatus {
    Pending => "pending",
    Completed => "completed",
});

/// Record of credits spent on a store item or a gift-card prize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Redemption {
    pub id: Uuid,
    pub user_id: String,
    pub item_id: String,
    pub item_kind: String,
    pub cost_credits: i64,
    pub country_code: Option<String>,
    pub status: RedemptionStatus,
    pub created_at: DateTime<Utc>,
}

/// What a mystery bag can contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BagPrize {
    Credits { amount: i64 },
    Tokens { amount: i64 },
    StreakSaver,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MysteryBagOpening {
    pub id: Uuid,
    pub user_id: String,
    pub price_credits: i64,
    pub prize: BagPrize,
    pub created_at: DateTime<Utc>,
}
