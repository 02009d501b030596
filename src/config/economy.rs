//! Earn, fraud, jackpot, mystery bag and store settings.

use serde::Deserialize;

use crate::model::BagPrize;

/// Earn Event Recorder and check-in rewards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EarnConfig {
    pub checkin_base_credits: i64,
    /// Extra credits per consecutive day after the first.
    pub streak_bonus_credits: i64,
    /// Streak days beyond which the bonus stops growing.
    pub max_streak_bonus_days: u32,
    /// Grant one bonus entry to every configured giveaway on each earn.
    pub bonus_entry_per_earn: bool,
}

impl Default for EarnConfig {
    fn default() -> Self {
        Self {
            checkin_base_credits: 10,
            streak_bonus_credits: 5,
            max_streak_bonus_days: 7,
            bonus_entry_per_earn: false,
        }
    }
}

impl EarnConfig {
    /// Credits for a check-in that leaves the streak at `current_streak`.
    pub fn checkin_reward(&self, current_streak: u32) -> i64 {
        let bonus_days = current_streak
            .saturating_sub(1)
            .min(self.max_streak_bonus_days);
        self.checkin_base_credits + i64::from(bonus_days) * self.streak_bonus_credits
    }
}

/// Fraud Gate scoring.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FraudConfig {
    /// Risk added when the request IP is in a datacenter/VPN range.
    pub datacenter_penalty: u32,
    /// Combined risk at or above which the action is blocked.
    pub block_threshold: u32,
    pub velocity_window_secs: u64,
    /// Earn events within the window at which the user is blocked.
    pub velocity_limit: u32,
    /// Persistent device risk added on a velocity block.
    pub velocity_device_penalty: u32,
    /// Datacenter/VPN CIDR blocks served by the static range source.
    pub datacenter_ranges: Vec<String>,
    /// How long a fetched range list stays fresh.
    pub ranges_ttl_secs: u64,
}

impl Default for FraudConfig {
    fn default() -> Self {
        Self {
            datacenter_penalty: 30,
            block_threshold: 50,
            velocity_window_secs: 300,
            velocity_limit: 10,
            velocity_device_penalty: 10,
            datacenter_ranges: Vec::new(),
            ranges_ttl_secs: 3600,
        }
    }
}

/// One row of the jackpot multiplier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct MultiplierWeight {
    /// Payout as a percentage of the bet; 0 is a total loss.
    pub multiplier_pct: u32,
    pub weight: u64,
}

/// Jackpot spin parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JackpotConfig {
    pub min_bet: i64,
    pub max_bet: i64,
    pub jackpot_probability: f64,
    /// Fraction of the pool paid on a true jackpot.
    pub payout_fraction: f64,
    /// Fraction of a net loss added to the pool.
    pub loss_contribution_fraction: f64,
    pub table: Vec<MultiplierWeight>,
}

impl Default for JackpotConfig {
    fn default() -> Self {
        let table = [(0, 45), (50, 20), (100, 15), (150, 10), (200, 6), (500, 3), (1000, 1)]
            .into_iter()
            .map(|(multiplier_pct, weight)| MultiplierWeight {
                multiplier_pct,
                weight,
            })
            .collect();
        Self {
            min_bet: 10,
            max_bet: 1000,
            jackpot_probability: 0.0001,
            payout_fraction: 0.5,
            loss_contribution_fraction: 0.1,
            table,
        }
    }
}

/// One row of the mystery bag prize table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BagPrizeWeight {
    #[serde(flatten)]
    pub prize: BagPrize,
    pub weight: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MysteryBagConfig {
    pub price_credits: i64,
    pub prizes: Vec<BagPrizeWeight>,
}

impl Default for MysteryBagConfig {
    fn default() -> Self {
        let prizes = vec![
            BagPrizeWeight {
                prize: BagPrize::Credits { amount: 50 },
                weight: 40,
            },
            BagPrizeWeight {
                prize: BagPrize::Credits { amount: 150 },
                weight: 20,
            },
            BagPrizeWeight {
                prize: BagPrize::Credits { amount: 500 },
                weight: 5,
            },
            BagPrizeWeight {
                prize: BagPrize::Tokens { amount: 50 },
                weight: 25,
            },
            BagPrizeWeight {
                prize: BagPrize::StreakSaver,
                weight: 10,
            },
        ];
        Self {
            price_credits: 100,
            prizes,
        }
    }
}

/// What redeeming a store item does.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemKind {
    /// Fulfilled externally; priced by geo tier.
    GiftCard,
    StreakSaver,
    TokenPack { tokens: i64 },
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GiftCard => "gift_card",
            Self::StreakSaver => "streak_saver",
            Self::TokenPack { .. } => "token_pack",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreItem {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: ItemKind,
    /// Price in credits before geo adjustment.
    pub base_price: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub items: Vec<StoreItem>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            items: vec![
                StoreItem {
                    id: "gift-card-5".to_string(),
                    name: "$5 Gift Card".to_string(),
                    kind: ItemKind::GiftCard,
                    base_price: 5000,
                },
                StoreItem {
                    id: "streak-saver".to_string(),
                    name: "Streak Saver".to_string(),
                    kind: ItemKind::StreakSaver,
                    base_price: 500,
                },
                StoreItem {
                    id: "token-pack-100".to_string(),
                    name: "100 Tokens".to_string(),
                    kind: ItemKind::TokenPack { tokens: 100 },
                    base_price: 1000,
                },
            ],
        }
    }
}

impl StoreConfig {
    pub fn item(&self, item_id: &str) -> Option<&StoreItem> {
        self.items.iter().find(|item| item.id == item_id)
    }
}
