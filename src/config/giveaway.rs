//! Giveaway, scheduler and fulfillment settings.

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Utc};
use serde::Deserialize;

use crate::model::Prize;

/// How often a giveaway is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    /// ISO weeks, starting Monday 00:00 UTC.
    Weekly,
    /// Calendar months, starting on the 1st 00:00 UTC.
    Monthly,
}

impl Cadence {
    /// Start of the period containing `now`.
    pub fn period_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive();
        let first_day = match self {
            Self::Weekly => {
                let back = u64::from(today.weekday().num_days_from_monday());
                today.checked_sub_days(Days::new(back)).unwrap_or(today)
            }
            Self::Monthly => NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today),
        };
        Utc.from_utc_datetime(&first_day.and_time(chrono::NaiveTime::MIN))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GiveawayConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub cadence: Cadence,
    pub prize: Prize,
    /// Credits per paid entry.
    #[serde(default = "default_entry_price")]
    pub entry_price_credits: i64,
    #[serde(default = "default_max_bonus")]
    pub max_bonus_entries: u32,
}

fn default_entry_price() -> i64 {
    50
}

fn default_max_bonus() -> u32 {
    10
}

pub fn default_giveaways() -> Vec<GiveawayConfig> {
    vec![
        GiveawayConfig {
            id: "weekly-credits".to_string(),
            name: "Weekly Credits Drop".to_string(),
            cadence: Cadence::Weekly,
            prize: Prize::Credits { amount: 5000 },
            entry_price_credits: default_entry_price(),
            max_bonus_entries: default_max_bonus(),
        },
        GiveawayConfig {
            id: "monthly-gift-card".to_string(),
            name: "Monthly $25 Gift Card".to_string(),
            cadence: Cadence::Monthly,
            prize: Prize::GiftCard {
                sku: "gift-card-25".to_string(),
                face_value: 2500,
            },
            entry_price_credits: 100,
            max_bonus_entries: default_max_bonus(),
        },
    ]
}

/// Background draw scheduler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Seconds between due-draw checks.
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FulfillmentKind {
    /// Log the hand-off only.
    #[default]
    Log,
    /// POST redemptions to a webhook.
    Http,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FulfillmentConfig {
    #[serde(rename = "type")]
    pub kind: FulfillmentKind,
    pub endpoint: String,
    pub timeout_secs: u64,
    /// Sent as the `Authorization` header when set.
    pub auth_token: Option<String>,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            kind: FulfillmentKind::Log,
            endpoint: String::new(),
            timeout_secs: 30,
            auth_token: None,
        }
    }
}
