//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

mod economy;
mod giveaway;
mod storage;

pub use economy::{
    BagPrizeWeight, EarnConfig, FraudConfig, ItemKind, JackpotConfig, MultiplierWeight,
    MysteryBagConfig, StoreConfig, StoreItem,
};
pub use giveaway::{
    default_giveaways, Cadence, FulfillmentConfig, FulfillmentKind, GiveawayConfig,
    SchedulerConfig,
};
pub use storage::{StorageConfig, StorageType};

use std::collections::HashSet;

use serde::Deserialize;

use crate::model::{BagPrize, Prize};
use crate::sampling::WeightedTable;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "REWARD_LEDGER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "REWARD_LEDGER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "REWARD_LEDGER_LOG";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub earn: EarnConfig,
    pub fraud: FraudConfig,
    pub jackpot: JackpotConfig,
    pub mystery_bag: MysteryBagConfig,
    pub giveaways: Vec<GiveawayConfig>,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub fulfillment: FulfillmentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            earn: EarnConfig::default(),
            fraud: FraudConfig::default(),
            jackpot: JackpotConfig::default(),
            mystery_bag: MysteryBagConfig::default(),
            giveaways: default_giveaways(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            fulfillment: FulfillmentConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Create config for testing: in-memory storage, no scheduler.
    pub fn for_test() -> Self {
        Self {
            storage: StorageConfig::memory(),
            scheduler: SchedulerConfig {
                enabled: false,
                ..SchedulerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let jackpot = &self.jackpot;
        if jackpot.min_bet <= 0 || jackpot.min_bet > jackpot.max_bet {
            return invalid(format!(
                "jackpot bet range {}..={} is empty or non-positive",
                jackpot.min_bet, jackpot.max_bet
            ));
        }
        if let Err(e) = WeightedTable::new(jackpot.table.iter().map(|row| (row, row.weight))) {
            return invalid(format!("jackpot table: {e}"));
        }
        for (name, fraction) in [
            ("jackpot_probability", jackpot.jackpot_probability),
            ("payout_fraction", jackpot.payout_fraction),
            ("loss_contribution_fraction", jackpot.loss_contribution_fraction),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                return invalid(format!("jackpot {name} must be within [0, 1], got {fraction}"));
            }
        }

        if self.mystery_bag.price_credits <= 0 {
            return invalid("mystery bag price must be positive".to_string());
        }
        if let Err(e) = WeightedTable::new(self.mystery_bag.prizes.iter().map(|p| (p, p.weight))) {
            return invalid(format!("mystery bag prize table: {e}"));
        }
        for entry in &self.mystery_bag.prizes {
            if let BagPrize::Credits { amount } | BagPrize::Tokens { amount } = entry.prize {
                if amount <= 0 {
                    return invalid(format!("mystery bag prize {:?} must be positive", entry.prize));
                }
            }
        }

        let mut ids = HashSet::new();
        for giveaway in &self.giveaways {
            if giveaway.id.is_empty() || !ids.insert(giveaway.id.as_str()) {
                return invalid(format!("giveaway id {:?} is empty or duplicated", giveaway.id));
            }
            if giveaway.entry_price_credits <= 0 {
                return invalid(format!("giveaway {} entry price must be positive", giveaway.id));
            }
            let value = match &giveaway.prize {
                Prize::Credits { amount } => *amount,
                Prize::GiftCard { face_value, .. } => *face_value,
            };
            if value <= 0 {
                return invalid(format!("giveaway {} prize must be positive", giveaway.id));
            }
        }

        let mut items = HashSet::new();
        for item in &self.store.items {
            if !items.insert(item.id.as_str()) || item.base_price <= 0 {
                return invalid(format!("store item {:?} is duplicated or unpriced", item.id));
            }
        }

        if self.fulfillment.kind == FulfillmentKind::Http && self.fulfillment.endpoint.is_empty() {
            return invalid("http fulfillment requires an endpoint".to_string());
        }

        Ok(())
    }

    pub fn giveaway(&self, giveaway_id: &str) -> Option<&GiveawayConfig> {
        self.giveaways.iter().find(|g| g.id == giveaway_id)
    }
}
