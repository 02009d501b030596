//! Reward Ledger - economy integrity engine
//!
//! Balance ledger, idempotent earn events, daily streaks, fraud gating and
//! the weighted-random reward mechanisms (jackpot spins, mystery bags,
//! giveaway draws) of an earn-credits rewards app.

pub mod config;
pub mod error;
pub mod facade;
pub mod fraud;
pub mod fulfillment;
pub mod model;
pub mod pricing;
pub mod sampling;
pub mod services;
pub mod storage;
pub mod streak;
pub mod utils;

pub use error::{EconomyError, Result};
pub use facade::{BuildError, Economy, EconomyBuilder};
