//! reward-ledger-scheduler: runs scheduled giveaway draws
//!
//! Loads configuration, opens the configured store and runs every due
//! giveaway draw on the scheduler interval until interrupted.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: sqlite
//!   path: data/reward-ledger.db
//! scheduler:
//!   interval_secs: 60
//! fulfillment:
//!   type: http
//!   endpoint: https://fulfillment.internal/redemptions
//! ```
//!
//! The config path may be given as the first argument or through
//! `REWARD_LEDGER_CONFIG`.

use tracing::{info, warn};

use reward_ledger::config::Config;
use reward_ledger::utils::bootstrap::{init_tracing, LogFormat};
use reward_ledger::Economy;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let path = std::env::args().nth(1);
    let config = Config::load(path.as_deref())?;
    if !config.scheduler.enabled {
        warn!("Scheduler disabled in configuration, exiting");
        return Ok(());
    }

    let economy = Economy::builder(config).build().await?;
    let handle = economy.scheduler().spawn();
    info!(
        giveaways = economy.config().giveaways.len(),
        "reward-ledger-scheduler started"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    handle.abort();
    Ok(())
}
