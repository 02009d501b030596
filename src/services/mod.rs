//! Economy services.
//!
//! Each operation runs as one store transaction: begin, do the work against
//! `&mut dyn EconomyTx`, then [`finish`]. Work that talks to collaborators
//! outside the store (fulfillment) happens after commit.

pub mod checkin;
pub mod earn;
pub mod giveaway;
pub mod jackpot;
pub mod ledger;
pub mod mystery_bag;
pub mod scheduler;
pub mod store;

pub use checkin::{CheckinOutcome, CheckinRequest, CheckinService};
pub use earn::{
    AdCallback, AdCallbackOutcome, EarnOutcome, EarnRecorder, EarnRequest, RequestOrigin,
};
pub use giveaway::{DrawOutcome, EntryPurchase, GiveawayService};
pub use jackpot::{JackpotService, SpinOutcome};
pub use ledger::Ledger;
pub use mystery_bag::{BagOutcome, MysteryBagService};
pub use scheduler::GiveawayScheduler;
pub use store::{RedeemOutcome, StoreService};

use tracing::warn;

use crate::error::Result;
use crate::storage::EconomyTx;

/// Commit on success, roll back on failure.
///
/// A rollback failure is logged and the original error is returned.
pub(crate) async fn finish<T>(tx: Box<dyn EconomyTx>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
