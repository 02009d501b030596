//! Fraud Gate: decides whether an earn action may proceed.
//!
//! Scoring is additive: a datacenter IP adds a fixed penalty, the device's
//! stored risk is added in full, and the combined score is compared against
//! the block threshold. Velocity abuse and banned accounts are hard blocks.
//! Device risk lives in the store so it survives restarts.

pub mod ranges;

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::FraudConfig;
use crate::error::Result;
use crate::model::{Device, FraudFlag, Severity};
use crate::services::{finish, ledger};
use crate::storage::helpers::now;
use crate::storage::{EconomyStore, EconomyTx};

pub use ranges::{Cidr, NetworkRanges, RangeError, RangeSource, StaticRanges};

/// Risk reported for banned accounts.
pub const BANNED_RISK_SCORE: u32 = 100;

/// Why an action was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Banned,
    DeviceBlocked,
    DeviceFlagged,
    Velocity,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Banned => "account banned",
            Self::DeviceBlocked => "device blocked",
            Self::DeviceFlagged => "device flagged",
            Self::Velocity => "too many earn events",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: Option<BlockReason>,
    pub risk_score: u32,
}

impl Eligibility {
    fn allowed(risk_score: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            risk_score,
        }
    }

    fn blocked(reason: BlockReason, risk_score: u32) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            risk_score,
        }
    }

    /// Map a block onto the error taxonomy.
    pub fn into_result(self, user_id: &str) -> Result<Self> {
        match self.reason {
            None => Ok(self),
            Some(BlockReason::Banned) => Err(crate::EconomyError::BannedAccount(user_id.to_string())),
            Some(reason) => Err(crate::EconomyError::FraudBlocked {
                reason: reason.to_string(),
                risk_score: self.risk_score,
            }),
        }
    }
}

fn flag(
    user_id: &str,
    device_id: Option<&str>,
    flag_type: &str,
    severity: Severity,
    reason: String,
    metadata: serde_json::Value,
) -> FraudFlag {
    FraudFlag {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        device_id: device_id.map(str::to_string),
        flag_type: flag_type.to_string(),
        severity,
        reason,
        metadata,
        created_at: now(),
    }
}

pub struct FraudGate {
    store: Arc<dyn EconomyStore>,
    config: FraudConfig,
    ranges: Arc<NetworkRanges>,
}

impl FraudGate {
    pub fn new(store: Arc<dyn EconomyStore>, config: FraudConfig, ranges: Arc<NetworkRanges>) -> Self {
        Self {
            store,
            config,
            ranges,
        }
    }

    pub fn ranges(&self) -> &Arc<NetworkRanges> {
        &self.ranges
    }

    /// Score a request. Flags and device risk changes are committed even
    /// when the request is blocked.
    pub async fn check_eligibility(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        ip: Option<IpAddr>,
    ) -> Result<Eligibility> {
        // Range lookup may hit the source; keep it out of the store unit.
        let datacenter = match ip {
            Some(ip) => self.ranges.contains(ip).await,
            None => false,
        };

        let mut tx = self.store.begin().await?;
        let result = self
            .evaluate(tx.as_mut(), user_id, device_id, ip, datacenter)
            .await;
        finish(tx, result).await
    }

    async fn evaluate(
        &self,
        tx: &mut dyn EconomyTx,
        user_id: &str,
        device_id: Option<&str>,
        ip: Option<IpAddr>,
        datacenter: bool,
    ) -> Result<Eligibility> {
        let account = ledger::require_account(tx, user_id).await?;
        if account.banned {
            info!(%user_id, "Earn blocked: account banned");
            return Ok(Eligibility::blocked(BlockReason::Banned, BANNED_RISK_SCORE));
        }

        let mut risk = 0u32;

        if let (true, Some(ip)) = (datacenter, ip) {
            risk = risk.saturating_add(self.config.datacenter_penalty);
            tx.insert_fraud_flag(&flag(
                user_id,
                device_id,
                "datacenter_ip",
                Severity::Medium,
                format!("request from datacenter/VPN range ({ip})"),
                json!({ "ip": ip.to_string() }),
            ))
            .await?;
        }

        if let Some(fingerprint) = device_id {
            if let Some(device) = tx.device(fingerprint).await? {
                if device.is_blocked {
                    warn!(%user_id, device_id = %fingerprint, "Earn blocked: device blocked");
                    return Ok(Eligibility::blocked(
                        BlockReason::DeviceBlocked,
                        risk.saturating_add(device.risk_score),
                    ));
                }
                risk = risk.saturating_add(device.risk_score);
            }
        }

        if risk >= self.config.block_threshold {
            tx.insert_fraud_flag(&flag(
                user_id,
                device_id,
                "device_flagged",
                Severity::High,
                format!("combined risk {risk} reached threshold {}", self.config.block_threshold),
                json!({ "risk_score": risk }),
            ))
            .await?;
            warn!(%user_id, risk_score = risk, "Earn blocked: device flagged");
            return Ok(Eligibility::blocked(BlockReason::DeviceFlagged, risk));
        }

        let recent = tx.count_earn_events_since(user_id, self.velocity_since()).await?;
        if recent >= self.config.velocity_limit {
            tx.insert_fraud_flag(&flag(
                user_id,
                device_id,
                "velocity_abuse",
                Severity::High,
                format!(
                    "{recent} earn events in the last {}s",
                    self.config.velocity_window_secs
                ),
                json!({ "count": recent, "window_secs": self.config.velocity_window_secs }),
            ))
            .await?;
            if let Some(fingerprint) = device_id {
                tx.raise_device_risk(fingerprint, self.config.velocity_device_penalty)
                    .await?;
            }
            warn!(%user_id, recent, "Earn blocked: velocity abuse");
            return Ok(Eligibility::blocked(
                BlockReason::Velocity,
                risk.saturating_add(self.config.velocity_device_penalty),
            ));
        }

        Ok(Eligibility::allowed(risk))
    }

    fn velocity_since(&self) -> DateTime<Utc> {
        let window = TimeDelta::try_seconds(self.config.velocity_window_secs as i64)
            .unwrap_or(TimeDelta::MAX);
        now().checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Velocity check repeated inside the unit that records the earn, so
    /// concurrent requests that all passed `check_eligibility` cannot push a
    /// user past the limit. Nothing is written; the caller's unit rolls back.
    pub(crate) async fn admit_in(&self, tx: &mut dyn EconomyTx, user_id: &str) -> Result<()> {
        let recent = tx.count_earn_events_since(user_id, self.velocity_since()).await?;
        if recent < self.config.velocity_limit {
            return Ok(());
        }
        warn!(%user_id, recent, "Earn blocked at commit: velocity abuse");
        Err(crate::EconomyError::FraudBlocked {
            reason: BlockReason::Velocity.to_string(),
            risk_score: self.config.velocity_device_penalty,
        })
    }

    /// Fraud flags for a user, newest first.
    pub async fn flags(&self, user_id: &str) -> Result<Vec<FraudFlag>> {
        let mut tx = self.store.begin().await?;
        let result = tx.fraud_flags(user_id).await.map_err(Into::into);
        finish(tx, result).await
    }

    pub async fn device(&self, fingerprint: &str) -> Result<Option<Device>> {
        let mut tx = self.store.begin().await?;
        let result = tx.device(fingerprint).await.map_err(Into::into);
        finish(tx, result).await
    }

    /// Administrative hard block (or unblock) of a device.
    pub async fn set_device_blocked(&self, fingerprint: &str, blocked: bool) -> Result<Device> {
        let mut tx = self.store.begin().await?;
        let result = tx
            .set_device_blocked(fingerprint, blocked)
            .await
            .map_err(Into::into);
        let device = finish(tx, result).await?;
        info!(device_id = %fingerprint, blocked, "Device block status changed");
        Ok(device)
    }
}

#[cfg(test)]
mod tests;
