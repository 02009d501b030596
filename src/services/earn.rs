//! Earn Event Recorder.
//!
//! Records reward-granting actions idempotently and drives ledger credits.
//! Dedup is enforced by the store's unique constraint at insert time: a
//! rejected insert means another delivery already credited this action, so
//! the ledger is left alone.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{EconomyError, Result};
use crate::fraud::FraudGate;
use crate::model::{Balance, EarnEvent, EarnType};
use crate::services::giveaway::GiveawayService;
use crate::services::{finish, ledger};
use crate::storage::helpers::{format_date, now};
use crate::storage::{EconomyStore, EconomyTx};

/// Dedup key for an ad-network reward callback.
pub fn ad_dedup_key(network: &str, transaction_id: &str) -> String {
    format!("ad:{network}:{transaction_id}")
}

/// Dedup key allowing one `earn_type` per user per calendar day.
pub fn daily_dedup_key(earn_type: EarnType, user_id: &str, day: NaiveDate) -> String {
    format!("{}:{user_id}:{}", earn_type.as_str(), format_date(day))
}

/// Dedup key allowing one credit per learning module per day.
pub fn module_dedup_key(user_id: &str, module_id: &str, day: NaiveDate) -> String {
    format!("learn_module:{user_id}:{module_id}:{}", format_date(day))
}

/// Where a request came from, as far as the fraud gate cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOrigin {
    pub device_id: Option<String>,
    pub ip: Option<IpAddr>,
}

impl RequestOrigin {
    pub fn new(device_id: Option<&str>, ip: Option<IpAddr>) -> Self {
        Self {
            device_id: device_id.map(str::to_string),
            ip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EarnRequest {
    pub user_id: String,
    pub earn_type: EarnType,
    pub credits_amount: i64,
    pub dedup_key: Option<String>,
    pub metadata: serde_json::Value,
    pub origin: RequestOrigin,
}

impl EarnRequest {
    pub fn new(user_id: impl Into<String>, earn_type: EarnType, credits_amount: i64) -> Self {
        Self {
            user_id: user_id.into(),
            earn_type,
            credits_amount,
            dedup_key: None,
            metadata: json!({}),
            origin: RequestOrigin::default(),
        }
    }

    /// One credit per `(user, module, day)`.
    pub fn learn_module(user_id: &str, module_id: &str, day: NaiveDate, credits: i64) -> Self {
        Self::new(user_id, EarnType::LearnModule, credits)
            .with_dedup_key(module_dedup_key(user_id, module_id, day))
            .with_metadata(json!({ "module_id": module_id, "day": format_date(day) }))
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.origin = origin;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(EconomyError::validation("user id must not be empty"));
        }
        if self.credits_amount <= 0 {
            return Err(EconomyError::validation(format!(
                "earn amount must be positive, got {}",
                self.credits_amount
            )));
        }
        if self.dedup_key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(EconomyError::validation("dedup key must not be blank"));
        }
        if self.earn_type == EarnType::LearnModule && self.dedup_key.is_none() {
            return Err(EconomyError::validation("learn_module earns require a module scope"));
        }
        if self.earn_type == EarnType::Checkin && !self.has_daily_key() {
            return Err(EconomyError::validation(format!(
                "checkin earns require a key of the form checkin:{}:YYYY-MM-DD",
                self.user_id
            )));
        }
        Ok(())
    }

    fn has_daily_key(&self) -> bool {
        let prefix = format!("{}:{}:", self.earn_type.as_str(), self.user_id);
        self.dedup_key
            .as_deref()
            .and_then(|key| key.strip_prefix(prefix.as_str()))
            .is_some_and(|day| NaiveDate::parse_from_str(day, "%Y-%m-%d").is_ok())
    }

    fn to_event(&self) -> EarnEvent {
        EarnEvent {
            id: Uuid::new_v4(),
            user_id: self.user_id.clone(),
            device_id: self.origin.device_id.clone(),
            earn_type: self.earn_type,
            credits_amount: self.credits_amount,
            dedup_key: self.dedup_key.clone(),
            metadata: self.metadata.clone(),
            created_at: now(),
        }
    }
}

/// Result of recording an earn. `applied == false` means the dedup scope was
/// already taken; `event` is then the previously stored event.
#[derive(Debug, Clone)]
pub struct EarnOutcome {
    pub applied: bool,
    pub event: EarnEvent,
    pub balance: Balance,
}

/// Insert `event` and credit its amount, inside the caller's unit.
///
/// Returns `None` without touching the ledger when the dedup key is taken.
pub(crate) async fn record_in(tx: &mut dyn EconomyTx, event: &EarnEvent) -> Result<Option<Balance>> {
    if !tx.insert_earn_event(event).await? {
        return Ok(None);
    }
    let balance = ledger::credit_in(
        tx,
        &event.user_id,
        event.credits_amount,
        event.earn_type.as_str(),
    )
    .await?;
    Ok(Some(balance))
}

/// Server-to-server reward callback from an ad network.
#[derive(Debug, Clone)]
pub struct AdCallback {
    pub network: String,
    pub transaction_id: String,
    pub user_id: String,
    pub reward_amount: i64,
}

#[derive(Debug, Clone)]
pub enum AdCallbackOutcome {
    Credited(EarnOutcome),
    /// Duplicate delivery; the original credit stands.
    AlreadyCredited(EarnEvent),
}

pub struct EarnRecorder {
    store: Arc<dyn EconomyStore>,
    gate: Arc<FraudGate>,
    giveaways: Option<Arc<GiveawayService>>,
}

impl EarnRecorder {
    pub fn new(store: Arc<dyn EconomyStore>, gate: Arc<FraudGate>) -> Self {
        Self {
            store,
            gate,
            giveaways: None,
        }
    }

    /// Grant a bonus entry in every giveaway after each applied earn.
    pub fn with_bonus_entries(mut self, giveaways: Arc<GiveawayService>) -> Self {
        self.giveaways = Some(giveaways);
        self
    }

    pub async fn record(&self, request: EarnRequest) -> Result<EarnOutcome> {
        request.validate()?;

        self.gate
            .check_eligibility(
                &request.user_id,
                request.origin.device_id.as_deref(),
                request.origin.ip,
            )
            .await?
            .into_result(&request.user_id)?;

        let outcome = self.commit(request.to_event()).await?;

        if outcome.applied {
            info!(
                user_id = %outcome.event.user_id,
                earn_type = %outcome.event.earn_type,
                amount = outcome.event.credits_amount,
                dedup_key = ?outcome.event.dedup_key,
                "Earn recorded"
            );
            if let Some(giveaways) = &self.giveaways {
                giveaways.grant_earn_bonus(&outcome.event.user_id).await;
            }
        } else {
            debug!(
                user_id = %outcome.event.user_id,
                dedup_key = ?outcome.event.dedup_key,
                "Duplicate earn ignored"
            );
        }
        Ok(outcome)
    }

    async fn commit(&self, event: EarnEvent) -> Result<EarnOutcome> {
        let mut tx = self.store.begin().await?;
        let result = async {
            self.gate.admit_in(tx.as_mut(), &event.user_id).await?;
            Self::apply(tx.as_mut(), event).await
        }
        .await;
        finish(tx, result).await
    }

    async fn apply(tx: &mut dyn EconomyTx, event: EarnEvent) -> Result<EarnOutcome> {
        if let Some(balance) = record_in(tx, &event).await? {
            return Ok(EarnOutcome {
                applied: true,
                event,
                balance,
            });
        }

        let key = event.dedup_key.as_deref().unwrap_or_default();
        let existing = tx
            .earn_event_by_dedup_key(key)
            .await?
            .ok_or_else(|| EconomyError::not_found("earn event", key))?;
        let balance = ledger::require_account(tx, &event.user_id).await?.balance;
        Ok(EarnOutcome {
            applied: false,
            event: existing,
            balance,
        })
    }

    /// One credit per `(module, day)`; repeats come back with `applied == false`.
    pub async fn record_learn_module(
        &self,
        user_id: &str,
        module_id: &str,
        day: NaiveDate,
        credits: i64,
        origin: RequestOrigin,
    ) -> Result<EarnOutcome> {
        if module_id.trim().is_empty() {
            return Err(EconomyError::validation("module id must not be empty"));
        }
        self.record(EarnRequest::learn_module(user_id, module_id, day, credits).with_origin(origin))
            .await
    }

    /// Credit an ad reward at most once per network transaction id.
    ///
    /// Duplicate deliveries succeed with `AlreadyCredited` so the network
    /// stops retrying. The existing key is looked up before the fraud gate so
    /// a replay is never scored as fresh activity.
    pub async fn handle_ad_callback(&self, callback: AdCallback) -> Result<AdCallbackOutcome> {
        if callback.network.trim().is_empty() || callback.transaction_id.trim().is_empty() {
            return Err(EconomyError::validation(
                "ad callback requires a network and transaction id",
            ));
        }
        if callback.reward_amount <= 0 {
            return Err(EconomyError::validation(format!(
                "ad reward must be positive, got {}",
                callback.reward_amount
            )));
        }

        let key = ad_dedup_key(&callback.network, &callback.transaction_id);
        if let Some(existing) = self.find(&key).await? {
            debug!(dedup_key = %key, "Ad callback already credited");
            return Ok(AdCallbackOutcome::AlreadyCredited(existing));
        }

        let request = EarnRequest::new(&callback.user_id, EarnType::AdView, callback.reward_amount)
            .with_dedup_key(key)
            .with_metadata(json!({
                "network": callback.network,
                "transaction_id": callback.transaction_id,
            }));
        let outcome = self.record(request).await?;
        if outcome.applied {
            Ok(AdCallbackOutcome::Credited(outcome))
        } else {
            Ok(AdCallbackOutcome::AlreadyCredited(outcome.event))
        }
    }

    async fn find(&self, dedup_key: &str) -> Result<Option<EarnEvent>> {
        let mut tx = self.store.begin().await?;
        let result = tx.earn_event_by_dedup_key(dedup_key).await.map_err(Into::into);
        finish(tx, result).await
    }
}
