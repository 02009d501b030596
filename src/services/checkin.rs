//! Daily check-in: streak transition, earn event and credit in one unit.

use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EarnConfig;
use crate::error::{EconomyError, Result};
use crate::fraud::FraudGate;
use crate::model::{Balance, EarnEvent, EarnType, Streak};
use crate::services::earn::{daily_dedup_key, record_in, RequestOrigin};
use crate::services::giveaway::GiveawayService;
use crate::services::{finish, ledger};
use crate::storage::helpers::{format_date, now};
use crate::storage::{EconomyStore, EconomyTx};
use crate::streak::{check_in, state_on, StreakState, TransitionKind};

#[derive(Debug, Clone)]
pub struct CheckinRequest {
    pub user_id: String,
    /// Calendar day of the check-in, as resolved by the caller.
    pub day: NaiveDate,
    pub origin: RequestOrigin,
}

impl CheckinRequest {
    pub fn new(user_id: impl Into<String>, day: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            day,
            origin: RequestOrigin::default(),
        }
    }

    pub fn with_origin(mut self, origin: RequestOrigin) -> Self {
        self.origin = origin;
        self
    }
}

#[derive(Debug, Clone)]
pub struct CheckinOutcome {
    /// False for a repeat check-in on the same day.
    pub applied: bool,
    pub kind: TransitionKind,
    pub streak: Streak,
    pub credits_awarded: i64,
    pub balance: Balance,
}

impl CheckinOutcome {
    /// Treat a repeat check-in as a conflict.
    pub fn into_result(self) -> Result<Self> {
        if self.applied {
            return Ok(self);
        }
        let day = self
            .streak
            .last_checkin_date
            .map(format_date)
            .unwrap_or_default();
        Err(EconomyError::AlreadyRecorded(format!(
            "check-in for {} on {day}",
            self.streak.user_id
        )))
    }
}

pub struct CheckinService {
    store: Arc<dyn EconomyStore>,
    gate: Arc<FraudGate>,
    config: EarnConfig,
    giveaways: Option<Arc<GiveawayService>>,
}

impl CheckinService {
    pub fn new(store: Arc<dyn EconomyStore>, gate: Arc<FraudGate>, config: EarnConfig) -> Self {
        Self {
            store,
            gate,
            config,
            giveaways: None,
        }
    }

    pub fn with_bonus_entries(mut self, giveaways: Arc<GiveawayService>) -> Self {
        self.giveaways = Some(giveaways);
        self
    }

    pub async fn checkin(&self, request: CheckinRequest) -> Result<CheckinOutcome> {
        if request.user_id.trim().is_empty() {
            return Err(EconomyError::validation("user id must not be empty"));
        }
        self.gate
            .check_eligibility(
                &request.user_id,
                request.origin.device_id.as_deref(),
                request.origin.ip,
            )
            .await?
            .into_result(&request.user_id)?;

        let mut tx = self.store.begin().await?;
        let result = self.apply(tx.as_mut(), &request).await;
        let outcome = finish(tx, result).await?;

        if outcome.applied {
            info!(
                user_id = %request.user_id,
                day = %request.day,
                transition = ?outcome.kind,
                streak = outcome.streak.current_streak,
                credits = outcome.credits_awarded,
                "Check-in recorded"
            );
            if let Some(giveaways) = &self.giveaways {
                giveaways.grant_earn_bonus(&request.user_id).await;
            }
        } else {
            debug!(user_id = %request.user_id, day = %request.day, "Repeat check-in ignored");
        }
        Ok(outcome)
    }

    async fn apply(&self, tx: &mut dyn EconomyTx, request: &CheckinRequest) -> Result<CheckinOutcome> {
        let user_id = request.user_id.as_str();
        let account = ledger::require_active(tx, user_id).await?;
        let current = tx
            .streak(user_id)
            .await?
            .unwrap_or_else(|| Streak::fresh(user_id));

        let transition = check_in(&current, request.day);
        let unchanged = |streak: Streak, balance: Balance| CheckinOutcome {
            applied: false,
            kind: TransitionKind::Unchanged,
            streak,
            credits_awarded: 0,
            balance,
        };
        if !transition.kind.is_applied() {
            return Ok(unchanged(current, account.balance));
        }

        let credits = self.config.checkin_reward(transition.streak.current_streak);
        let event = EarnEvent {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            device_id: request.origin.device_id.clone(),
            earn_type: EarnType::Checkin,
            credits_amount: credits,
            dedup_key: Some(daily_dedup_key(EarnType::Checkin, user_id, request.day)),
            metadata: json!({
                "streak": transition.streak.current_streak,
                "transition": format!("{:?}", transition.kind).to_lowercase(),
            }),
            created_at: now(),
        };
        let Some(balance) = record_in(tx, &event).await? else {
            // the day's event exists even though the streak row disagrees
            return Ok(unchanged(current, account.balance));
        };
        tx.put_streak(&transition.streak).await?;

        Ok(CheckinOutcome {
            applied: true,
            kind: transition.kind,
            streak: transition.streak,
            credits_awarded: credits,
            balance,
        })
    }

    /// Stored streak, or a fresh one for users who never checked in.
    pub async fn streak(&self, user_id: &str) -> Result<Streak> {
        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::require_account(tx.as_mut(), user_id).await?;
            Ok(tx
                .streak(user_id)
                .await?
                .unwrap_or_else(|| Streak::fresh(user_id)))
        }
        .await;
        finish(tx, result).await
    }

    pub async fn state(&self, user_id: &str, day: NaiveDate) -> Result<StreakState> {
        Ok(state_on(&self.streak(user_id).await?, day))
    }

    pub async fn grant_streak_saver(&self, user_id: &str, count: u32) -> Result<Streak> {
        if count == 0 {
            return Err(EconomyError::validation("saver count must be positive"));
        }
        let mut tx = self.store.begin().await?;
        let result = async {
            ledger::require_account(tx.as_mut(), user_id).await?;
            Ok(tx.add_streak_savers(user_id, count).await?)
        }
        .await;
        let streak = finish(tx, result).await?;
        info!(%user_id, count, savers = streak.streak_savers, "Streak savers granted");
        Ok(streak)
    }
}
