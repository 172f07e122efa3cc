//! Admission control for inbound chat messages.
//!
//! Rules are evaluated in a fixed order: day rollover, the free first message,
//! the daily cap, the cooldown, then credit. Every time value comes from the
//! caller so the ledger itself is pure and clock-agnostic.

use std::fmt;

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ActivityConfig;
use crate::error::{EngineError, Result};
use crate::record::User;
use crate::types::millis_between;

/// Why a message was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// Too soon after the previous message.
    Cooldown,
    /// The UTC-day message cap is used up.
    DailyCapReached,
    /// Not enough CRU for the message cost.
    InsufficientCredit,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cooldown => write!(f, "cooldown"),
            Self::DailyCapReached => write!(f, "daily cap reached"),
            Self::InsufficientCredit => write!(f, "insufficient credit"),
        }
    }
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdmissionResult {
    /// Whether the message may proceed.
    pub allowed: bool,
    /// Milliseconds until a retry could succeed; `None` when allowed or when
    /// waiting alone will not help.
    pub retry_after_ms: Option<u64>,
    /// Why it was denied.
    pub reason: Option<DenialReason>,
    /// The message was admitted as the free first message.
    pub free_first_message: bool,
    /// CRU debited (or that would be debited, for [`ActivityLedger::check`]).
    pub cru_charged: f64,
}

impl AdmissionResult {
    fn allow(free_first_message: bool, cru_charged: f64) -> Self {
        Self {
            allowed: true,
            retry_after_ms: None,
            reason: None,
            free_first_message,
            cru_charged,
        }
    }

    fn deny(reason: DenialReason, retry_after_ms: Option<u64>) -> Self {
        Self {
            allowed: false,
            retry_after_ms,
            reason: Some(reason),
            free_first_message: false,
            cru_charged: 0.0,
        }
    }

    /// Convert a denial into [`EngineError::RateLimited`].
    ///
    /// # Errors
    /// Returns `RateLimited` when the message was not allowed.
    pub fn into_result(self) -> Result<Self> {
        match (self.allowed, self.reason) {
            (false, Some(reason)) => Err(EngineError::RateLimited {
                reason,
                retry_after_ms: self.retry_after_ms,
            }),
            _ => Ok(self),
        }
    }
}

/// Per-user message admission.
#[derive(Debug, Clone)]
pub struct ActivityLedger {
    daily_cap: u32,
    cooldown: Duration,
    cost: f64,
}

impl ActivityLedger {
    /// Create a ledger from config.
    #[must_use]
    pub fn new(config: &ActivityConfig) -> Self {
        let cooldown_ms = i64::try_from(config.cooldown_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        Self {
            daily_cap: config.daily_message_cap,
            cooldown: Duration::milliseconds(cooldown_ms),
            cost: config.message_cost_cru.max(0.0),
        }
    }

    /// Decide and record. The day rollover is applied even when the message
    /// is then denied.
    pub fn admit(&self, user: &mut User, now: DateTime<Utc>) -> AdmissionResult {
        if rolls_over(user, now) {
            user.daily_message_count = 0;
            user.daily_message_count_reset = now;
        }
        let result = self.decide(user, now, user.daily_message_count);
        if result.allowed {
            user.daily_message_count = user.daily_message_count.saturating_add(1);
            user.last_message_sent = Some(now);
            if result.free_first_message {
                user.has_used_first_message = true;
            }
            user.cru_balance = (user.cru_balance - result.cru_charged).max(0.0);
        }
        result
    }

    /// The decision [`admit`](Self::admit) would make, without touching the user.
    #[must_use]
    pub fn check(&self, user: &User, now: DateTime<Utc>) -> AdmissionResult {
        let count = if rolls_over(user, now) {
            0
        } else {
            user.daily_message_count
        };
        self.decide(user, now, count)
    }

    fn decide(&self, user: &User, now: DateTime<Utc>, count: u32) -> AdmissionResult {
        if !user.has_used_first_message {
            return AdmissionResult::allow(true, 0.0);
        }

        if count >= self.daily_cap {
            let wait = millis_between(now, next_utc_midnight(now)).max(1);
            return AdmissionResult::deny(DenialReason::DailyCapReached, Some(wait));
        }

        if let Some(last) = user.last_message_sent {
            let elapsed = now - last;
            if elapsed < self.cooldown {
                // A clock that stepped backwards never waits longer than one cooldown.
                let remaining = (self.cooldown - elapsed).min(self.cooldown);
                let wait = u64::try_from(remaining.num_milliseconds()).unwrap_or(0).max(1);
                return AdmissionResult::deny(DenialReason::Cooldown, Some(wait));
            }
        }

        if self.cost > 0.0 && user.cru_balance < self.cost {
            return AdmissionResult::deny(DenialReason::InsufficientCredit, None);
        }

        AdmissionResult::allow(false, self.cost)
    }
}

fn rolls_over(user: &User, now: DateTime<Utc>) -> bool {
    now.date_naive() > user.daily_message_count_reset.date_naive()
}

/// Start of the UTC day after `now`.
#[must_use]
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .succ_opt()
        .map_or(DateTime::<Utc>::MAX_UTC, |d| d.and_time(NaiveTime::MIN).and_utc())
}
