//! Time-gated ECHO rewards and claims.
//!
//! Connection and verification bonuses use rolling windows anchored at their
//! own previous grant. The hourly credit uses aligned wall-clock windows so a
//! tick that runs twice in the same window credits only once.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RewardsConfig;
use crate::error::{EngineError, Result};
use crate::record::User;
use crate::types::{UserId, millis_between};

/// Kinds of ECHO grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardKind {
    /// Granted on login.
    ConnectionBonus,
    /// Granted on identity re-verification.
    VerificationBonus,
    /// Granted to active users every tick window.
    Hourly,
}

impl fmt::Display for RewardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionBonus => write!(f, "connection bonus"),
            Self::VerificationBonus => write!(f, "verification bonus"),
            Self::Hourly => write!(f, "hourly credit"),
        }
    }
}

/// A completed identity verification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationEvent {
    /// Who verified.
    pub user_id: UserId,
    /// When the proof was accepted.
    pub verified_at: DateTime<Utc>,
}

/// A credited reward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardGrant {
    /// What was granted.
    pub kind: RewardKind,
    /// ECHO added.
    pub amount: f64,
    /// ECHO balance after the grant.
    pub new_balance: f64,
}

/// A successful claim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClaimResult {
    /// ECHO moved out of the claimable balance.
    pub amount_claimed: f64,
    /// Lifetime claimed total after this claim.
    pub claimed_total: f64,
}

/// Decides and applies reward grants on a [`User`].
#[derive(Debug, Clone)]
pub struct RewardScheduler {
    config: RewardsConfig,
}

impl RewardScheduler {
    /// Create a scheduler from config.
    #[must_use]
    pub fn new(config: &RewardsConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn bonus_window(&self) -> Duration {
        Duration::hours(i64::from(self.config.bonus_window_hours))
    }

    /// Tick period, also the width of an aligned hourly window.
    #[must_use]
    pub fn tick_period(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.tick_period_secs)
    }

    /// Grant the login bonus at most once per rolling window.
    ///
    /// # Errors
    /// [`EngineError::RewardOnCooldown`] inside the window.
    pub fn grant_connection_bonus(&self, user: &mut User, now: DateTime<Utc>) -> Result<RewardGrant> {
        if let Some(last) = user.last_connection_bonus {
            let reopens = last + self.bonus_window();
            if now < reopens {
                return Err(EngineError::RewardOnCooldown {
                    reward: RewardKind::ConnectionBonus,
                    retry_after_ms: millis_between(now, reopens).max(1),
                });
            }
        }
        user.last_connection_bonus = Some(now);
        Ok(credit(user, RewardKind::ConnectionBonus, self.config.connection_bonus))
    }

    /// Grant the verification bonus at most once per rolling window, anchored
    /// at the event's `verified_at`.
    ///
    /// # Errors
    /// [`EngineError::RewardOnCooldown`] inside the window.
    pub fn grant_verification_bonus(&self, user: &mut User, event: &VerificationEvent) -> Result<RewardGrant> {
        if let Some(last) = user.last_world_id_verification {
            let reopens = last + self.bonus_window();
            if event.verified_at < reopens {
                return Err(EngineError::RewardOnCooldown {
                    reward: RewardKind::VerificationBonus,
                    retry_after_ms: millis_between(event.verified_at, reopens).max(1),
                });
            }
        }
        user.last_world_id_verification = Some(event.verified_at);
        Ok(credit(user, RewardKind::VerificationBonus, self.config.verification_bonus))
    }

    /// Whether the user counts as active at `now`.
    #[must_use]
    pub fn is_active(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.active_since(now - Duration::hours(i64::from(self.config.active_window_hours)))
    }

    /// Whether [`credit_hourly`](Self::credit_hourly) would grant at `now`.
    #[must_use]
    pub fn hourly_due(&self, user: &User, now: DateTime<Utc>) -> bool {
        if self.config.hourly_amount <= 0.0 || !self.is_active(user, now) {
            return false;
        }
        let window = align_window(now, self.config.tick_period_secs);
        !user.last_hourly_credit.is_some_and(|last| last >= window)
    }

    /// Credit the hourly amount once per aligned window to an active user.
    /// Returns `None` when nothing was due.
    pub fn credit_hourly(&self, user: &mut User, now: DateTime<Utc>) -> Option<RewardGrant> {
        if !self.hourly_due(user, now) {
            return None;
        }
        user.last_hourly_credit = Some(now);
        Some(credit(user, RewardKind::Hourly, self.config.hourly_amount))
    }

    /// Move the whole claimable balance into the claimed total.
    ///
    /// # Errors
    /// [`EngineError::NothingToClaim`] when the balance is zero.
    pub fn claim(&self, user: &mut User, now: DateTime<Utc>) -> Result<ClaimResult> {
        let amount = user.echo_balance;
        if amount <= 0.0 {
            return Err(EngineError::NothingToClaim);
        }
        user.echo_claimed_total += amount;
        user.echo_balance = 0.0;
        user.last_echo_claim = Some(now);
        Ok(ClaimResult {
            amount_claimed: amount,
            claimed_total: user.echo_claimed_total,
        })
    }
}

fn credit(user: &mut User, kind: RewardKind, amount: f64) -> RewardGrant {
    user.echo_balance += amount;
    RewardGrant {
        kind,
        amount,
        new_balance: user.echo_balance,
    }
}

/// Start of the aligned `period_secs` window containing `now`.
#[must_use]
pub fn align_window(now: DateTime<Utc>, period_secs: u64) -> DateTime<Utc> {
    let period = i64::try_from(period_secs.max(1)).unwrap_or(i64::MAX);
    let start = now.timestamp().div_euclid(period) * period;
    DateTime::from_timestamp(start, 0).unwrap_or(now)
}
