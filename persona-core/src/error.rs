//! Error types for the persona engine.

use std::time::Duration;

use thiserror::Error;

use crate::activity::DenialReason;
use crate::rewards::RewardKind;
use crate::types::UserId;

/// Top-level error type for all engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Admission denied by the activity ledger.
    #[error("Rate limited ({reason}): {}", wait_text(.retry_after_ms))]
    RateLimited {
        /// Which limit was hit.
        reason: DenialReason,
        /// Milliseconds until the limit lifts, if waiting helps at all.
        retry_after_ms: Option<u64>,
    },

    /// The external classifier did not answer in time.
    #[error("Classification timed out after {0}ms")]
    ClassificationTimeout(u64),

    /// The external classifier answered with an error.
    #[error("Classification failed: {0}")]
    ClassifierFailed(String),

    /// A claim was attempted against an empty ECHO balance.
    #[error("Nothing to claim: ECHO balance is 0")]
    NothingToClaim,

    /// A time-gated reward was requested inside its cooldown window.
    #[error("{reward} already granted: {}", wait_ms_text(.retry_after_ms))]
    RewardOnCooldown {
        /// Which reward.
        reward: RewardKind,
        /// Milliseconds until the window reopens.
        retry_after_ms: u64,
    },

    /// A stored record is corrupt or violates an invariant.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No record exists for the user.
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// A record already exists for the user.
    #[error("User already exists: {0}")]
    UserExists(UserId),

    /// Conditional writes kept losing against concurrent writers.
    #[error("Concurrent update conflict on {user} after {attempts} attempts")]
    ConcurrentUpdateConflict {
        /// Whose record.
        user: UserId,
        /// How many commits were attempted.
        attempts: u32,
    },

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// How long the caller should wait before retrying, when waiting helps.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => retry_after_ms.map(Duration::from_millis),
            Self::RewardOnCooldown { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// Whether the same request may succeed later without any change by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { retry_after_ms, .. } => retry_after_ms.is_some(),
            Self::RewardOnCooldown { .. }
            | Self::ConcurrentUpdateConflict { .. }
            | Self::ClassificationTimeout(_) => true,
            _ => false,
        }
    }
}

/// Render a wait as "try again in N minutes" (or seconds when under a minute).
#[must_use]
pub fn describe_wait(retry_after_ms: Option<u64>) -> String {
    match retry_after_ms {
        None => "no retry window".to_string(),
        Some(ms) if ms < 60_000 => {
            let secs = ms.div_ceil(1000).max(1);
            format!("try again in {secs} second{}", if secs == 1 { "" } else { "s" })
        }
        Some(ms) => {
            let mins = ms.div_ceil(60_000);
            format!("try again in {mins} minute{}", if mins == 1 { "" } else { "s" })
        }
    }
}

fn wait_text(retry_after_ms: &Option<u64>) -> String {
    describe_wait(*retry_after_ms)
}

fn wait_ms_text(retry_after_ms: &u64) -> String {
    describe_wait(Some(*retry_after_ms))
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_rendering() {
        assert_eq!(describe_wait(Some(400)), "try again in 1 second");
        assert_eq!(describe_wait(Some(2_500)), "try again in 3 seconds");
        assert_eq!(describe_wait(Some(60_000)), "try again in 1 minute");
        assert_eq!(describe_wait(Some(61_000)), "try again in 2 minutes");
        assert_eq!(describe_wait(None), "no retry window");
    }

    #[test]
    fn rate_limited_message_is_human_readable() {
        let err = EngineError::RateLimited {
            reason: DenialReason::Cooldown,
            retry_after_ms: Some(120_000),
        };
        let text = err.to_string();
        assert!(text.contains("cooldown"), "{text}");
        assert!(text.contains("2 minutes"), "{text}");
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn insufficient_credit_is_not_retryable() {
        let err = EngineError::RateLimited {
            reason: DenialReason::InsufficientCredit,
            retry_after_ms: None,
        };
        assert!(!err.is_retryable());
        assert!(err.retry_after().is_none());
        assert!(!EngineError::NothingToClaim.is_retryable());
    }
}
