//! Core type definitions for the persona engine.
//!
//! All types are serializable so the whole user aggregate can be stored as a
//! single JSON document.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Stable, verified identifier of a user (wallet address, World ID nullifier, ...).
///
/// Immutable once a record is created; the engine never rewrites it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap a verified identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of a chat session. One open conversation exists per session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Unique identifier for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random message ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the user proved their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Signed wallet challenge.
    #[default]
    Wallet,
    /// World ID proof of personhood.
    WorldId,
    /// Unverified guest session.
    Guest,
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The human.
    User,
    /// The scripted persona.
    Assistant,
}

// ---------------------------------------------------------------------------
// Emotion
// ---------------------------------------------------------------------------

/// Per-message emotion annotation as stored on a [`crate::record::Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAnalysis {
    /// Normalised emotion label ("joy", "neutral", ...).
    pub label: String,
    /// Intensity in [0, 1].
    pub intensity: f32,
    /// Display colour tag for the label.
    pub color: String,
}

impl EmotionAnalysis {
    /// The annotation used whenever a classification is missing or unusable.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            label: crate::emotion::NEUTRAL.to_string(),
            intensity: 0.0,
            color: crate::emotion::lookup(crate::emotion::NEUTRAL).color.to_string(),
        }
    }
}

impl Default for EmotionAnalysis {
    fn default() -> Self {
        Self::neutral()
    }
}

// ---------------------------------------------------------------------------
// Disposition vector
// ---------------------------------------------------------------------------

/// Lower bound of every disposition axis.
pub const AXIS_MIN: f32 = 0.0;
/// Upper bound of every disposition axis.
pub const AXIS_MAX: f32 = 100.0;

/// The persona's three-axis mood toward the user within one conversation.
///
/// Every axis lives in [`AXIS_MIN`, `AXIS_MAX`]; [`AiState::new`] clamps.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AiState {
    /// How much the persona believes what the user discloses.
    pub trust: f32,
    /// How interested the persona is in continuing.
    pub curiosity: f32,
    /// How disengaged the persona has become.
    pub boredom: f32,
}

impl AiState {
    /// Create a disposition vector, clamping every axis.
    #[must_use]
    pub fn new(trust: f32, curiosity: f32, boredom: f32) -> Self {
        Self {
            trust: clamp_axis(trust),
            curiosity: clamp_axis(curiosity),
            boredom: clamp_axis(boredom),
        }
    }

    /// Whether every axis is inside bounds.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        [self.trust, self.curiosity, self.boredom]
            .iter()
            .all(|v| (AXIS_MIN..=AXIS_MAX).contains(v))
    }
}

impl Default for AiState {
    fn default() -> Self {
        Self::new(50.0, 50.0, 20.0)
    }
}

impl fmt::Display for AiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trust {:.0} / curiosity {:.0} / boredom {:.0}",
            self.trust, self.curiosity, self.boredom
        )
    }
}

/// Clamp a single axis value; NaN collapses to the lower bound.
#[must_use]
pub fn clamp_axis(value: f32) -> f32 {
    if value.is_nan() {
        AXIS_MIN
    } else {
        value.clamp(AXIS_MIN, AXIS_MAX)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Milliseconds between two instants, zero if `to` is not after `from`.
#[must_use]
pub fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn ai_state_clamps_on_construction() {
        let s = AiState::new(-5.0, 250.0, f32::NAN);
        assert_eq!(s.trust, 0.0);
        assert_eq!(s.curiosity, 100.0);
        assert_eq!(s.boredom, 0.0);
        assert!(s.is_bounded());
    }

    #[test]
    fn user_id_serializes_transparently() {
        let id = UserId::new("0xabc");
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "\"0xabc\"");
    }

    #[test]
    fn millis_between_never_negative() {
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("valid");
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 2).single().expect("valid");
        assert_eq!(millis_between(a, b), 2000);
        assert_eq!(millis_between(b, a), 0);
    }
}
