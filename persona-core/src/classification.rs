//! Classified message input and the classifier seam.
//!
//! The engine never infers emotion itself. It receives a [`Classification`]
//! produced by some [`Classifier`], and any failure to obtain one in time
//! degrades to [`Classification::neutral`].

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::emotion::{self, NEUTRAL};
use crate::error::{EngineError, Result};
use crate::types::Role;

/// What the classifier inferred about one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Emotion label, free-form.
    #[serde(default = "neutral_label")]
    pub label: String,
    /// Intensity in [0, 1].
    #[serde(default)]
    pub intensity: f32,
    /// Topic tokens.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Extracted facts about the user.
    #[serde(default)]
    pub key_facts: BTreeMap<String, String>,
    /// Personality observations.
    #[serde(default)]
    pub personality_signals: Vec<String>,
    /// The message contradicts something the user said before.
    #[serde(default)]
    pub inconsistent: bool,
}

impl Classification {
    /// The fallback used when no usable classification is available.
    #[must_use]
    pub fn neutral() -> Self {
        Self {
            label: NEUTRAL.to_string(),
            intensity: 0.0,
            topics: Vec::new(),
            key_facts: BTreeMap::new(),
            personality_signals: Vec::new(),
            inconsistent: false,
        }
    }

    /// Shorthand for a bare label / intensity pair.
    #[must_use]
    pub fn labeled(label: impl Into<String>, intensity: f32) -> Self {
        Self {
            label: label.into(),
            intensity,
            ..Self::neutral()
        }
    }

    /// Normalise the label, clamp intensity and drop blank topics and signals.
    /// A blank label or a non-finite intensity yields a neutral reading.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        match emotion::normalize_label(&self.label) {
            Some(label) if self.intensity.is_finite() => {
                self.label = label;
                self.intensity = self.intensity.clamp(0.0, 1.0);
            }
            _ => {
                self.label = NEUTRAL.to_string();
                self.intensity = 0.0;
            }
        }
        self.topics.retain(|t| !t.trim().is_empty());
        self.personality_signals.retain(|s| !s.trim().is_empty());
        self
    }

    /// Whether this is the neutral label.
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.label == NEUTRAL
    }
}

impl Default for Classification {
    fn default() -> Self {
        Self::neutral()
    }
}

/// An inbound chat turn with its classification attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
    /// When it was sent.
    pub timestamp: DateTime<Utc>,
    /// What the classifier made of it.
    #[serde(default)]
    pub classification: Classification,
}

impl ClassifiedMessage {
    /// A user turn.
    #[must_use]
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>, classification: Classification) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp,
            classification,
        }
    }
}

/// Produces a [`Classification`] for a user message.
pub trait Classifier: Send + Sync {
    /// Classify `content`. `history` holds earlier user messages of the
    /// conversation, oldest first.
    fn classify(
        &self,
        content: &str,
        history: &[String],
    ) -> impl Future<Output = Result<Classification>> + Send;
}

/// Result of a bounded classification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Classified {
    /// Sanitized classification, neutral on failure.
    pub classification: Classification,
    /// Set when the classifier failed or timed out and neutral was substituted.
    pub fell_back: bool,
}

/// Call `classifier` with a hard `timeout`.
///
/// # Errors
/// [`EngineError::ClassificationTimeout`] when the deadline passes, or the
/// classifier's own error.
pub async fn classify_with_timeout<C: Classifier>(
    classifier: &C,
    content: &str,
    history: &[String],
    timeout: Duration,
) -> Result<Classification> {
    let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    match tokio::time::timeout(timeout, classifier.classify(content, history)).await {
        Ok(result) => result.map(Classification::sanitized),
        Err(_) => Err(EngineError::ClassificationTimeout(millis)),
    }
}

/// Like [`classify_with_timeout`] but never fails: errors are logged and
/// replaced by the neutral classification.
pub async fn classify_or_neutral<C: Classifier>(
    classifier: &C,
    content: &str,
    history: &[String],
    timeout: Duration,
) -> Classified {
    match classify_with_timeout(classifier, content, history, timeout).await {
        Ok(classification) => Classified {
            classification,
            fell_back: false,
        },
        Err(e) => {
            warn!(error = %e, "classification unavailable, scoring as neutral");
            Classified {
                classification: Classification::neutral(),
                fell_back: true,
            }
        }
    }
}

fn neutral_label() -> String {
    NEUTRAL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<Classification>);

    impl Classifier for Fixed {
        async fn classify(&self, _content: &str, _history: &[String]) -> Result<Classification> {
            self.0
                .clone()
                .ok_or_else(|| EngineError::ClassifierFailed("boom".into()))
        }
    }

    struct Slow;

    impl Classifier for Slow {
        async fn classify(&self, _content: &str, _history: &[String]) -> Result<Classification> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Classification::labeled("joy", 1.0))
        }
    }

    #[test]
    fn sanitize_normalises_and_clamps() {
        let c = Classification::labeled("  JOY ", 3.0).sanitized();
        assert_eq!(c.label, "joy");
        assert_eq!(c.intensity, 1.0);
    }

    #[test]
    fn sanitize_blank_or_nan_is_neutral() {
        assert!(Classification::labeled("  ", 0.8).sanitized().is_neutral());
        let c = Classification::labeled("anger", f32::NAN).sanitized();
        assert!(c.is_neutral());
        assert_eq!(c.intensity, 0.0);
    }

    #[test]
    fn unknown_label_is_kept() {
        let c = Classification::labeled("Wistful", 0.4).sanitized();
        assert_eq!(c.label, "wistful");
    }

    #[tokio::test]
    async fn error_falls_back_to_neutral() {
        let c = Fixed(None);
        let out = classify_or_neutral(&c, "hi", &[], Duration::from_secs(1)).await;
        assert!(out.fell_back);
        assert!(out.classification.is_neutral());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_falls_back_to_neutral() {
        let err = classify_with_timeout(&Slow, "hi", &[], Duration::from_millis(50))
            .await
            .expect_err("must time out");
        assert!(matches!(err, EngineError::ClassificationTimeout(50)));

        let out = classify_or_neutral(&Slow, "hi", &[], Duration::from_millis(50)).await;
        assert!(out.fell_back);
    }

    #[tokio::test]
    async fn success_is_sanitized() {
        let c = Fixed(Some(Classification::labeled("Joy", 0.5)));
        let out = classify_or_neutral(&c, "hi", &[], Duration::from_secs(1)).await;
        assert!(!out.fell_back);
        assert_eq!(out.classification.label, "joy");
    }
}
