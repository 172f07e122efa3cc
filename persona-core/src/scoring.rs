//! Classified message -> signed score delta, and score bookkeeping.

use crate::classification::Classification;
use crate::config::ScoringConfig;
use crate::emotion::{self, EmotionCategory, NEUTRAL};
use crate::record::{Conversation, GlobalStats, Message};
use crate::types::EmotionAnalysis;

/// A scored message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreDelta {
    /// Signed contribution, within `±max_delta`.
    pub delta: i32,
    /// Polarity of the label.
    pub category: EmotionCategory,
    /// Annotation to store on the message.
    pub analysis: EmotionAnalysis,
}

/// Maps classifications to deltas and keeps totals in step.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    max_delta: i32,
}

impl ScoringEngine {
    /// Create a scoring engine from config.
    #[must_use]
    pub fn new(config: &ScoringConfig) -> Self {
        Self {
            max_delta: config.max_delta.max(0),
        }
    }

    /// Score one classification.
    ///
    /// Magnitude is `round(intensity * max_delta)` with intensity clamped to
    /// [0, 1]; the label's category supplies the sign.
    #[must_use]
    pub fn score(&self, classification: &Classification) -> ScoreDelta {
        let (label, intensity) = match emotion::normalize_label(&classification.label) {
            Some(label) if classification.intensity.is_finite() => {
                (label, classification.intensity.clamp(0.0, 1.0))
            }
            _ => (NEUTRAL.to_string(), 0.0),
        };
        let traits = emotion::lookup(&label);
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        let magnitude = (intensity * self.max_delta as f32).round() as i32;
        let delta = traits.category.sign() * magnitude.clamp(0, self.max_delta);
        ScoreDelta {
            delta,
            category: traits.category,
            analysis: EmotionAnalysis {
                label,
                intensity,
                color: traits.color.to_string(),
            },
        }
    }

    /// Append a user message carrying `score_change` and roll the new
    /// conversation total into lifetime stats. Returns the new total.
    pub fn apply(&self, conversation: &mut Conversation, stats: &mut GlobalStats, message: Message) -> i64 {
        conversation.append(message);
        stats.record_score(conversation.total_score);
        conversation.total_score
    }
}
