//! Bounded trust / curiosity / boredom tracking.
//!
//! Updates are pure: a tracker maps `(state, cues)` to a new state and never
//! touches anything else. Every axis is clamped after each step.

use crate::config::DispositionConfig;
use crate::emotion::{self, EmotionCategory};
use crate::types::AiState;

/// Everything the tracker looks at for one user message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispositionCues<'a> {
    /// Signed score delta of the message.
    pub delta: i32,
    /// Normalised emotion label.
    pub label: &'a str,
    /// Intensity in [0, 1].
    pub intensity: f32,
    /// The classifier flagged a contradiction with earlier statements.
    pub inconsistent: bool,
    /// Same normalised content as the previous user message.
    pub repetitive: bool,
}

/// Applies per-message increments to an [`AiState`].
#[derive(Debug, Clone)]
pub struct DispositionTracker {
    config: DispositionConfig,
}

impl DispositionTracker {
    /// Create a tracker from config.
    #[must_use]
    pub fn new(config: &DispositionConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Starting state of a new conversation.
    #[must_use]
    pub fn initial(&self) -> AiState {
        AiState::new(
            self.config.initial_trust,
            self.config.initial_curiosity,
            self.config.initial_boredom,
        )
    }

    /// Update from a delta and label alone, at full intensity.
    #[must_use]
    pub fn update(&self, state: AiState, delta: i32, label: &str) -> AiState {
        self.update_with(
            state,
            &DispositionCues {
                delta,
                label,
                intensity: 1.0,
                inconsistent: false,
                repetitive: false,
            },
        )
    }

    /// Update from the full set of cues.
    #[must_use]
    pub fn update_with(&self, state: AiState, cues: &DispositionCues<'_>) -> AiState {
        let c = &self.config;
        let traits = emotion::lookup(cues.label);
        let intensity = if cues.intensity.is_finite() {
            cues.intensity.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut trust = state.trust;
        let mut curiosity = state.curiosity;
        let mut boredom = state.boredom;

        #[allow(clippy::cast_precision_loss)]
        {
            trust += cues.delta as f32 * c.trust_per_delta;
        }
        if cues.inconsistent {
            trust -= c.inconsistency_penalty;
        } else if traits.category != EmotionCategory::Neutral {
            trust += c.disclosure_bonus;
        }

        if cues.repetitive || (traits.category == EmotionCategory::Neutral && !traits.engaging) {
            boredom += c.boredom_step;
            curiosity -= c.curiosity_step * 0.25;
        } else if traits.engaging {
            boredom -= c.boredom_decay * intensity;
            curiosity += c.curiosity_step * intensity;
        }

        AiState::new(trust, curiosity, boredom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DispositionTracker {
        DispositionTracker::new(&DispositionConfig::default())
    }

    fn cues(delta: i32, label: &str, intensity: f32) -> DispositionCues<'_> {
        DispositionCues {
            delta,
            label,
            intensity,
            inconsistent: false,
            repetitive: false,
        }
    }

    #[test]
    fn engaging_positive_raises_trust_and_curiosity() {
        let t = tracker();
        let start = t.initial();
        let next = t.update_with(start, &cues(9, "joy", 0.9));
        assert!(next.trust > start.trust);
        assert!(next.curiosity > start.curiosity);
        assert!(next.boredom < start.boredom);
    }

    #[test]
    fn neutral_input_bores() {
        let t = tracker();
        let start = t.initial();
        let next = t.update(start, 0, "neutral");
        assert!(next.boredom > start.boredom);
        assert!(next.curiosity < start.curiosity);
        assert_eq!(next.trust, start.trust);
    }

    #[test]
    fn repetition_bores_even_with_an_engaging_label() {
        let t = tracker();
        let start = t.initial();
        let next = t.update_with(
            start,
            &DispositionCues {
                repetitive: true,
                ..cues(5, "joy", 0.5)
            },
        );
        assert!(next.boredom > start.boredom);
    }

    #[test]
    fn inconsistency_costs_trust() {
        let t = tracker();
        let start = t.initial();
        let next = t.update_with(
            start,
            &DispositionCues {
                inconsistent: true,
                ..cues(0, "calm", 0.3)
            },
        );
        assert!(next.trust < start.trust);
    }

    #[test]
    fn axes_saturate_at_bounds() {
        let t = tracker();
        let mut s = AiState::new(99.0, 99.0, 1.0);
        for _ in 0..20 {
            s = t.update_with(s, &cues(10, "excitement", 1.0));
        }
        assert_eq!(s.trust, 100.0);
        assert_eq!(s.curiosity, 100.0);
        assert_eq!(s.boredom, 0.0);

        for _ in 0..40 {
            s = t.update_with(
                s,
                &DispositionCues {
                    inconsistent: true,
                    ..cues(-10, "neutral", 1.0)
                },
            );
        }
        assert_eq!(s.trust, 0.0);
        assert_eq!(s.boredom, 100.0);
        assert!(s.is_bounded());
    }
}
