//! Emotion label catalogue.
//!
//! The external classifier emits free-form labels. This table decides, for
//! engagement purposes, whether a label counts as positive, neutral or
//! negative, whether it is emotionally engaging, and which colour tag the UI
//! shows for it. Unknown labels fall back to neutral / not engaging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The label used for missing or unusable classifications.
pub const NEUTRAL: &str = "neutral";

/// Engagement polarity of an emotion label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionCategory {
    /// Raises the score.
    Positive,
    /// Leaves the score unchanged.
    Neutral,
    /// Lowers the score.
    Negative,
}

impl EmotionCategory {
    /// Categorise a (normalised) label.
    #[must_use]
    pub fn of(label: &str) -> Self {
        lookup(label).category
    }

    /// Sign applied to score magnitudes.
    #[must_use]
    pub fn sign(self) -> i32 {
        match self {
            Self::Positive => 1,
            Self::Neutral => 0,
            Self::Negative => -1,
        }
    }
}

impl fmt::Display for EmotionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positive => write!(f, "positive"),
            Self::Neutral => write!(f, "neutral"),
            Self::Negative => write!(f, "negative"),
        }
    }
}

/// Static properties of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmotionTraits {
    /// Polarity.
    pub category: EmotionCategory,
    /// Whether the label signals an emotionally engaged user.
    pub engaging: bool,
    /// Colour tag.
    pub color: &'static str,
}

const fn traits(category: EmotionCategory, engaging: bool, color: &'static str) -> EmotionTraits {
    EmotionTraits {
        category,
        engaging,
        color,
    }
}

const UNKNOWN: EmotionTraits = traits(EmotionCategory::Neutral, false, "#9E9E9E");

/// Look up a label. Expects a normalised label (see [`normalize_label`]).
#[must_use]
pub fn lookup(label: &str) -> EmotionTraits {
    use EmotionCategory::{Negative, Neutral, Positive};
    match label {
        "joy" | "happiness" | "happy" => traits(Positive, true, "#FFD54F"),
        "excitement" | "excited" => traits(Positive, true, "#FF9800"),
        "love" | "affection" => traits(Positive, true, "#E91E63"),
        "gratitude" | "grateful" => traits(Positive, true, "#8BC34A"),
        "amusement" | "amused" => traits(Positive, true, "#FFEB3B"),
        "curiosity" | "curious" | "interest" => traits(Positive, true, "#03A9F4"),
        "surprise" | "surprised" | "awe" => traits(Positive, true, "#00BCD4"),
        "hope" | "optimism" | "pride" => traits(Positive, true, "#4CAF50"),
        "admiration" => traits(Positive, true, "#9C27B0"),
        "calm" | "contentment" | "relief" => traits(Positive, false, "#80CBC4"),
        "neutral" => traits(Neutral, false, "#9E9E9E"),
        "boredom" | "bored" | "indifference" => traits(Neutral, false, "#BDBDBD"),
        "confusion" | "confused" => traits(Neutral, true, "#B39DDB"),
        "sadness" | "sad" | "grief" => traits(Negative, true, "#3F51B5"),
        "loneliness" | "lonely" => traits(Negative, true, "#5C6BC0"),
        "anger" | "angry" | "rage" => traits(Negative, true, "#F44336"),
        "fear" | "afraid" | "anxiety" | "anxious" => traits(Negative, true, "#673AB7"),
        "frustration" | "frustrated" | "annoyance" => traits(Negative, true, "#FF5722"),
        "disgust" | "contempt" => traits(Negative, true, "#795548"),
        "disappointment" | "disappointed" => traits(Negative, false, "#607D8B"),
        _ => UNKNOWN,
    }
}

/// Normalise a raw label: trimmed and lowercased. Empty input yields `None`.
#[must_use]
pub fn normalize_label(raw: &str) -> Option<String> {
    let label = raw.trim().to_lowercase();
    if label.is_empty() { None } else { Some(label) }
}
