//! Core types for LLM requests and responses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A request to the LLM.
#[derive(Debug, Clone, Serialize)]
pub struct LlmRequest {
    /// System prompt (persona role, output contract).
    pub system: String,
    /// User prompt (recent history and the message to classify).
    pub user: String,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f32,
    /// Ask the backend to constrain output to a JSON object.
    pub json_mode: bool,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl LlmRequest {
    /// Create a low-temperature JSON request suitable for classification.
    #[must_use]
    pub fn classification(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 200,
            temperature: 0.2,
            json_mode: true,
            timeout_ms: 5000,
        }
    }

    /// Create a free-text request.
    #[must_use]
    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: 300,
            temperature: 0.7,
            json_mode: false,
            timeout_ms: 5000,
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set the token budget.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// A response from the LLM.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// How many tokens were generated.
    pub tokens_generated: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Which model was used.
    pub model: String,
}

/// Structured classification of one user message.
///
/// Every field is optional on the wire; absent fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponse {
    /// Dominant emotion, lower-case (`"joy"`, `"anger"`, ...).
    #[serde(default = "default_label", alias = "emotion")]
    pub label: String,
    /// Strength of the emotion in `[0, 1]`.
    #[serde(default)]
    pub intensity: f32,
    /// Short topic phrases.
    #[serde(default)]
    pub topics: Vec<String>,
    /// Durable facts the user disclosed about themself.
    #[serde(default)]
    pub key_facts: BTreeMap<String, String>,
    /// Personality observations about the user.
    #[serde(default)]
    pub personality_signals: Vec<String>,
    /// Whether the message contradicts earlier statements.
    #[serde(default)]
    pub inconsistent: bool,
}

impl Default for ClassificationResponse {
    fn default() -> Self {
        Self {
            label: default_label(),
            intensity: 0.0,
            topics: Vec::new(),
            key_facts: BTreeMap::new(),
            personality_signals: Vec::new(),
            inconsistent: false,
        }
    }
}

fn default_label() -> String { "neutral".to_string() }
