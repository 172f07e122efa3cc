//! [`Classifier`] backed by an LLM.

use std::sync::Arc;

use persona_core::metrics::spans;
use persona_core::{Classification, Classifier, EngineError, Result};
use persona_llm::{ClassificationResponse, LlmClient, LlmError};
use tracing::Instrument;

/// Classifies messages by asking an LLM for a JSON verdict.
///
/// The engine adds its own deadline on top; `request_timeout_ms` bounds each
/// HTTP attempt so retries fit inside it.
#[derive(Clone)]
pub struct LlmClassifier {
    client: Arc<LlmClient>,
    persona_name: String,
    request_timeout_ms: u64,
}

impl LlmClassifier {
    /// Wrap `client`.
    #[must_use]
    pub fn new(client: Arc<LlmClient>, persona_name: impl Into<String>, request_timeout_ms: u64) -> Self {
        Self {
            client,
            persona_name: persona_name.into(),
            request_timeout_ms,
        }
    }

    /// Whether a backend is configured at all.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.client.is_available()
    }
}

impl Classifier for LlmClassifier {
    async fn classify(&self, content: &str, history: &[String]) -> Result<Classification> {
        let span = tracing::debug_span!(spans::CLASSIFY, model = self.client.model());
        self.client
            .classify(&self.persona_name, content, history, self.request_timeout_ms)
            .instrument(span)
            .await
            .map(to_classification)
            .map_err(to_engine_error)
    }
}

/// Map an LLM verdict onto the engine's input type.
#[must_use]
pub fn to_classification(response: ClassificationResponse) -> Classification {
    Classification {
        label: response.label,
        intensity: response.intensity,
        topics: response.topics,
        key_facts: response.key_facts,
        personality_signals: response.personality_signals,
        inconsistent: response.inconsistent,
    }
}

/// Map LLM failures onto engine errors.
#[must_use]
pub fn to_engine_error(err: LlmError) -> EngineError {
    match err {
        LlmError::Timeout(ms) => EngineError::ClassificationTimeout(ms),
        other => EngineError::ClassifierFailed(other.to_string()),
    }
}
