//! Conversations and their append-only message log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::profile::EmotionalProfile;
use crate::types::{AiState, EmotionAnalysis, MessageId, Role, SessionId};

/// One chat turn. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// Author.
    pub role: Role,
    /// Text as sent.
    pub content: String,
    /// When it was sent.
    pub timestamp: DateTime<Utc>,
    /// Emotion annotation.
    #[serde(default)]
    pub emotion_analysis: EmotionAnalysis,
    /// Signed score contribution.
    #[serde(default)]
    pub score_change: i32,
}

/// Human-readable roll-up refreshed on every synthesis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Highest-count themes of the conversation.
    #[serde(default)]
    pub main_topics: Vec<String>,
    /// Narrative of how the mood moved.
    #[serde(default)]
    pub emotional_journey: String,
    /// Current mood label.
    #[serde(default)]
    pub mood: String,
}

/// A chat session's conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Session this conversation belongs to.
    pub session_id: SessionId,
    /// Append-only log.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Σ `score_change` over `messages`.
    #[serde(default)]
    pub total_score: i64,
    /// Persona disposition.
    #[serde(default)]
    pub ai_state: AiState,
    /// Conversation-scoped aggregate; starts empty.
    #[serde(default)]
    pub emotional_profile: EmotionalProfile,
    /// Latest summary.
    #[serde(default)]
    pub summary: ConversationSummary,
    /// When the conversation started.
    pub started_at: DateTime<Utc>,
    /// Set once the conversation is closed; a closed conversation never reopens.
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// User messages since the last digest synthesis.
    #[serde(default)]
    pub messages_since_synthesis: u32,
}

impl Conversation {
    /// Start a new conversation.
    #[must_use]
    pub fn new(session_id: SessionId, ai_state: AiState, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id,
            messages: Vec::new(),
            total_score: 0,
            ai_state,
            emotional_profile: EmotionalProfile::default(),
            summary: ConversationSummary::default(),
            started_at,
            closed_at: None,
            messages_since_synthesis: 0,
        }
    }

    /// Whether new messages may still be appended.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Append a message, keeping `total_score` in step.
    pub(crate) fn append(&mut self, message: Message) {
        self.total_score += i64::from(message.score_change);
        self.messages.push(message);
    }

    /// Σ `score_change` recomputed from the log.
    #[must_use]
    pub fn score_sum(&self) -> i64 {
        self.messages.iter().map(|m| i64::from(m.score_change)).sum()
    }

    /// User-authored messages in order.
    pub fn user_messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role == Role::User)
    }

    /// Content of the most recent user message.
    #[must_use]
    pub fn last_user_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    /// Check stored invariants.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] when the total drifted from the log or the
    /// disposition left its bounds.
    pub fn verify(&self) -> Result<()> {
        let sum = self.score_sum();
        if sum != self.total_score {
            return Err(EngineError::InvalidState(format!(
                "conversation {} total_score {} != message sum {sum}",
                self.session_id, self.total_score
            )));
        }
        if !self.ai_state.is_bounded() {
            return Err(EngineError::InvalidState(format!(
                "conversation {} disposition out of bounds: {}",
                self.session_id, self.ai_state
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: Role, content: &str, score: i32) -> Message {
        Message {
            id: MessageId::new(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            emotion_analysis: EmotionAnalysis::neutral(),
            score_change: score,
        }
    }

    #[test]
    fn append_tracks_total() {
        let mut c = Conversation::new(SessionId::new("s"), AiState::default(), Utc::now());
        c.append(msg(Role::User, "hi", 4));
        c.append(msg(Role::Assistant, "hello", 0));
        c.append(msg(Role::User, "ugh", -3));
        assert_eq!(c.total_score, 1);
        assert!(c.verify().is_ok());
        assert_eq!(c.last_user_content(), Some("ugh"));
        assert_eq!(c.user_messages().count(), 2);
    }

    #[test]
    fn verify_detects_drift() {
        let mut c = Conversation::new(SessionId::new("s"), AiState::default(), Utc::now());
        c.append(msg(Role::User, "hi", 4));
        c.total_score = 10;
        assert!(matches!(c.verify(), Err(EngineError::InvalidState(_))));
    }
}
