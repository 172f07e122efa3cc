//! The per-user aggregate and everything nested in it.
//!
//! A [`User`] is the unit of persistence and of serialization: every engine
//! operation loads one, mutates a copy and commits the copy whole.

mod conversation;
mod stats;

pub use conversation::{Conversation, ConversationSummary, Message};
pub use stats::GlobalStats;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{AiState, AuthMethod, SessionId, UserId};

/// Display profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Shown in the chat header.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar image location.
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Prompt-ready distillation of what the persona remembers about a user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDigest {
    /// Digest text, bounded in length.
    #[serde(default)]
    pub text: String,
    /// When the text was produced. `None` until the first synthesis.
    #[serde(default)]
    pub last_synthesized_at: Option<DateTime<Utc>>,
}

impl MemoryDigest {
    /// Whether anything has been synthesized yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Root aggregate for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Verified identifier. Never changes.
    pub id: UserId,
    /// How the identity was proven.
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Display profile.
    #[serde(default)]
    pub profile: UserProfile,
    /// Mirror of the most recently scored conversation total.
    #[serde(default)]
    pub current_score: i64,
    /// Consumable credit spent on messages.
    #[serde(default)]
    pub cru_balance: f64,
    /// Reward credit waiting to be claimed.
    #[serde(default)]
    pub echo_balance: f64,
    /// Everything ever claimed.
    #[serde(default)]
    pub echo_claimed_total: f64,
    /// Last successful claim.
    #[serde(default)]
    pub last_echo_claim: Option<DateTime<Utc>>,
    /// Last connection bonus grant.
    #[serde(default)]
    pub last_connection_bonus: Option<DateTime<Utc>>,
    /// Anchor of the last verification bonus.
    #[serde(default)]
    pub last_world_id_verification: Option<DateTime<Utc>>,
    /// Last hourly credit.
    #[serde(default)]
    pub last_hourly_credit: Option<DateTime<Utc>>,
    /// Last admitted message.
    #[serde(default)]
    pub last_message_sent: Option<DateTime<Utc>>,
    /// Set once the free first message is spent.
    #[serde(default)]
    pub has_used_first_message: bool,
    /// Admitted messages on the current UTC day.
    #[serde(default)]
    pub daily_message_count: u32,
    /// When the daily counter was last reset.
    pub daily_message_count_reset: DateTime<Utc>,
    /// Lifetime statistics.
    #[serde(default)]
    pub global_stats: GlobalStats,
    /// Latest synthesized digest.
    #[serde(default)]
    pub memory: MemoryDigest,
    /// Every conversation, oldest first.
    #[serde(default)]
    pub conversations: Vec<Conversation>,
    /// Optimistic-concurrency version, bumped by the store on every commit.
    #[serde(default)]
    pub version: u64,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh record with zero balances.
    #[must_use]
    pub fn new(id: UserId, auth_method: AuthMethod, now: DateTime<Utc>) -> Self {
        Self {
            id,
            auth_method,
            profile: UserProfile::default(),
            current_score: 0,
            cru_balance: 0.0,
            echo_balance: 0.0,
            echo_claimed_total: 0.0,
            last_echo_claim: None,
            last_connection_bonus: None,
            last_world_id_verification: None,
            last_hourly_credit: None,
            last_message_sent: None,
            has_used_first_message: false,
            daily_message_count: 0,
            daily_message_count_reset: now,
            global_stats: GlobalStats::default(),
            memory: MemoryDigest::default(),
            conversations: Vec::new(),
            version: 0,
            created_at: now,
        }
    }

    /// The open conversation for a session, if any.
    #[must_use]
    pub fn active_conversation(&self, session: &SessionId) -> Option<&Conversation> {
        self.conversations
            .iter()
            .rev()
            .find(|c| &c.session_id == session && c.is_open())
    }

    /// Mutable access to the open conversation for a session.
    pub fn active_conversation_mut(&mut self, session: &SessionId) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .rev()
            .find(|c| &c.session_id == session && c.is_open())
    }

    /// Index of the open conversation for `session`, starting one with
    /// `initial` disposition when none is open.
    pub(crate) fn open_conversation(
        &mut self,
        session: &SessionId,
        initial: AiState,
        now: DateTime<Utc>,
    ) -> usize {
        if let Some(idx) = self
            .conversations
            .iter()
            .rposition(|c| &c.session_id == session && c.is_open())
        {
            return idx;
        }
        self.conversations
            .push(Conversation::new(session.clone(), initial, now));
        self.global_stats.total_conversations += 1;
        self.conversations.len() - 1
    }

    /// Most recently started conversation of any session.
    #[must_use]
    pub fn latest_conversation(&self) -> Option<&Conversation> {
        self.conversations.iter().max_by_key(|c| c.started_at)
    }

    /// Whether the user chatted or connected at or after `since`.
    #[must_use]
    pub fn active_since(&self, since: DateTime<Utc>) -> bool {
        [self.last_message_sent, self.last_connection_bonus]
            .into_iter()
            .flatten()
            .any(|t| t >= since)
    }

    /// Check stored invariants after a load.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidState`] describing the first violation.
    pub fn verify(&self) -> Result<()> {
        for (field, value) in [
            ("cru_balance", self.cru_balance),
            ("echo_balance", self.echo_balance),
            ("echo_claimed_total", self.echo_claimed_total),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::InvalidState(format!(
                    "user {}: {field} is {value}",
                    self.id
                )));
            }
        }
        let mut open = BTreeSet::new();
        for conversation in &self.conversations {
            conversation.verify()?;
            if conversation.is_open() && !open.insert(conversation.session_id.as_str()) {
                return Err(EngineError::InvalidState(format!(
                    "user {}: more than one open conversation for session {}",
                    self.id, conversation.session_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn open_conversation_reuses_open_and_starts_after_close() {
        let now = Utc::now();
        let mut user = User::new(UserId::new("u"), AuthMethod::Wallet, now);
        let s = SessionId::new("s1");

        let first = user.open_conversation(&s, AiState::default(), now);
        let again = user.open_conversation(&s, AiState::default(), now);
        assert_eq!(first, again);
        assert_eq!(user.global_stats.total_conversations, 1);

        user.conversations[first].closed_at = Some(now);
        let second = user.open_conversation(&s, AiState::default(), now + Duration::seconds(1));
        assert_ne!(first, second);
        assert_eq!(user.global_stats.total_conversations, 2);
        assert!(user.verify().is_ok());
    }

    #[test]
    fn verify_rejects_negative_balance() {
        let mut user = User::new(UserId::new("u"), AuthMethod::Guest, Utc::now());
        user.echo_balance = -0.5;
        assert!(matches!(user.verify(), Err(EngineError::InvalidState(_))));
    }

    #[test]
    fn verify_rejects_two_open_conversations_per_session() {
        let now = Utc::now();
        let mut user = User::new(UserId::new("u"), AuthMethod::Wallet, now);
        let s = SessionId::new("s");
        user.conversations.push(Conversation::new(s.clone(), AiState::default(), now));
        user.conversations.push(Conversation::new(s, AiState::default(), now));
        assert!(user.verify().is_err());
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let json = r#"{
            "id": "0xabc",
            "daily_message_count_reset": "2024-01-01T00:00:00Z",
            "created_at": "2024-01-01T00:00:00Z"
        }"#;
        let user: User = serde_json::from_str(json).expect("deserialize");
        assert_eq!(user.auth_method, AuthMethod::Wallet);
        assert!(user.conversations.is_empty());
        assert!(user.global_stats.lifetime.key_user_info.is_empty());
        assert!(!user.has_used_first_message);
    }
}
