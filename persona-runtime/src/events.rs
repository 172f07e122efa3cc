//! Chat-session events that drive the engine.
//!
//! A transport layer turns its requests into [`ChatEvent`]s and hands them
//! to [`ChatService::dispatch`](crate::service::ChatService::dispatch).

use chrono::{DateTime, Utc};
use persona_core::{
    AuthMethod, ClaimResult, MemoryDigest, MessageId, RewardGrant, ScoreUpdate, SessionId, UserId,
    VerificationEvent,
};

/// Something that happened in a chat session.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// A verified identity connected.
    Login {
        user_id: UserId,
        auth_method: AuthMethod,
    },

    /// The user sent a message.
    Message {
        user_id: UserId,
        session_id: SessionId,
        content: String,
    },

    /// The persona answered.
    Reply {
        user_id: UserId,
        session_id: SessionId,
        content: String,
        timestamp: DateTime<Utc>,
    },

    /// An identity provider confirmed the user.
    Verified(VerificationEvent),

    /// The user asked to claim their ECHO balance.
    Claim { user_id: UserId },

    /// The session ended.
    Logout {
        user_id: UserId,
        session_id: SessionId,
    },
}

impl ChatEvent {
    /// Whose record this event touches.
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Login { user_id, .. }
            | Self::Message { user_id, .. }
            | Self::Reply { user_id, .. }
            | Self::Claim { user_id }
            | Self::Logout { user_id, .. } => user_id,
            Self::Verified(event) => &event.user_id,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Message { .. } => "message",
            Self::Reply { .. } => "reply",
            Self::Verified(_) => "verified",
            Self::Claim { .. } => "claim",
            Self::Logout { .. } => "logout",
        }
    }
}

/// What handling a [`ChatEvent`] produced.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Login processed; `bonus` is `None` inside the bonus window.
    LoggedIn { bonus: Option<RewardGrant> },
    /// Message admitted and scored.
    Scored(ScoreUpdate),
    /// Reply stored.
    ReplyRecorded(MessageId),
    /// Verification processed; `bonus` is `None` inside the bonus window.
    Verified { bonus: Option<RewardGrant> },
    /// Balance claimed.
    Claimed(ClaimResult),
    /// Session closed, with the refreshed digest when one was produced.
    SessionClosed(Option<MemoryDigest>),
}
