//! Chat service: one method per session event, on top of [`Engine`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use persona_core::{
    AuthMethod, ClaimResult, Classifier, Engine, EngineError, MemoryDigest, MessageId, Result, RewardGrant,
    ScoreUpdate, SessionId, User, UserId, VerificationEvent,
};
use tracing::{debug, info};

use crate::events::{ChatEvent, EventOutcome};

/// Routes session events to the engine.
pub struct ChatService<C> {
    engine: Arc<Engine>,
    classifier: C,
}

impl<C: Classifier> ChatService<C> {
    /// Create a service over a shared engine.
    pub fn new(engine: Arc<Engine>, classifier: C) -> Self {
        Self { engine, classifier }
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Handle any [`ChatEvent`].
    ///
    /// # Errors
    /// Whatever the specific handler returns.
    pub async fn dispatch(&self, event: ChatEvent) -> Result<EventOutcome> {
        debug!(user = %event.user_id(), kind = event.kind(), "dispatching event");
        match event {
            ChatEvent::Login { user_id, auth_method } => {
                let (_, bonus) = self.login(&user_id, auth_method).await?;
                Ok(EventOutcome::LoggedIn { bonus })
            }
            ChatEvent::Message { user_id, session_id, content } => {
                self.send_message(&user_id, &session_id, &content).await.map(EventOutcome::Scored)
            }
            ChatEvent::Reply { user_id, session_id, content, timestamp } => self
                .record_reply(&user_id, &session_id, &content, timestamp)
                .await
                .map(EventOutcome::ReplyRecorded),
            ChatEvent::Verified(event) => {
                let bonus = self.verify(&event).await?;
                Ok(EventOutcome::Verified { bonus })
            }
            ChatEvent::Claim { user_id } => self.claim(&user_id).await.map(EventOutcome::Claimed),
            ChatEvent::Logout { user_id, session_id } => self
                .end_session(&user_id, &session_id)
                .await
                .map(EventOutcome::SessionClosed),
        }
    }

    /// Load or register the user and grant the connection bonus when due.
    ///
    /// # Errors
    /// Storage failures; a bonus still on cooldown is not an error.
    pub async fn login(&self, id: &UserId, auth_method: AuthMethod) -> Result<(User, Option<RewardGrant>)> {
        self.engine.ensure_user(id, auth_method).await?;
        let bonus = on_cooldown_to_none(self.engine.grant_connection_bonus(id).await)?;
        let user = self.engine.user(id)?;
        info!(user = %id, bonus = bonus.is_some(), "user logged in");
        Ok((user, bonus))
    }

    /// Admit, classify and score a user message.
    ///
    /// # Errors
    /// [`EngineError::RateLimited`] when the message is not admitted,
    /// [`EngineError::UserNotFound`] for unknown users.
    pub async fn send_message(&self, id: &UserId, session: &SessionId, content: &str) -> Result<ScoreUpdate> {
        self.engine.chat(id, session, content, &self.classifier).await
    }

    /// Store the persona's reply.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`] and storage failures.
    pub async fn record_reply(
        &self,
        id: &UserId,
        session: &SessionId,
        content: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageId> {
        self.engine.record_reply(id, session, content, timestamp).await
    }

    /// Grant the verification bonus when due.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`] and storage failures.
    pub async fn verify(&self, event: &VerificationEvent) -> Result<Option<RewardGrant>> {
        on_cooldown_to_none(self.engine.grant_verification_bonus(event).await)
    }

    /// Claim the whole ECHO balance.
    ///
    /// # Errors
    /// [`EngineError::NothingToClaim`] on an empty balance.
    pub async fn claim(&self, id: &UserId) -> Result<ClaimResult> {
        self.engine.claim(id).await
    }

    /// Current memory digest, for prompt assembly.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`].
    pub fn memory(&self, id: &UserId) -> Result<MemoryDigest> {
        self.engine.memory(id)
    }

    /// Close the session's conversation.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`] and storage failures.
    pub async fn end_session(&self, id: &UserId, session: &SessionId) -> Result<Option<MemoryDigest>> {
        self.engine.close_conversation(id, session).await
    }
}

fn on_cooldown_to_none(result: Result<RewardGrant>) -> Result<Option<RewardGrant>> {
    match result {
        Ok(grant) => Ok(Some(grant)),
        Err(EngineError::RewardOnCooldown { reward, retry_after_ms }) => {
            debug!(%reward, retry_after_ms, "reward not yet due");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
