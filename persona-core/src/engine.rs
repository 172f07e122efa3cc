//! The engine facade.
//!
//! Every mutation of a user record goes through [`Engine::mutate_user`]:
//! take the user's in-process lock, load, apply the change to a copy, then
//! commit with a conditional write. A lost race is retried with exponential
//! backoff. A change that returns an error is never committed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::activity::{ActivityLedger, AdmissionResult};
use crate::classification::{Classification, ClassifiedMessage, Classifier, classify_or_neutral};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::disposition::{DispositionCues, DispositionTracker};
use crate::error::{EngineError, Result};
use crate::metrics::EngineCounters;
use crate::profile::{ProfileAggregator, ProfileSample, normalize_token};
use crate::record::{MemoryDigest, Message, User};
use crate::rewards::{ClaimResult, RewardGrant, RewardScheduler, VerificationEvent};
use crate::scoring::ScoringEngine;
use crate::store::UserStore;
use crate::synthesis::{MemorySynthesizer, SynthesisPolicy};
use crate::types::{AiState, AuthMethod, EmotionAnalysis, MessageId, Role, SessionId, UserId};

/// Result of processing one user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    /// Conversation total after the message.
    pub new_total_score: i64,
    /// This message's contribution.
    pub score_change: i32,
    /// Disposition after the message.
    pub new_ai_state: AiState,
    /// Annotation stored on the message.
    pub new_emotion_analysis: EmotionAnalysis,
    /// Whether the memory digest was re-synthesized.
    pub digest_refreshed: bool,
    /// Message id assigned.
    pub message_id: MessageId,
}

/// Summary of one pass of the hourly credit over all users.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Users examined.
    pub users_seen: usize,
    /// Users credited.
    pub credited: usize,
    /// Users whose update failed.
    pub failed: usize,
}

/// Conversation memory and engagement engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    locks: DashMap<UserId, Arc<tokio::sync::Mutex<()>>>,
    ledger: ActivityLedger,
    scoring: ScoringEngine,
    disposition: DispositionTracker,
    profiles: ProfileAggregator,
    synthesizer: MemorySynthesizer,
    policy: SynthesisPolicy,
    rewards: RewardScheduler,
    counters: EngineCounters,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("locked_users", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine over `store`, reading time from `clock`.
    ///
    /// # Errors
    /// [`EngineError::Config`] when the configuration fails validation.
    pub fn new(config: EngineConfig, store: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            ledger: ActivityLedger::new(&config.activity),
            scoring: ScoringEngine::new(&config.scoring),
            disposition: DispositionTracker::new(&config.disposition),
            profiles: ProfileAggregator::new(&config.profile),
            synthesizer: MemorySynthesizer::new(&config.synthesis),
            policy: SynthesisPolicy::new(&config.synthesis),
            rewards: RewardScheduler::new(&config.rewards),
            counters: EngineCounters::new(),
            locks: DashMap::new(),
            config,
            store,
            clock,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Event counters.
    #[must_use]
    pub fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    /// Current time according to the engine's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Create a record for a newly verified identity.
    ///
    /// # Errors
    /// [`EngineError::UserExists`] if one already exists.
    pub async fn register_user(&self, id: &UserId, auth_method: AuthMethod) -> Result<User> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        let mut user = User::new(id.clone(), auth_method, self.clock.now());
        user.cru_balance = self.config.activity.starting_cru_balance;
        self.store.insert(&mut user)?;
        info!(user = %id, ?auth_method, "registered user");
        Ok(user)
    }

    /// Load a user, registering them first if unknown.
    ///
    /// # Errors
    /// Storage failures or a corrupt record.
    pub async fn ensure_user(&self, id: &UserId, auth_method: AuthMethod) -> Result<User> {
        if let Some(user) = self.store.load(id)? {
            user.verify()?;
            return Ok(user);
        }
        match self.register_user(id, auth_method).await {
            Err(EngineError::UserExists(_)) => self.user(id),
            other => other,
        }
    }

    /// Load a user.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`], or [`EngineError::InvalidState`] for a corrupt record.
    pub fn user(&self, id: &UserId) -> Result<User> {
        let user = self
            .store
            .load(id)?
            .ok_or_else(|| EngineError::UserNotFound(id.clone()))?;
        user.verify()?;
        Ok(user)
    }

    /// Every known user id.
    ///
    /// # Errors
    /// Storage failures.
    pub fn user_ids(&self) -> Result<Vec<UserId>> {
        self.store.list_ids()
    }

    /// The user's latest memory digest.
    ///
    /// # Errors
    /// As [`Engine::user`].
    pub fn memory(&self, id: &UserId) -> Result<MemoryDigest> {
        Ok(self.user(id)?.memory)
    }

    /// Earlier user messages of the open conversation, oldest first, at most `limit`.
    ///
    /// # Errors
    /// As [`Engine::user`].
    pub fn recent_user_messages(&self, id: &UserId, session: &SessionId, limit: usize) -> Result<Vec<String>> {
        let user = self.user(id)?;
        let Some(conversation) = user.active_conversation(session) else {
            return Ok(Vec::new());
        };
        let contents: Vec<String> = conversation.user_messages().map(|m| m.content.clone()).collect();
        let skip = contents.len().saturating_sub(limit);
        Ok(contents.into_iter().skip(skip).collect())
    }

    // ------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------

    /// The admission decision for a message sent now, without recording anything.
    ///
    /// # Errors
    /// As [`Engine::user`].
    pub fn check_admission(&self, id: &UserId) -> Result<AdmissionResult> {
        let user = self.user(id)?;
        Ok(self.ledger.check(&user, self.clock.now()))
    }

    /// Classify with the configured timeout, substituting neutral on failure.
    pub async fn classify<C: Classifier>(&self, classifier: &C, content: &str, history: &[String]) -> Classification {
        let timeout = Duration::from_millis(self.config.classifier.timeout_ms);
        let outcome = classify_or_neutral(classifier, content, history, timeout).await;
        if outcome.fell_back {
            EngineCounters::bump(&self.counters.classifier_fallbacks);
        }
        outcome.classification
    }

    /// Admission pre-check, classification (outside any lock), then
    /// [`Engine::process_message`].
    ///
    /// # Errors
    /// As [`Engine::process_message`].
    pub async fn chat<C: Classifier>(
        &self,
        id: &UserId,
        session: &SessionId,
        content: &str,
        classifier: &C,
    ) -> Result<ScoreUpdate> {
        if let Err(e) = self.check_admission(id)?.into_result() {
            EngineCounters::bump(&self.counters.rate_limited);
            return Err(e);
        }
        let history = self.recent_user_messages(id, session, 10)?;
        let classification = self.classify(classifier, content, &history).await;
        let message = ClassifiedMessage::user(content, self.clock.now(), classification);
        self.process_message(id, session, &message).await
    }

    /// Admit, score and record a classified user message in one commit.
    ///
    /// # Errors
    /// [`EngineError::RateLimited`] when admission fails; nothing is recorded then.
    pub async fn process_message(
        &self,
        id: &UserId,
        session: &SessionId,
        message: &ClassifiedMessage,
    ) -> Result<ScoreUpdate> {
        if message.role == Role::Assistant {
            return Err(EngineError::InvalidState(
                "assistant turns are recorded with record_reply".to_string(),
            ));
        }
        let classification = message.classification.clone().sanitized();
        let result = self
            .mutate_user(id, |user, now| self.apply_user_message(user, session, message, &classification, now))
            .await;
        match &result {
            Ok(update) => {
                EngineCounters::bump(&self.counters.messages_processed);
                if update.digest_refreshed {
                    EngineCounters::bump(&self.counters.digests_synthesized);
                }
                debug!(
                    user = %id,
                    session = %session,
                    delta = update.score_change,
                    total = update.new_total_score,
                    label = %update.new_emotion_analysis.label,
                    "message processed"
                );
            }
            Err(EngineError::RateLimited { reason, retry_after_ms }) => {
                EngineCounters::bump(&self.counters.rate_limited);
                debug!(user = %id, %reason, ?retry_after_ms, "message rate limited");
            }
            Err(_) => {}
        }
        result
    }

    fn apply_user_message(
        &self,
        user: &mut User,
        session: &SessionId,
        message: &ClassifiedMessage,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> Result<ScoreUpdate> {
        self.ledger.admit(user, now).into_result()?;

        let idx = user.open_conversation(session, self.disposition.initial(), now);
        let scored = self.scoring.score(classification);
        let repetitive = {
            let previous = user.conversations[idx].last_user_content().and_then(normalize_token);
            previous.is_some() && previous == normalize_token(&message.content)
        };

        let record = Message {
            id: MessageId::new(),
            role: Role::User,
            content: message.content.clone(),
            timestamp: message.timestamp,
            emotion_analysis: scored.analysis.clone(),
            score_change: scored.delta,
        };
        let message_id = record.id;
        let total = self
            .scoring
            .apply(&mut user.conversations[idx], &mut user.global_stats, record);
        user.current_score = total;

        let sample = ProfileSample {
            label: &scored.analysis.label,
            topics: &classification.topics,
            key_facts: &classification.key_facts,
            at: message.timestamp,
        };
        self.profiles.absorb(&mut user.global_stats.lifetime, &sample);
        user.global_stats
            .record_insights(&classification.personality_signals, self.config.profile.personality_insight_cap);

        let conversation = &mut user.conversations[idx];
        self.profiles.absorb(&mut conversation.emotional_profile, &sample);
        conversation.ai_state = self.disposition.update_with(
            conversation.ai_state,
            &DispositionCues {
                delta: scored.delta,
                label: &scored.analysis.label,
                intensity: scored.analysis.intensity,
                inconsistent: classification.inconsistent,
                repetitive,
            },
        );
        conversation.messages_since_synthesis += 1;
        let new_ai_state = conversation.ai_state;

        let digest_refreshed = self.policy.due_after_message(conversation.messages_since_synthesis);
        if digest_refreshed {
            self.synthesize_into(user, idx, now);
        }

        Ok(ScoreUpdate {
            new_total_score: total,
            score_change: scored.delta,
            new_ai_state,
            new_emotion_analysis: scored.analysis,
            digest_refreshed,
            message_id,
        })
    }

    fn synthesize_into(&self, user: &mut User, idx: usize, now: DateTime<Utc>) {
        let synthesis = self
            .synthesizer
            .synthesize(&user.conversations[idx], &user.global_stats, now);
        user.memory = synthesis.digest;
        let conversation = &mut user.conversations[idx];
        conversation.summary = synthesis.summary;
        conversation.messages_since_synthesis = 0;
    }

    /// Append an assistant reply. Replies carry no score and leave stats untouched.
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
        self.mutate_user(id, |user, now| {
            let had_open = user.active_conversation(session).is_some();
            let idx = user.open_conversation(session, self.disposition.initial(), now);
            if !had_open {
                debug!(user = %user.id, %session, "reply opened a new conversation");
            }
            let message = Message {
                id: MessageId::new(),
                role: Role::Assistant,
                content: content.to_string(),
                timestamp,
                emotion_analysis: EmotionAnalysis::neutral(),
                score_change: 0,
            };
            let message_id = message.id;
            user.conversations[idx].append(message);
            Ok(message_id)
        })
        .await
    }

    /// Close the session's open conversation. Returns the refreshed digest
    /// when synthesis on close is enabled, `None` when nothing was open or
    /// synthesis is disabled.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`] and storage failures.
    pub async fn close_conversation(&self, id: &UserId, session: &SessionId) -> Result<Option<MemoryDigest>> {
        let digest = self
            .transact(id, |user, now| {
                let Some(idx) = user
                    .conversations
                    .iter()
                    .rposition(|c| &c.session_id == session && c.is_open())
                else {
                    return Ok((None, false));
                };
                user.conversations[idx].closed_at = Some(now);
                if self.policy.due_on_close() {
                    self.synthesize_into(user, idx, now);
                    return Ok((Some(user.memory.clone()), true));
                }
                Ok((None, true))
            })
            .await?;
        if digest.is_some() {
            EngineCounters::bump(&self.counters.digests_synthesized);
        }
        info!(user = %id, %session, refreshed = digest.is_some(), "conversation closed");
        Ok(digest)
    }

    // ------------------------------------------------------------------
    // Rewards
    // ------------------------------------------------------------------

    /// Grant the login bonus.
    ///
    /// # Errors
    /// [`EngineError::RewardOnCooldown`] inside the window.
    pub async fn grant_connection_bonus(&self, id: &UserId) -> Result<RewardGrant> {
        let grant = self
            .mutate_user(id, |user, now| self.rewards.grant_connection_bonus(user, now))
            .await?;
        EngineCounters::bump(&self.counters.rewards_granted);
        info!(user = %id, amount = grant.amount, balance = grant.new_balance, "connection bonus granted");
        Ok(grant)
    }

    /// Grant the verification bonus for a verification event.
    ///
    /// # Errors
    /// [`EngineError::RewardOnCooldown`] inside the window.
    pub async fn grant_verification_bonus(&self, event: &VerificationEvent) -> Result<RewardGrant> {
        let grant = self
            .mutate_user(&event.user_id, |user, _now| self.rewards.grant_verification_bonus(user, event))
            .await?;
        EngineCounters::bump(&self.counters.rewards_granted);
        info!(user = %event.user_id, amount = grant.amount, "verification bonus granted");
        Ok(grant)
    }

    /// Apply the hourly credit to one user. Nothing is written when no credit is due.
    ///
    /// # Errors
    /// [`EngineError::UserNotFound`] and storage failures.
    pub async fn credit_hourly(&self, id: &UserId) -> Result<Option<RewardGrant>> {
        let grant = self
            .transact(id, |user, now| {
                let grant = self.rewards.credit_hourly(user, now);
                let dirty = grant.is_some();
                Ok((grant, dirty))
            })
            .await?;
        if grant.is_some() {
            EngineCounters::bump(&self.counters.rewards_granted);
        }
        Ok(grant)
    }

    /// Apply the hourly credit to every user, one lock at a time.
    ///
    /// # Errors
    /// Only when the user list cannot be read; per-user failures are logged and counted.
    pub async fn run_hourly_tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        for id in self.user_ids()? {
            report.users_seen += 1;
            match self.credit_hourly(&id).await {
                Ok(Some(_)) => report.credited += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(user = %id, error = %e, "hourly credit failed");
                }
            }
            tokio::task::yield_now().await;
        }
        info!(
            users = report.users_seen,
            credited = report.credited,
            failed = report.failed,
            "hourly tick complete"
        );
        Ok(report)
    }

    /// Move the user's whole ECHO balance into their claimed total.
    ///
    /// # Errors
    /// [`EngineError::NothingToClaim`] on an empty balance.
    pub async fn claim(&self, id: &UserId) -> Result<ClaimResult> {
        let result = self
            .mutate_user(id, |user, now| self.rewards.claim(user, now))
            .await?;
        EngineCounters::bump(&self.counters.claims);
        info!(user = %id, amount = result.amount_claimed, "echo claimed");
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Commit protocol
    // ------------------------------------------------------------------

    fn lock_for(&self, id: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(id.clone()).or_default().clone()
    }

    /// Run `change` against the user's record and commit the result.
    ///
    /// `change` receives a copy of the record and the current time. It may run
    /// more than once when a concurrent writer wins the conditional write.
    ///
    /// # Errors
    /// Whatever `change` returns (nothing is committed then),
    /// [`EngineError::UserNotFound`], or [`EngineError::ConcurrentUpdateConflict`]
    /// after `max_update_retries` lost races.
    pub async fn mutate_user<T, F>(&self, id: &UserId, mut change: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut User, DateTime<Utc>) -> Result<T> + Send,
    {
        self.transact(id, |user, now| change(user, now).map(|v| (v, true)))
            .await
    }

    async fn transact<T, F>(&self, id: &UserId, mut change: F) -> Result<T>
    where
        T: Send,
        F: FnMut(&mut User, DateTime<Utc>) -> Result<(T, bool)> + Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let attempts = self.config.persistence.max_update_retries;
        for attempt in 1..=attempts {
            let current = self
                .store
                .load(id)?
                .ok_or_else(|| EngineError::UserNotFound(id.clone()))?;
            current.verify()?;
            let expected = current.version;
            let mut draft = current;

            let (value, dirty) = change(&mut draft, self.clock.now())?;
            if !dirty {
                return Ok(value);
            }
            if self.store.compare_and_swap(&mut draft, expected)? {
                return Ok(value);
            }

            EngineCounters::bump(&self.counters.cas_retries);
            if attempt < attempts {
                let backoff = self.backoff(attempt);
                debug!(user = %id, attempt, backoff_ms = backoff.as_millis(), "version conflict, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
        warn!(user = %id, attempts, "giving up after repeated version conflicts");
        Err(EngineError::ConcurrentUpdateConflict {
            user: id.clone(),
            attempts,
        })
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .persistence
            .retry_backoff_ms
            .saturating_mul(1_u64 << attempt.saturating_sub(1).min(16));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::DenialReason;
    use crate::clock::ManualClock;
    use crate::store::MemoryUserStore;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).single().expect("valid")
    }

    fn engine_with(config: EngineConfig) -> (Engine, ManualClock) {
        let clock = ManualClock::new(start());
        let engine = Engine::new(config, Arc::new(MemoryUserStore::new()), Arc::new(clock.clone()))
            .expect("engine");
        (engine, clock)
    }

    fn msg(clock: &ManualClock, content: &str, label: &str, intensity: f32) -> ClassifiedMessage {
        ClassifiedMessage::user(content, clock.now(), Classification::labeled(label, intensity))
    }

    #[tokio::test]
    async fn message_updates_every_component() {
        let (engine, clock) = engine_with(EngineConfig::default());
        let id = UserId::new("u1");
        let s = SessionId::new("s1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");

        let update = engine
            .process_message(&id, &s, &msg(&clock, "I love this", "joy", 0.9))
            .await
            .expect("process");
        assert_eq!(update.score_change, 9);
        assert_eq!(update.new_total_score, 9);
        assert!(update.new_ai_state.trust > 50.0);
        assert!(update.new_ai_state.boredom < 20.0);

        let user = engine.user(&id).expect("user");
        assert_eq!(user.current_score, 9);
        assert!(user.has_used_first_message);
        assert_eq!(user.global_stats.total_messages, 1);
        assert_eq!(user.global_stats.total_conversations, 1);
        assert_eq!(user.version, 2);
    }

    #[tokio::test]
    async fn rate_limited_message_is_not_recorded() {
        let (engine, clock) = engine_with(EngineConfig::default());
        let id = UserId::new("u1");
        let s = SessionId::new("s1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        engine
            .process_message(&id, &s, &msg(&clock, "one", "joy", 0.5))
            .await
            .expect("first");
        clock.advance(ChronoDuration::seconds(5));
        engine
            .process_message(&id, &s, &msg(&clock, "two", "joy", 0.5))
            .await
            .expect("second is the first metered one");

        let err = engine
            .process_message(&id, &s, &msg(&clock, "three", "joy", 0.5))
            .await
            .expect_err("cooldown");
        assert!(matches!(
            err,
            EngineError::RateLimited {
                reason: DenialReason::Cooldown,
                ..
            }
        ));
        let user = engine.user(&id).expect("user");
        assert_eq!(user.conversations[0].messages.len(), 2);
        assert_eq!(engine.counters().snapshot().rate_limited, 1);
    }

    #[tokio::test]
    async fn reply_does_not_touch_stats() {
        let (engine, clock) = engine_with(EngineConfig::default());
        let id = UserId::new("u1");
        let s = SessionId::new("s1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        engine
            .process_message(&id, &s, &msg(&clock, "hi", "joy", 0.5))
            .await
            .expect("process");
        engine.record_reply(&id, &s, "hello!", clock.now()).await.expect("reply");

        let user = engine.user(&id).expect("user");
        assert_eq!(user.global_stats.total_messages, 1);
        assert_eq!(user.conversations[0].messages.len(), 2);
        assert_eq!(user.conversations[0].messages[1].role, Role::Assistant);
        assert_eq!(user.conversations[0].total_score, 5);
    }

    #[tokio::test]
    async fn repeated_content_raises_boredom() {
        let (engine, clock) = engine_with(EngineConfig::default());
        let id = UserId::new("u1");
        let s = SessionId::new("s1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        let first = engine
            .process_message(&id, &s, &msg(&clock, "Tell me more", "curiosity", 0.5))
            .await
            .expect("first");
        clock.advance(ChronoDuration::seconds(5));
        let second = engine
            .process_message(&id, &s, &msg(&clock, "  tell me   MORE ", "curiosity", 0.5))
            .await
            .expect("second");
        assert!(second.new_ai_state.boredom > first.new_ai_state.boredom);
    }

    #[tokio::test]
    async fn closure_error_commits_nothing() {
        let (engine, _clock) = engine_with(EngineConfig::default());
        let id = UserId::new("u1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        let err = engine
            .mutate_user(&id, |user, _| {
                user.echo_balance = 100.0;
                Err::<(), _>(EngineError::InvalidState("nope".into()))
            })
            .await
            .expect_err("error propagates");
        assert!(matches!(err, EngineError::InvalidState(_)));
        let user = engine.user(&id).expect("user");
        assert_eq!(user.echo_balance, 0.0);
        assert_eq!(user.version, 1);
    }

    /// Store whose first N conditional writes lose.
    struct Contended {
        inner: MemoryUserStore,
        losses: AtomicU32,
    }

    impl UserStore for Contended {
        fn load(&self, id: &UserId) -> Result<Option<User>> {
            self.inner.load(id)
        }
        fn insert(&self, user: &mut User) -> Result<()> {
            self.inner.insert(user)
        }
        fn compare_and_swap(&self, user: &mut User, expected_version: u64) -> Result<bool> {
            let remaining = self.losses.load(Ordering::SeqCst);
            if remaining > 0 {
                self.losses.store(remaining - 1, Ordering::SeqCst);
                return Ok(false);
            }
            self.inner.compare_and_swap(user, expected_version)
        }
        fn list_ids(&self) -> Result<Vec<UserId>> {
            self.inner.list_ids()
        }
    }

    fn contended_engine(losses: u32) -> Engine {
        let store = Contended {
            inner: MemoryUserStore::new(),
            losses: AtomicU32::new(losses),
        };
        let mut config = EngineConfig::default();
        config.persistence.retry_backoff_ms = 1;
        Engine::new(config, Arc::new(store), Arc::new(ManualClock::new(start()))).expect("engine")
    }

    #[tokio::test]
    async fn lost_races_are_retried() {
        let engine = contended_engine(2);
        let id = UserId::new("u1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        engine.grant_connection_bonus(&id).await.expect("eventually commits");
        assert_eq!(engine.counters().snapshot().cas_retries, 2);
        assert!((engine.user(&id).expect("user").echo_balance - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn persistent_conflict_surfaces() {
        let engine = contended_engine(100);
        let id = UserId::new("u1");
        engine.register_user(&id, AuthMethod::Wallet).await.expect("register");
        let err = engine.claim(&id).await.expect_err("empty balance");
        assert!(matches!(err, EngineError::NothingToClaim));
        let err = engine.grant_connection_bonus(&id).await.expect_err("conflict");
        assert!(matches!(err, EngineError::ConcurrentUpdateConflict { attempts: 5, .. }));
    }

    #[tokio::test]
    async fn unknown_user_is_not_fabricated() {
        let (engine, clock) = engine_with(EngineConfig::default());
        let err = engine
            .process_message(&UserId::new("ghost"), &SessionId::new("s"), &msg(&clock, "hi", "joy", 0.5))
            .await
            .expect_err("unknown");
        assert!(matches!(err, EngineError::UserNotFound(_)));
        assert!(engine.user_ids().expect("ids").is_empty());
    }

    #[tokio::test]
    async fn ensure_user_is_idempotent() {
        let mut config = EngineConfig::default();
        config.activity.starting_cru_balance = 25.0;
        let (engine, _clock) = engine_with(config);
        let id = UserId::new("u1");
        let a = engine.ensure_user(&id, AuthMethod::WorldId).await.expect("create");
        let b = engine.ensure_user(&id, AuthMethod::WorldId).await.expect("load");
        assert_eq!(a, b);
        assert!((b.cru_balance - 25.0).abs() < f64::EPSILON);
        assert!(matches!(
            engine.register_user(&id, AuthMethod::Wallet).await,
            Err(EngineError::UserExists(_))
        ));
    }
}
