//! End-to-end tests for the chat service and the hourly ticker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use persona_core::config::EngineConfig;
use persona_core::{
    AuthMethod, Classification, Classifier, Clock, DenialReason, Engine, EngineError, ManualClock, MemoryUserStore,
    SessionId, UserId, VerificationEvent,
};
use persona_runtime::{ChatEvent, ChatService, EventOutcome, HourlyTicker};
use tokio_util::sync::CancellationToken;

/// Joyful when the message ends in '!', neutral otherwise.
struct Exclaim;

impl Classifier for Exclaim {
    async fn classify(&self, content: &str, _history: &[String]) -> persona_core::Result<Classification> {
        if content.trim_end().ends_with('!') {
            let mut c = Classification::labeled("joy", 0.9);
            c.topics = vec!["news".to_string()];
            Ok(c)
        } else {
            Ok(Classification::neutral())
        }
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).single().expect("valid")
}

fn setup() -> (Arc<Engine>, ManualClock, ChatService<Exclaim>) {
    let clock = ManualClock::new(t0());
    let engine = Arc::new(
        Engine::new(EngineConfig::default(), Arc::new(MemoryUserStore::new()), Arc::new(clock.clone()))
            .expect("engine"),
    );
    let service = ChatService::new(Arc::clone(&engine), Exclaim);
    (engine, clock, service)
}

#[tokio::test]
async fn login_grants_bonus_once_per_window() {
    let (_, clock, service) = setup();
    let id = UserId::new("0xfeed");

    let (user, bonus) = service.login(&id, AuthMethod::Wallet).await.expect("login");
    assert!(bonus.is_some());
    assert!((user.echo_balance - 1.0).abs() < f64::EPSILON);

    clock.advance(ChronoDuration::hours(2));
    let (_, again) = service.login(&id, AuthMethod::Wallet).await.expect("login");
    assert!(again.is_none());

    clock.advance(ChronoDuration::hours(23));
    let (user, later) = service.login(&id, AuthMethod::Wallet).await.expect("login");
    assert!(later.is_some());
    assert!((user.echo_balance - 2.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn session_flow_through_dispatch() {
    let (engine, clock, service) = setup();
    let id = UserId::new("0xbeef");
    let session = SessionId::new("tab-1");

    let outcome = service
        .dispatch(ChatEvent::Login { user_id: id.clone(), auth_method: AuthMethod::WorldId })
        .await
        .expect("login");
    assert!(matches!(outcome, EventOutcome::LoggedIn { bonus: Some(_) }));

    let outcome = service
        .dispatch(ChatEvent::Message {
            user_id: id.clone(),
            session_id: session.clone(),
            content: "I passed my exam!".into(),
        })
        .await
        .expect("message");
    let EventOutcome::Scored(update) = outcome else {
        panic!("expected a score update");
    };
    assert!(update.score_change > 0);
    assert_eq!(update.new_emotion_analysis.label, "joy");

    // Inside the cooldown.
    let err = service
        .dispatch(ChatEvent::Message {
            user_id: id.clone(),
            session_id: session.clone(),
            content: "and then".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RateLimited { reason: DenialReason::Cooldown, .. }));

    let outcome = service
        .dispatch(ChatEvent::Reply {
            user_id: id.clone(),
            session_id: session.clone(),
            content: "Congratulations!".into(),
            timestamp: clock.now(),
        })
        .await
        .expect("reply");
    assert!(matches!(outcome, EventOutcome::ReplyRecorded(_)));

    let outcome = service
        .dispatch(ChatEvent::Verified(VerificationEvent { user_id: id.clone(), verified_at: clock.now() }))
        .await
        .expect("verify");
    assert!(matches!(outcome, EventOutcome::Verified { bonus: Some(_) }));

    let outcome = service
        .dispatch(ChatEvent::Logout { user_id: id.clone(), session_id: session.clone() })
        .await
        .expect("logout");
    let EventOutcome::SessionClosed(Some(digest)) = outcome else {
        panic!("expected a digest on close");
    };
    assert!(digest.text.contains("joy"), "{}", digest.text);
    assert_eq!(service.memory(&id).expect("memory"), digest);

    let outcome = service.dispatch(ChatEvent::Claim { user_id: id.clone() }).await.expect("claim");
    let EventOutcome::Claimed(claim) = outcome else {
        panic!("expected a claim");
    };
    assert!((claim.amount_claimed - 6.0).abs() < f64::EPSILON);
    assert!(matches!(service.claim(&id).await, Err(EngineError::NothingToClaim)));

    let user = engine.user(&id).expect("user");
    assert_eq!(user.conversations.len(), 1);
    assert_eq!(user.conversations[0].messages.len(), 2);
}

#[tokio::test]
async fn unknown_users_are_not_created_by_messages() {
    let (_, _, service) = setup();
    let err = service
        .send_message(&UserId::new("ghost"), &SessionId::new("s"), "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UserNotFound(_)));
}

#[tokio::test(start_paused = true)]
async fn ticker_credits_once_per_aligned_window() {
    let (engine, _, service) = setup();
    let id = UserId::new("0xcafe");
    service.login(&id, AuthMethod::Wallet).await.expect("login");
    service
        .send_message(&id, &SessionId::new("s"), "hello")
        .await
        .expect("message");

    let token = CancellationToken::new();
    let handle = HourlyTicker::new(Arc::clone(&engine))
        .with_period(Duration::from_secs(3_600))
        .spawn(token.clone());

    // Two ticks fire; the engine clock has not moved, so both land in one window.
    tokio::time::sleep(Duration::from_secs(7_201)).await;
    token.cancel();
    let stats = handle.await.expect("join");

    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.credited, 1);
    let user = engine.user(&id).expect("user");
    assert!((user.echo_balance - 1.5).abs() < f64::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn cancelled_ticker_stops_before_first_pass() {
    let (engine, _, _) = setup();
    engine.register_user(&UserId::new("a"), AuthMethod::Guest).await.expect("register");

    let token = CancellationToken::new();
    token.cancel();
    let stats = HourlyTicker::new(Arc::clone(&engine)).spawn(token.clone()).await.expect("join");
    assert_eq!(stats.ticks, 0);

    let report = HourlyTicker::new(engine).tick_once(&token).await;
    assert_eq!(report.users_seen, 0);
}
