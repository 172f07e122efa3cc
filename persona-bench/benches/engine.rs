//! Persona Benchmark Suite
//!
//! Hot paths on every inbound message:
//!   score_single_message .............. pure mapping
//!   disposition_update ................ pure clamp arithmetic
//!   profile_absorb_with_facts ......... map upserts
//!   synthesize_digest_200_messages .... ranking + rendering
//!   process_message_memory_store ...... full commit through the engine

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use persona_core::classification::{Classification, ClassifiedMessage};
use persona_core::config::{ActivityConfig, DispositionConfig, EngineConfig, ProfileConfig, ScoringConfig, SynthesisConfig};
use persona_core::disposition::DispositionTracker;
use persona_core::profile::{ProfileAggregator, ProfileSample};
use persona_core::record::{Conversation, GlobalStats, Message};
use persona_core::scoring::ScoringEngine;
use persona_core::synthesis::MemorySynthesizer;
use persona_core::types::{AiState, AuthMethod, MessageId, Role, SessionId, UserId};
use persona_core::{Engine, ManualClock, MemoryUserStore};

const LABELS: &[&str] = &["joy", "sadness", "curiosity", "anger", "calm", "neutral"];
const TOPICS: &[&str] = &["work", "family", "music", "travel", "health", "games", "food", "books"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default()
}

fn classification(i: usize) -> Classification {
    let mut c = Classification::labeled(LABELS[i % LABELS.len()], (i % 10) as f32 / 10.0);
    c.topics = vec![TOPICS[i % TOPICS.len()].to_string(), TOPICS[(i * 3) % TOPICS.len()].to_string()];
    c.key_facts = [(format!("fact_{}", i % 30), format!("value {i}"))].into();
    c
}

/// 200 scored messages plus a lifetime profile built from them.
fn populated(n: usize) -> (Conversation, GlobalStats) {
    let scoring = ScoringEngine::new(&ScoringConfig::default());
    let profile = ProfileAggregator::new(&ProfileConfig::default());
    let mut conv = Conversation::new(SessionId::new("bench"), AiState::default(), t0());
    let mut stats = GlobalStats::default();
    for i in 0..n {
        let c = classification(i);
        let scored = scoring.score(&c);
        let sample = ProfileSample {
            label: &scored.analysis.label,
            topics: &c.topics,
            key_facts: &c.key_facts,
            at: t0(),
        };
        profile.absorb(&mut stats.lifetime, &sample);
        profile.absorb(&mut conv.emotional_profile, &sample);
        scoring.apply(&mut conv, &mut stats, Message {
            id: MessageId::new(),
            role: Role::User,
            content: format!("message {i}"),
            timestamp: t0(),
            emotion_analysis: scored.analysis,
            score_change: scored.delta,
        });
    }
    (conv, stats)
}

fn bench_scoring(c: &mut Criterion) {
    let scoring = ScoringEngine::new(&ScoringConfig::default());
    let input = classification(7);
    c.bench_function("score_single_message", |b| {
        b.iter(|| black_box(scoring.score(black_box(&input))));
    });
}

fn bench_disposition(c: &mut Criterion) {
    let tracker = DispositionTracker::new(&DispositionConfig::default());
    c.bench_function("disposition_update", |b| {
        b.iter(|| black_box(tracker.update(black_box(AiState::default()), black_box(6), black_box("joy"))));
    });
}

fn bench_profile(c: &mut Criterion) {
    let profile = ProfileAggregator::new(&ProfileConfig::default());
    let (_, stats) = populated(200);
    let topics = vec!["music".to_string(), "travel".to_string()];
    let facts: BTreeMap<String, String> = [("city".to_string(), "Lisbon".to_string())].into();
    c.bench_function("profile_absorb_with_facts", |b| {
        b.iter_batched(
            || stats.lifetime.clone(),
            |mut lifetime| {
                profile.absorb(&mut lifetime, &ProfileSample {
                    label: "joy",
                    topics: &topics,
                    key_facts: &facts,
                    at: t0(),
                });
                lifetime
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_synthesis(c: &mut Criterion) {
    let synth = MemorySynthesizer::new(&SynthesisConfig::default());
    let (conv, stats) = populated(200);
    c.bench_function("synthesize_digest_200_messages", |b| {
        b.iter(|| black_box(synth.synthesize(black_box(&conv), black_box(&stats), t0())));
    });
}

fn bench_process_message(c: &mut Criterion) {
    let Ok(rt) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
        return;
    };
    let config = EngineConfig {
        activity: ActivityConfig {
            daily_message_cap: u32::MAX,
            cooldown_secs: 0,
            ..ActivityConfig::default()
        },
        ..EngineConfig::default()
    };
    let id = UserId::new("bench");
    let session = SessionId::new("s");
    let message = ClassifiedMessage::user("I finally finished the marathon!", t0(), classification(3));

    c.bench_function("process_message_memory_store", |b| {
        b.iter_batched(
            || {
                let engine = Engine::new(
                    config.clone(),
                    Arc::new(MemoryUserStore::new()),
                    Arc::new(ManualClock::new(t0())),
                );
                let engine = engine.ok()?;
                rt.block_on(engine.register_user(&id, AuthMethod::Wallet)).ok()?;
                Some(engine)
            },
            |engine| {
                if let Some(engine) = engine {
                    black_box(rt.block_on(engine.process_message(&id, &session, &message)).ok());
                }
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_scoring,
    bench_disposition,
    bench_profile,
    bench_synthesis,
    bench_process_message,
);
criterion_main!(benches);
