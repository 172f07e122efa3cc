//! Memory digest synthesis.
//!
//! A digest is a short, prompt-ready text assembled from the user's lifetime
//! profile and the current conversation. It is fully deterministic: the same
//! conversation and stats always render the same text.
//!
//! The text is capped at `max_digest_chars`. When it is too long, key facts
//! are evicted least-mentioned first (ties: least recently updated first),
//! then themes are dropped lowest-count first, and only then is the text cut.

use chrono::{DateTime, Utc};

use crate::config::SynthesisConfig;
use crate::emotion::NEUTRAL;
use crate::profile::KeyFact;
use crate::record::{Conversation, ConversationSummary, GlobalStats, MemoryDigest};

/// Number of topics kept on a [`ConversationSummary`].
const SUMMARY_TOPICS: usize = 3;
/// Mood changes kept in the journey narrative.
const JOURNEY_STEPS: usize = 6;

/// Output of one synthesis pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    /// New digest for the user.
    pub digest: MemoryDigest,
    /// New summary for the conversation.
    pub summary: ConversationSummary,
}

/// When to re-synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisPolicy {
    /// Periodic trigger; `None` disables it.
    pub every_n_messages: Option<u32>,
    /// Event trigger on conversation close.
    pub on_close: bool,
}

impl SynthesisPolicy {
    /// Build from config.
    #[must_use]
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            every_n_messages: config.every_n_messages,
            on_close: config.on_close,
        }
    }

    /// Whether `since_last` user messages warrant a new digest.
    #[must_use]
    pub fn due_after_message(&self, since_last: u32) -> bool {
        self.every_n_messages.is_some_and(|n| n > 0 && since_last >= n)
    }

    /// Whether closing a conversation warrants a new digest.
    #[must_use]
    pub fn due_on_close(&self) -> bool {
        self.on_close
    }
}

/// Renders digests and summaries.
#[derive(Debug, Clone)]
pub struct MemorySynthesizer {
    max_chars: usize,
    max_facts: usize,
    max_themes: usize,
}

impl MemorySynthesizer {
    /// Create a synthesizer from config.
    #[must_use]
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            max_chars: config.max_digest_chars,
            max_facts: config.max_facts,
            max_themes: config.max_themes,
        }
    }

    /// Synthesize a digest and summary.
    #[must_use]
    pub fn synthesize(&self, conversation: &Conversation, stats: &GlobalStats, now: DateTime<Utc>) -> Synthesis {
        let summary = summarize(conversation);

        let mut facts = ranked_facts(stats);
        facts.truncate(self.max_facts);

        let mut themes: Vec<(&str, u32)> = stats.lifetime.ranked_themes();
        themes.truncate(self.max_themes);

        let emotions = if conversation.emotional_profile.dominant_emotions.is_empty() {
            stats.favorite_emotions()
        } else {
            &conversation.emotional_profile.dominant_emotions
        };
        let mood = mood_line(conversation, &summary);

        let mut text = render(&facts, emotions, &themes, &mood);
        while text.chars().count() > self.max_chars && !facts.is_empty() {
            facts.pop();
            text = render(&facts, emotions, &themes, &mood);
        }
        while text.chars().count() > self.max_chars && !themes.is_empty() {
            themes.pop();
            text = render(&facts, emotions, &themes, &mood);
        }
        if text.chars().count() > self.max_chars {
            text = text.chars().take(self.max_chars).collect();
        }

        Synthesis {
            digest: MemoryDigest {
                text,
                last_synthesized_at: Some(now),
            },
            summary,
        }
    }
}

/// Lifetime facts, most mentioned first, ties most recently updated first.
fn ranked_facts(stats: &GlobalStats) -> Vec<(&str, &KeyFact)> {
    let mut facts: Vec<(&str, &KeyFact)> = stats
        .lifetime
        .key_user_info
        .iter()
        .map(|(k, v)| (k.as_str(), v))
        .collect();
    facts.sort_by(|a, b| {
        b.1.mentions
            .cmp(&a.1.mentions)
            .then_with(|| b.1.updated_seq.cmp(&a.1.updated_seq))
            .then_with(|| a.0.cmp(b.0))
    });
    facts
}

fn render(facts: &[(&str, &KeyFact)], emotions: &[String], themes: &[(&str, u32)], mood: &str) -> String {
    let mut lines = Vec::with_capacity(4);
    if !facts.is_empty() {
        let body = facts
            .iter()
            .map(|(k, f)| format!("{k}: {}", f.value))
            .collect::<Vec<_>>()
            .join("; ");
        lines.push(format!("Known about the user: {body}."));
    }
    if !emotions.is_empty() {
        lines.push(format!("Dominant feelings: {}.", emotions.join(", ")));
    }
    if !themes.is_empty() {
        let body = themes
            .iter()
            .map(|(t, n)| format!("{t} ({n})"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("Recurring themes: {body}."));
    }
    lines.push(mood.to_string());
    lines.join("\n")
}

fn mood_line(conversation: &Conversation, summary: &ConversationSummary) -> String {
    let s = conversation.ai_state;
    let journey = if summary.emotional_journey.is_empty() {
        String::new()
    } else {
        format!(" Journey: {}.", summary.emotional_journey)
    };
    format!(
        "Mood: {} (score {}; trust {:.0}, curiosity {:.0}, boredom {:.0}).{journey}",
        summary.mood, conversation.total_score, s.trust, s.curiosity, s.boredom
    )
}

/// Summary of one conversation.
#[must_use]
pub fn summarize(conversation: &Conversation) -> ConversationSummary {
    let main_topics = conversation
        .emotional_profile
        .ranked_themes()
        .into_iter()
        .take(SUMMARY_TOPICS)
        .map(|(t, _)| t.to_string())
        .collect();

    let mut steps: Vec<&str> = Vec::new();
    for message in conversation.user_messages() {
        let label = message.emotion_analysis.label.as_str();
        if steps.last() != Some(&label) {
            steps.push(label);
        }
    }
    let mood = steps.last().map_or_else(|| NEUTRAL.to_string(), |l| (*l).to_string());
    let skip = steps.len().saturating_sub(JOURNEY_STEPS);
    let emotional_journey = steps[skip..].join(" -> ");

    ConversationSummary {
        main_topics,
        emotional_journey,
        mood,
    }
}
