//! Emotional profile aggregation.
//!
//! One [`EmotionalProfile`] lives on every conversation (reset when a new
//! conversation starts) and one on the user's lifetime stats (never reset).
//! Both are fed by the same [`ProfileAggregator::absorb`], so the two scopes can
//! never disagree about how a message is counted.
//!
//! Recency is tracked with the profile's own `absorbed` sequence number rather
//! than wall-clock time, which keeps ordering deterministic when two messages
//! share a timestamp.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ProfileConfig;

/// How often a label was seen and when (in absorb order) it was seen last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EmotionTally {
    /// Number of messages carrying the label.
    pub count: u32,
    /// `absorbed` sequence of the most recent one.
    pub last_seq: u64,
}

/// A fact the classifier extracted about the user ("name" -> "Ada").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFact {
    /// Latest value; later writes replace earlier ones.
    pub value: String,
    /// How many times the fact has been stated.
    pub mentions: u32,
    /// `absorbed` sequence of the latest write.
    pub updated_seq: u64,
    /// Wall-clock time of the latest write.
    pub updated_at: DateTime<Utc>,
}

/// Rolling aggregate of emotions, themes and key facts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionalProfile {
    /// Top-K labels by frequency, ties broken most-recent-first.
    #[serde(default)]
    pub dominant_emotions: Vec<String>,
    /// Per-label frequency.
    #[serde(default)]
    pub emotion_tally: BTreeMap<String, EmotionTally>,
    /// Topic token -> mention count.
    #[serde(default)]
    pub theme_tracker: BTreeMap<String, u32>,
    /// Key fact identifier -> latest value.
    #[serde(default)]
    pub key_user_info: BTreeMap<String, KeyFact>,
    /// Number of samples absorbed so far.
    #[serde(default)]
    pub absorbed: u64,
}

impl EmotionalProfile {
    /// Themes ordered by count (highest first), ties alphabetical.
    #[must_use]
    pub fn ranked_themes(&self) -> Vec<(&str, u32)> {
        let mut themes: Vec<(&str, u32)> = self
            .theme_tracker
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        themes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        themes
    }

    /// Latest value of a key fact.
    #[must_use]
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.key_user_info.get(key).map(|f| f.value.as_str())
    }
}

/// One message's contribution to a profile.
#[derive(Debug, Clone, Copy)]
pub struct ProfileSample<'a> {
    /// Normalised emotion label.
    pub label: &'a str,
    /// Raw topic tokens.
    pub topics: &'a [String],
    /// Raw extracted facts.
    pub key_facts: &'a BTreeMap<String, String>,
    /// When the message was sent.
    pub at: DateTime<Utc>,
}

/// Applies [`ProfileSample`]s to [`EmotionalProfile`]s.
#[derive(Debug, Clone)]
pub struct ProfileAggregator {
    dominant_k: usize,
}

impl ProfileAggregator {
    /// Create an aggregator from config.
    #[must_use]
    pub fn new(config: &ProfileConfig) -> Self {
        Self {
            dominant_k: config.dominant_emotions_k.max(1),
        }
    }

    /// Fold one message into a profile.
    pub fn absorb(&self, profile: &mut EmotionalProfile, sample: &ProfileSample<'_>) {
        profile.absorbed += 1;
        let seq = profile.absorbed;

        let tally = profile
            .emotion_tally
            .entry(sample.label.to_string())
            .or_default();
        tally.count += 1;
        tally.last_seq = seq;

        // A topic repeated within one message counts once.
        let topics: BTreeSet<String> = sample.topics.iter().filter_map(|t| normalize_token(t)).collect();
        for topic in topics {
            *profile.theme_tracker.entry(topic).or_insert(0) += 1;
        }

        for (raw_key, raw_value) in sample.key_facts {
            let Some(key) = normalize_token(raw_key) else {
                continue;
            };
            let value = raw_value.trim();
            if value.is_empty() {
                continue;
            }
            profile
                .key_user_info
                .entry(key)
                .and_modify(|fact| {
                    fact.value = value.to_string();
                    fact.mentions += 1;
                    fact.updated_seq = seq;
                    fact.updated_at = sample.at;
                })
                .or_insert_with(|| KeyFact {
                    value: value.to_string(),
                    mentions: 1,
                    updated_seq: seq,
                    updated_at: sample.at,
                });
        }

        profile.dominant_emotions = dominant(&profile.emotion_tally, self.dominant_k);
    }
}

/// Top-`k` labels by count, ties most-recent-first.
#[must_use]
pub fn dominant(tally: &BTreeMap<String, EmotionTally>, k: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, &EmotionTally)> = tally.iter().collect();
    ranked.sort_by(|a, b| {
        b.1.count
            .cmp(&a.1.count)
            .then_with(|| b.1.last_seq.cmp(&a.1.last_seq))
    });
    ranked.into_iter().take(k).map(|(label, _)| label.clone()).collect()
}

/// Trim, lowercase and collapse inner whitespace. Empty tokens yield `None`.
#[must_use]
pub fn normalize_token(raw: &str) -> Option<String> {
    let token = raw
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(k: usize) -> ProfileAggregator {
        ProfileAggregator::new(&ProfileConfig {
            dominant_emotions_k: k,
            ..ProfileConfig::default()
        })
    }

    fn absorb(
        agg: &ProfileAggregator,
        profile: &mut EmotionalProfile,
        label: &str,
        topics: &[&str],
        facts: &[(&str, &str)],
    ) {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let facts: BTreeMap<String, String> = facts
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        agg.absorb(
            profile,
            &ProfileSample {
                label,
                topics: &topics,
                key_facts: &facts,
                at: Utc::now(),
            },
        );
    }

    #[test]
    fn theme_counts_accumulate_once_per_message() {
        let agg = aggregator(3);
        let mut p = EmotionalProfile::default();
        absorb(&agg, &mut p, "joy", &["Music", "music ", "travel"], &[]);
        absorb(&agg, &mut p, "joy", &["music"], &[]);
        assert_eq!(p.theme_tracker.get("music"), Some(&2));
        assert_eq!(p.theme_tracker.get("travel"), Some(&1));
        assert_eq!(p.ranked_themes()[0], ("music", 2));
    }

    #[test]
    fn key_facts_are_last_write_wins() {
        let agg = aggregator(3);
        let mut p = EmotionalProfile::default();
        absorb(&agg, &mut p, "neutral", &[], &[("City", "Lisbon")]);
        absorb(&agg, &mut p, "neutral", &[], &[("city", "Porto")]);
        let fact = p.key_user_info.get("city").expect("fact");
        assert_eq!(fact.value, "Porto");
        assert_eq!(fact.mentions, 2);
        assert_eq!(fact.updated_seq, 2);
    }

    #[test]
    fn blank_facts_are_ignored() {
        let agg = aggregator(3);
        let mut p = EmotionalProfile::default();
        absorb(&agg, &mut p, "neutral", &[], &[("name", "Ada")]);
        absorb(&agg, &mut p, "neutral", &[], &[("name", "  "), ("  ", "x")]);
        assert_eq!(p.fact("name"), Some("Ada"));
        assert_eq!(p.key_user_info.len(), 1);
    }

    #[test]
    fn dominant_emotions_break_ties_most_recent_first() {
        let agg = aggregator(2);
        let mut p = EmotionalProfile::default();
        absorb(&agg, &mut p, "joy", &[], &[]);
        absorb(&agg, &mut p, "sadness", &[], &[]);
        absorb(&agg, &mut p, "anger", &[], &[]);
        // All tied at 1: most recent first.
        assert_eq!(p.dominant_emotions, vec!["anger", "sadness"]);

        absorb(&agg, &mut p, "joy", &[], &[]);
        assert_eq!(p.dominant_emotions, vec!["joy", "anger"]);
    }

    #[test]
    fn normalize_token_collapses_whitespace() {
        assert_eq!(normalize_token("  Video   Games "), Some("video games".to_string()));
        assert_eq!(normalize_token(" \t "), None);
    }
}
