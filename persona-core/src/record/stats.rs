//! Lifetime statistics rolled up across all of a user's conversations.

use serde::{Deserialize, Serialize};

use crate::profile::EmotionalProfile;

/// Lifetime rollup. Counts only grow, `highest_score` is a max and
/// `average_score` is a running mean over `total_messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Conversations ever started.
    #[serde(default)]
    pub total_conversations: u64,
    /// Scored user messages ever processed.
    #[serde(default)]
    pub total_messages: u64,
    /// Highest conversation total ever reached.
    #[serde(default)]
    pub highest_score: i64,
    /// Running mean of the conversation total observed after each message.
    #[serde(default)]
    pub average_score: f64,
    /// Lifetime aggregate: key facts, themes, emotion tallies. Never reset.
    #[serde(default)]
    pub lifetime: EmotionalProfile,
    /// Personality signals, oldest first, de-duplicated and bounded.
    #[serde(default)]
    pub personality_insights: Vec<String>,
}

impl GlobalStats {
    /// Record the conversation total after a scored message.
    pub fn record_score(&mut self, conversation_total: i64) {
        self.total_messages += 1;
        self.highest_score = self.highest_score.max(conversation_total);
        #[allow(clippy::cast_precision_loss)]
        let n = self.total_messages as f64;
        #[allow(clippy::cast_precision_loss)]
        let sample = conversation_total as f64;
        self.average_score += (sample - self.average_score) / n;
    }

    /// Favourite emotions over the user's lifetime.
    #[must_use]
    pub fn favorite_emotions(&self) -> &[String] {
        &self.lifetime.dominant_emotions
    }

    /// Add personality signals. A repeated signal moves to the most-recent end;
    /// the oldest ones fall off past `cap`.
    pub fn record_insights(&mut self, signals: &[String], cap: usize) {
        for raw in signals {
            let signal = raw.trim();
            if signal.is_empty() {
                continue;
            }
            self.personality_insights
                .retain(|existing| !existing.eq_ignore_ascii_case(signal));
            self.personality_insights.push(signal.to_string());
        }
        if self.personality_insights.len() > cap {
            let excess = self.personality_insights.len() - cap;
            self.personality_insights.drain(..excess);
        }
    }
}
