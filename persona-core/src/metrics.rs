//! Engine counters and Prometheus export.
//!
//! Counters are plain `AtomicU64`s bumped in the hot path with relaxed
//! ordering and read on export.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for engine events.
#[derive(Debug)]
pub struct EngineCounters {
    /// User messages scored and committed.
    pub messages_processed: AtomicU64,
    /// Messages refused by the activity ledger.
    pub rate_limited: AtomicU64,
    /// Classifications replaced by neutral after a failure or timeout.
    pub classifier_fallbacks: AtomicU64,
    /// Digests synthesized.
    pub digests_synthesized: AtomicU64,
    /// ECHO grants of any kind.
    pub rewards_granted: AtomicU64,
    /// Successful claims.
    pub claims: AtomicU64,
    /// Conditional writes that lost a race and were retried.
    pub cas_retries: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_processed: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
            classifier_fallbacks: AtomicU64::new(0),
            digests_synthesized: AtomicU64::new(0),
            rewards_granted: AtomicU64::new(0),
            claims: AtomicU64::new(0),
            cas_retries: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            classifier_fallbacks: self.classifier_fallbacks.load(Ordering::Relaxed),
            digests_synthesized: self.digests_synthesized.load(Ordering::Relaxed),
            rewards_granted: self.rewards_granted.load(Ordering::Relaxed),
            claims: self.claims.load(Ordering::Relaxed),
            cas_retries: self.cas_retries.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// User messages scored.
    pub messages_processed: u64,
    /// Messages refused.
    pub rate_limited: u64,
    /// Neutral fallbacks.
    pub classifier_fallbacks: u64,
    /// Digests synthesized.
    pub digests_synthesized: u64,
    /// ECHO grants.
    pub rewards_granted: u64,
    /// Claims.
    pub claims: u64,
    /// Conditional-write retries.
    pub cas_retries: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows = [
            ("messages_processed", "User messages scored", self.messages_processed),
            ("rate_limited", "Messages refused by admission control", self.rate_limited),
            ("classifier_fallbacks", "Neutral classifications substituted", self.classifier_fallbacks),
            ("digests_synthesized", "Memory digests synthesized", self.digests_synthesized),
            ("rewards_granted", "ECHO grants", self.rewards_granted),
            ("claims", "Successful ECHO claims", self.claims),
            ("cas_retries", "Conditional write retries", self.cas_retries),
        ];
        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP persona_{name}_total {help}\n\
                 # TYPE persona_{name}_total counter\n\
                 persona_{name}_total {value}\n"
            ));
        }
        out
    }
}

/// Span names used with `tracing` spans.
pub mod spans {
    /// Processing one user message.
    pub const PROCESS_MESSAGE: &str = "persona::message";
    /// Classifier call.
    pub const CLASSIFY: &str = "persona::classify";
    /// Digest synthesis.
    pub const SYNTHESIS: &str = "persona::synthesis";
    /// Hourly tick over all users.
    pub const HOURLY_TICK: &str = "persona::tick";
    /// Store commit.
    pub const COMMIT: &str = "persona::commit";
}
