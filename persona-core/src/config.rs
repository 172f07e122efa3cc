//! Configuration for the persona engine.
//!
//! Maps directly to `persona.toml`. Every field has a serde default so a
//! partial file (or an empty one) is always valid.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level engine configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Rate limiting and credit metering.
    #[serde(default)]
    pub activity: ActivityConfig,
    /// Score delta mapping.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Disposition vector tuning.
    #[serde(default)]
    pub disposition: DispositionConfig,
    /// Emotional profile aggregation.
    #[serde(default)]
    pub profile: ProfileConfig,
    /// Memory digest synthesis.
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Time-gated ECHO rewards.
    #[serde(default)]
    pub rewards: RewardsConfig,
    /// External classifier call bounds.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Persistence / commit settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `EngineError::Config` if the TOML is invalid or fails validation.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Reject values that would break engine invariants.
    ///
    /// # Errors
    /// Returns `EngineError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let bad = |field: &str, why: &str| Err(EngineError::Config(format!("{field}: {why}")));

        if self.activity.daily_message_cap == 0 {
            return bad("activity.daily_message_cap", "must be at least 1");
        }
        if !non_negative(self.activity.message_cost_cru) {
            return bad("activity.message_cost_cru", "must be a non-negative number");
        }
        if !non_negative(self.activity.starting_cru_balance) {
            return bad("activity.starting_cru_balance", "must be a non-negative number");
        }
        if self.scoring.max_delta <= 0 {
            return bad("scoring.max_delta", "must be positive");
        }
        if self.profile.dominant_emotions_k == 0 {
            return bad("profile.dominant_emotions_k", "must be at least 1");
        }
        if self.synthesis.every_n_messages == Some(0) {
            return bad("synthesis.every_n_messages", "use no value to disable, not 0");
        }
        if self.synthesis.max_digest_chars < 64 {
            return bad("synthesis.max_digest_chars", "must be at least 64");
        }
        for (field, amount) in [
            ("rewards.connection_bonus", self.rewards.connection_bonus),
            ("rewards.verification_bonus", self.rewards.verification_bonus),
            ("rewards.hourly_amount", self.rewards.hourly_amount),
        ] {
            if !non_negative(amount) {
                return bad(field, "must be a non-negative number");
            }
        }
        if self.rewards.tick_period_secs == 0 {
            return bad("rewards.tick_period_secs", "must be positive");
        }
        if self.rewards.bonus_window_hours == 0 {
            return bad("rewards.bonus_window_hours", "must be positive");
        }
        if self.classifier.timeout_ms == 0 {
            return bad("classifier.timeout_ms", "must be positive");
        }
        if self.persistence.max_update_retries == 0 {
            return bad("persistence.max_update_retries", "must be at least 1");
        }
        Ok(())
    }
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Admission rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Messages allowed per UTC calendar day.
    #[serde(default = "default_50")]
    pub daily_message_cap: u32,
    /// Minimum seconds between two admitted messages.
    #[serde(default = "default_3_u64")]
    pub cooldown_secs: u64,
    /// CRU charged per admitted message (the first message is free). 0 disables metering.
    #[serde(default)]
    pub message_cost_cru: f64,
    /// CRU granted to newly registered users.
    #[serde(default)]
    pub starting_cru_balance: f64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            daily_message_cap: 50,
            cooldown_secs: 3,
            message_cost_cru: 0.0,
            starting_cru_balance: 0.0,
        }
    }
}

/// Score delta mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Largest absolute delta a single message can produce.
    #[serde(default = "default_10_i32")]
    pub max_delta: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self { max_delta: 10 }
    }
}

/// Disposition vector tuning. Step sizes are in axis points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispositionConfig {
    /// Starting trust of a new conversation.
    #[serde(default = "default_50_f32")]
    pub initial_trust: f32,
    /// Starting curiosity of a new conversation.
    #[serde(default = "default_50_f32")]
    pub initial_curiosity: f32,
    /// Starting boredom of a new conversation.
    #[serde(default = "default_20_f32")]
    pub initial_boredom: f32,
    /// Trust points per point of signed score delta.
    #[serde(default = "default_0_5")]
    pub trust_per_delta: f32,
    /// Trust bonus for a consistent, non-neutral disclosure.
    #[serde(default = "default_1_0")]
    pub disclosure_bonus: f32,
    /// Trust penalty when the classifier flags an inconsistency.
    #[serde(default = "default_10_f32")]
    pub inconsistency_penalty: f32,
    /// Curiosity gained on an engaging label, scaled by intensity.
    #[serde(default = "default_6_f32")]
    pub curiosity_step: f32,
    /// Boredom shed on an engaging label, scaled by intensity.
    #[serde(default = "default_8_f32")]
    pub boredom_decay: f32,
    /// Boredom gained on neutral or repetitive input.
    #[serde(default = "default_5_f32")]
    pub boredom_step: f32,
}

impl Default for DispositionConfig {
    fn default() -> Self {
        Self {
            initial_trust: 50.0,
            initial_curiosity: 50.0,
            initial_boredom: 20.0,
            trust_per_delta: 0.5,
            disclosure_bonus: 1.0,
            inconsistency_penalty: 10.0,
            curiosity_step: 6.0,
            boredom_decay: 8.0,
            boredom_step: 5.0,
        }
    }
}

/// Emotional profile aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Size of the dominant-emotion list.
    #[serde(default = "default_3_usize")]
    pub dominant_emotions_k: usize,
    /// Maximum personality insights kept on the lifetime stats.
    #[serde(default = "default_12_usize")]
    pub personality_insight_cap: usize,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            dominant_emotions_k: 3,
            personality_insight_cap: 12,
        }
    }
}

/// When and how the memory digest is synthesized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Re-synthesize after this many user messages. `None` disables the periodic trigger.
    #[serde(default = "default_every_n")]
    pub every_n_messages: Option<u32>,
    /// Re-synthesize when a conversation is closed.
    #[serde(default = "default_true")]
    pub on_close: bool,
    /// Hard cap on digest length in characters.
    #[serde(default = "default_1200")]
    pub max_digest_chars: usize,
    /// Most key facts considered before the length cap applies.
    #[serde(default = "default_24_usize")]
    pub max_facts: usize,
    /// Most themes listed.
    #[serde(default = "default_8_usize")]
    pub max_themes: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            every_n_messages: Some(10),
            on_close: true,
            max_digest_chars: 1200,
            max_facts: 24,
            max_themes: 8,
        }
    }
}

/// Time-gated ECHO rewards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// ECHO granted on login, once per rolling window.
    #[serde(default = "default_1_0_f64")]
    pub connection_bonus: f64,
    /// ECHO granted on identity re-verification, once per rolling window.
    #[serde(default = "default_5_0_f64")]
    pub verification_bonus: f64,
    /// ECHO granted to every active user per tick window.
    #[serde(default = "default_0_5_f64")]
    pub hourly_amount: f64,
    /// Rolling window for connection / verification bonuses, in hours.
    #[serde(default = "default_24")]
    pub bonus_window_hours: u32,
    /// Tick period in seconds; also the width of the aligned credit window.
    #[serde(default = "default_3600")]
    pub tick_period_secs: u64,
    /// A user counts as active if they chatted or connected within this many hours.
    #[serde(default = "default_24")]
    pub active_window_hours: u32,
}

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            connection_bonus: 1.0,
            verification_bonus: 5.0,
            hourly_amount: 0.5,
            bonus_window_hours: 24,
            tick_period_secs: 3600,
            active_window_hours: 24,
        }
    }
}

/// External classifier call bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Hard timeout for a classification in milliseconds.
    #[serde(default = "default_5000")]
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { timeout_ms: 5000 }
    }
}

/// Persistence / commit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Use WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// Detect record corruption via checksums.
    #[serde(default = "default_true")]
    pub checksum_enabled: bool,
    /// Conditional-write attempts before giving up with a conflict.
    #[serde(default = "default_5_u32")]
    pub max_update_retries: u32,
    /// Base backoff between conflicting attempts; doubles each retry.
    #[serde(default = "default_10_u64")]
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            wal_mode: true,
            checksum_enabled: true,
            max_update_retries: 5,
            retry_backoff_ms: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_every_n() -> Option<u32> { Some(10) }
fn default_0_5() -> f32 { 0.5 }
fn default_1_0() -> f32 { 1.0 }
fn default_5_f32() -> f32 { 5.0 }
fn default_6_f32() -> f32 { 6.0 }
fn default_8_f32() -> f32 { 8.0 }
fn default_10_f32() -> f32 { 10.0 }
fn default_20_f32() -> f32 { 20.0 }
fn default_50_f32() -> f32 { 50.0 }
fn default_0_5_f64() -> f64 { 0.5 }
fn default_1_0_f64() -> f64 { 1.0 }
fn default_5_0_f64() -> f64 { 5.0 }
fn default_10_i32() -> i32 { 10 }
fn default_3_usize() -> usize { 3 }
fn default_8_usize() -> usize { 8 }
fn default_12_usize() -> usize { 12 }
fn default_24_usize() -> usize { 24 }
fn default_1200() -> usize { 1200 }
fn default_5_u32() -> u32 { 5 }
fn default_24() -> u32 { 24 }
fn default_50() -> u32 { 50 }
fn default_3_u64() -> u64 { 3 }
fn default_10_u64() -> u64 { 10 }
fn default_3600() -> u64 { 3600 }
fn default_5000() -> u64 { 5000 }
