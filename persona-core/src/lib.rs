//! # Persona Core Library
//!
//! Long-lived, per-user state for a chat persona, derived from a stream of
//! classified messages:
//!
//! - **Activity**: message admission: daily cap, cooldown, free first message, credit
//! - **Scoring**: signed per-message deltas and running totals
//! - **Disposition**: the persona's bounded trust / curiosity / boredom vector
//! - **Profile**: rolling emotions, themes and key facts per conversation and lifetime
//! - **Synthesis**: a bounded memory digest re-injected into future prompts
//! - **Rewards**: connection, verification and hourly ECHO grants, and claims
//!
//! All of it hangs off one [`User`] record, mutated only through
//! [`Engine`] under a per-user lock with versioned, conditional commits.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod activity;
pub mod classification;
pub mod clock;
pub mod config;
pub mod disposition;
pub mod emotion;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod profile;
pub mod record;
pub mod rewards;
pub mod scoring;
pub mod store;
pub mod synthesis;
pub mod types;

pub use activity::{AdmissionResult, DenialReason};
pub use classification::{Classification, ClassifiedMessage, Classifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use engine::{Engine, ScoreUpdate, TickReport};
pub use error::{EngineError, Result};
pub use record::{Conversation, MemoryDigest, Message, User};
pub use rewards::{ClaimResult, RewardGrant, RewardKind, VerificationEvent};
pub use store::{MemoryUserStore, SqliteUserStore, UserStore};
pub use types::*;
