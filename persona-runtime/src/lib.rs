//! # persona-runtime: Deployment Glue for Persona
//!
//! Wires the storage-agnostic `persona-core` engine to the outside world:
//!
//! - `events`: inbound chat-session events (login, message, reply, verification, claim, logout)
//! - `classifier`: `persona-llm` backed [`Classifier`](persona_core::Classifier)
//! - `service`: [`ChatService`]: one entry point per event, errors mapped for callers
//! - `ticker`: background hourly reward task with cooperative shutdown
//! - `config`: `persona.toml` plus environment overrides
//! - `telemetry`: `tracing-subscriber` setup for the daemon

#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classifier;
pub mod config;
pub mod events;
pub mod service;
pub mod telemetry;
pub mod ticker;

pub use classifier::LlmClassifier;
pub use config::RuntimeConfig;
pub use events::{ChatEvent, EventOutcome};
pub use service::ChatService;
pub use ticker::{HourlyTicker, TickerStats};
