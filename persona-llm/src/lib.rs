//! # persona-llm: LLM Adapter for Persona
//!
//! Turns a raw chat message into the structured outcome the engine consumes:
//! an emotion label with intensity, plus optional topics, key facts,
//! personality signals and an inconsistency flag.
//!
//! Backends:
//!   - **Ollama** (local, recommended default)
//!   - **OpenAI-compatible API**
//!
//! Every call goes through [`LlmClient`], which enforces JSON output,
//! per-request timeouts and bounded retries. Parsing is lenient: prose
//! around the JSON object is ignored and missing fields take defaults.

pub mod client;
pub mod error;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use types::{ClassificationResponse, LlmRequest, LlmResponse};
