//! Runtime configuration: the engine config plus deployment settings.
//!
//! ```toml
//! [database]
//! path = "persona.db"
//!
//! [llm]
//! provider = "ollama"
//! model = "qwen2.5:1.5b"
//!
//! [engine.activity]
//! daily_message_cap = 50
//! ```
//!
//! `PERSONA_DB_PATH`, `PERSONA_LLM_URL`, `PERSONA_LLM_PROVIDER` and
//! `PERSONA_LLM_API_KEY` override the file.

use std::path::{Path, PathBuf};

use persona_core::config::EngineConfig;
use persona_core::{EngineError, Result};
use persona_llm::{LlmClient, LlmProvider};
use serde::{Deserialize, Serialize};

/// Environment variable overriding [`DatabaseConfig::path`].
pub const ENV_DB_PATH: &str = "PERSONA_DB_PATH";
/// Environment variable overriding [`LlmConfig::base_url`].
pub const ENV_LLM_URL: &str = "PERSONA_LLM_URL";
/// Environment variable overriding [`LlmConfig::provider`].
pub const ENV_LLM_PROVIDER: &str = "PERSONA_LLM_PROVIDER";
/// Environment variable overriding [`LlmConfig::api_key`].
pub const ENV_LLM_API_KEY: &str = "PERSONA_LLM_API_KEY";

/// Everything the daemon needs to start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Where user records live.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Classifier backend.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Engine tuning.
    #[serde(default)]
    pub engine: EngineConfig,
}

impl RuntimeConfig {
    /// Parse from TOML and validate.
    ///
    /// # Errors
    /// `EngineError::Config` on bad TOML or invalid values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path` (defaults when `None`), apply process environment
    /// overrides, then validate.
    ///
    /// # Errors
    /// I/O, parse or validation failures.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                toml::from_str(&content).map_err(|e| EngineError::Config(format!("{}: {e}", p.display())))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides looked up through `var`. Empty values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());
        if let Some(path) = var(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(url) = var(ENV_LLM_URL) {
            self.llm.base_url = url;
        }
        if let Some(provider) = var(ENV_LLM_PROVIDER) {
            self.llm.provider = provider;
        }
        if let Some(key) = var(ENV_LLM_API_KEY) {
            self.llm.api_key = Some(key);
        }
    }

    /// Validate engine values and the LLM provider settings.
    ///
    /// # Errors
    /// `EngineError::Config` naming the problem.
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.llm.provider()?;
        if self.llm.persona_name.trim().is_empty() {
            return Err(EngineError::Config("llm.persona_name: must not be empty".into()));
        }
        Ok(())
    }
}

/// SQLite location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Keep everything in memory and lose it on exit.
    #[serde(default)]
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            in_memory: false,
        }
    }
}

/// LLM classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "ollama", "openai", "none".
    #[serde(default = "default_ollama")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Bearer token for OpenAI-compatible APIs.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Max retries per classification before giving up.
    #[serde(default = "default_2")]
    pub max_retries: u32,
    /// Name the persona is addressed by in the prompt.
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
}

impl LlmConfig {
    /// Resolve the provider.
    ///
    /// # Errors
    /// `EngineError::Config` for an unknown provider or missing key.
    pub fn provider(&self) -> Result<LlmProvider> {
        LlmProvider::from_name(&self.provider, &self.base_url, self.api_key.as_deref())
            .map_err(|e| EngineError::Config(format!("llm.provider: {e}")))
    }

    /// Build a client for this configuration.
    ///
    /// # Errors
    /// As [`LlmConfig::provider`].
    pub fn build_client(&self) -> Result<LlmClient> {
        Ok(LlmClient::new(self.provider()?, self.model.clone(), self.max_retries))
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            base_url: default_ollama_url(),
            api_key: None,
            model: default_model(),
            max_retries: 2,
            persona_name: default_persona_name(),
        }
    }
}

fn default_db_path() -> PathBuf { PathBuf::from("persona.db") }
fn default_ollama() -> String { "ollama".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_2() -> u32 { 2 }
fn default_persona_name() -> String { "Echo".to_string() }
