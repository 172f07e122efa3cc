//! Tracing subscriber setup.

use persona_core::config::GeneralConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `general.log_level`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init(general: &GeneralConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(general)));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if general.json_logs {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}

/// Default filter directive: the configured level for persona crates, warn elsewhere.
#[must_use]
pub fn directive(general: &GeneralConfig) -> String {
    let level = general.log_level.trim();
    let level = if level.is_empty() { "info" } else { level };
    format!("warn,persona_core={level},persona_llm={level},persona_runtime={level},persona={level}")
}
