//! `persona` daemon: opens the store, starts the hourly ticker and waits for
//! Ctrl-C. Transports embed [`ChatService`] in-process.
//!
//! ```bash
//! persona [path/to/persona.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use persona_core::{Clock, Engine, MemoryUserStore, SqliteUserStore, SystemClock, UserStore};
use persona_runtime::{ChatService, HourlyTicker, LlmClassifier, RuntimeConfig, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RuntimeConfig::load(config_path.as_deref()).context("loading configuration")?;
    telemetry::init(&config.engine.general);

    let store: Arc<dyn UserStore> = if config.database.in_memory {
        Arc::new(MemoryUserStore::new())
    } else {
        let store = SqliteUserStore::open(&config.database.path, &config.engine.persistence)
            .with_context(|| format!("opening {}", config.database.path.display()))?;
        info!(path = %store.db_path().display(), users = store.user_count()?, "store opened");
        Arc::new(store)
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let engine = Arc::new(Engine::new(config.engine.clone(), store, clock).context("building engine")?);

    let client = Arc::new(config.llm.build_client().context("building LLM client")?);
    let classifier = LlmClassifier::new(client, config.llm.persona_name.clone(), config.engine.classifier.timeout_ms);
    if !classifier.is_available() {
        info!("no LLM provider configured, messages will score as neutral");
    }
    let service = ChatService::new(Arc::clone(&engine), classifier);

    let token = CancellationToken::new();
    let ticker = HourlyTicker::new(Arc::clone(service.engine())).spawn(token.clone());
    info!(model = %config.llm.model, "persona runtime ready");

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown requested");
    token.cancel();
    let stats = ticker.await.context("joining hourly ticker")?;
    info!(ticks = stats.ticks, credited = stats.credited, "hourly ticker joined");
    println!("{}", engine.counters().snapshot().to_prometheus());
    Ok(())
}
