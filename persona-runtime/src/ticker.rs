//! Background hourly reward task.
//!
//! Every `rewards.tick_period_secs` the ticker walks the user list and
//! applies the hourly credit one user at a time. Cancellation is checked
//! between users, so a shutdown never interrupts a commit.

use std::sync::Arc;
use std::time::Duration;

use persona_core::metrics::spans;
use persona_core::{Engine, TickReport};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, warn};

/// Totals over the ticker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickerStats {
    /// Completed or interrupted passes.
    pub ticks: u64,
    /// Users credited across all passes.
    pub credited: u64,
    /// Per-user failures across all passes.
    pub failed: u64,
}

/// Periodically credits active users.
pub struct HourlyTicker {
    engine: Arc<Engine>,
    period: Duration,
}

impl HourlyTicker {
    /// Use the engine's configured tick period.
    #[must_use]
    pub fn new(engine: Arc<Engine>) -> Self {
        let period = Duration::from_secs(engine.config().rewards.tick_period_secs.max(1));
        Self { engine, period }
    }

    /// Override the period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run on a new task until `token` is cancelled.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<TickerStats> {
        tokio::spawn(self.run(token))
    }

    /// Tick until `token` is cancelled. The first pass happens one period from now.
    pub async fn run(self, token: CancellationToken) -> TickerStats {
        let mut interval = tokio::time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = TickerStats::default();
        info!(period_secs = self.period.as_secs(), "hourly ticker started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = interval.tick() => {
                    let span = tracing::info_span!(spans::HOURLY_TICK, tick = stats.ticks + 1);
                    let report = self.tick_once(&token).instrument(span).await;
                    stats.ticks += 1;
                    stats.credited += report.credited as u64;
                    stats.failed += report.failed as u64;
                }
            }
        }

        info!(ticks = stats.ticks, credited = stats.credited, "hourly ticker stopped");
        stats
    }

    /// One pass over all users, stopping early if `token` is cancelled.
    pub async fn tick_once(&self, token: &CancellationToken) -> TickReport {
        let mut report = TickReport::default();
        let ids = match self.engine.user_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "could not list users for hourly tick");
                return report;
            }
        };

        for id in ids {
            if token.is_cancelled() {
                info!(seen = report.users_seen, "hourly tick interrupted by shutdown");
                break;
            }
            report.users_seen += 1;
            match self.engine.credit_hourly(&id).await {
                Ok(Some(_)) => report.credited += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(user = %id, error = %e, "hourly credit failed");
                }
            }
            tokio::task::yield_now().await;
        }

        info!(
            users = report.users_seen,
            credited = report.credited,
            failed = report.failed,
            "hourly tick complete"
        );
        report
    }
}
