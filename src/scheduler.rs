//! Periodic maturity settlement.
//!
//! Ticks are aligned to the UTC epoch: with a one hour interval the scheduler
//! fires at the top of every hour. A tick that fires while the previous one is
//! still running is skipped.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::engine::{Engine, SettlementError, SettlementReport};

pub struct SettlementScheduler {
    engine: Engine,
    interval: Duration,
    running: Mutex<()>,
}

impl SettlementScheduler {
    /// `interval` is rounded down to whole seconds, one second at least.
    pub fn new(engine: Engine, interval: Duration) -> Self {
        Self {
            engine,
            interval: Duration::from_secs(interval.as_secs().max(1)),
            running: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// First tick strictly after `now`.
    pub fn next_tick_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let interval = i64::try_from(self.interval.as_secs()).unwrap_or(i64::MAX);
        let next = now
            .timestamp()
            .div_euclid(interval)
            .saturating_add(1)
            .saturating_mul(interval);
        DateTime::from_timestamp(next, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Run one settlement pass. `None` if a pass is already in flight.
    pub async fn run_once(&self) -> Option<Result<SettlementReport, SettlementError>> {
        let Ok(_guard) = self.running.try_lock() else {
            debug!("settlement already running, tick skipped");
            return None;
        };
        Some(self.engine.settle_matured().await)
    }

    /// Tick forever. Meant to be spawned next to the request handlers.
    pub async fn run(&self) {
        info!(interval_secs = self.interval.as_secs(), "settlement scheduler started");
        loop {
            let now = self.engine.now();
            let wait = (self.next_tick_after(now) - now)
                .to_std()
                .unwrap_or(self.interval);
            tokio::time::sleep(wait).await;

            match self.run_once().await {
                Some(Err(e)) => warn!(reason = %e, "settlement tick failed"),
                Some(Ok(report)) => debug!(settled = report.settled.len(), "settlement tick"),
                None => {}
            }
        }
    }
}
