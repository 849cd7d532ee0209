//! Round Scheduler
//!
//! Drives [`RoundEngine::tick_all`] on a fixed interval. Ticks are
//! idempotent, so a missed or doubled pass only shifts reveal latency.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::core::clock::schedule_recurring;
use crate::engine::engine::RoundEngine;

/// Background ticker for open rounds.
pub struct RoundScheduler {
    engine: Arc<RoundEngine>,
    interval: StdDuration,
}

impl RoundScheduler {
    /// Scheduler using the engine's configured tick interval.
    pub fn new(engine: Arc<RoundEngine>) -> Self {
        let interval = engine.config().tick_interval;
        Self { engine, interval }
    }

    /// Override the tick interval.
    pub fn with_interval(mut self, interval: StdDuration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the tick loop. The first pass runs immediately.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        info!("Round scheduler ticking every {:?}", self.interval);
        let engine = self.engine;

        schedule_recurring("round scheduler", StdDuration::ZERO, self.interval, shutdown, move || {
            let engine = engine.clone();
            async move {
                let summary = engine.tick_all().await;
                if summary.activated + summary.revealed_slots + summary.expired + summary.failed > 0 {
                    debug!(
                        "Tick pass: {} rounds, {} activated, {} slots revealed, {} expired, {} failed",
                        summary.rounds, summary.activated, summary.revealed_slots, summary.expired, summary.failed
                    );
                }
            }
        })
    }
}
