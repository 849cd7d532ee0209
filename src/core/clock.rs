//! Clock and Recurring Scheduling
//!
//! The engine never reads system time directly. Every "now" comes from a
//! [`Clock`], which lets tests and the demo binary drive time by hand.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Spawn a task that runs `callback` after `initial_delay` and then every
/// `period` until `shutdown` fires.
///
/// Missed ticks are skipped rather than bursted. The callback is awaited
/// inline, so a slow run delays the next one instead of overlapping it.
pub fn schedule_recurring<F, Fut>(
    name: &'static str,
    initial_delay: StdDuration,
    period: StdDuration,
    mut shutdown: broadcast::Receiver<()>,
    mut callback: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    // interval_at panics on a zero period
    let period = period.max(StdDuration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    callback().await;
                }
                _ = shutdown.recv() => {
                    debug!("{} loop stopping", name);
                    break;
                }
            }
        }
    })
}
