//! Retention Sweeper
//!
//! Bounds the number of completed rounds kept per draw category. For each
//! capped category the sweeper keeps the newest `cap` completed rounds and
//! deletes the rest, removing child records before the rounds themselves.
//!
//! Scheduled and active rounds are never touched. A failing category is
//! logged and skipped; the sweep continues with the next one.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::config::RetentionConfig;
use crate::core::clock::schedule_recurring;
use crate::core::ids::RoundId;
use crate::round::state::DrawCategory;
use crate::store::{RoundStore, StoreError};

/// What happened to one category during a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorySweep {
    /// Nothing over the cap.
    WithinCap {
        /// Completed rounds found.
        completed: usize,
    },
    /// Excess rounds were deleted.
    Trimmed {
        /// Rounds deleted.
        rounds: usize,
        /// Child records deleted.
        dependents: usize,
    },
    /// The category could not be swept this pass.
    Failed(String),
}

/// Result of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Per-category results.
    pub categories: BTreeMap<DrawCategory, CategorySweep>,
}

impl SweepReport {
    /// Total rounds deleted.
    pub fn deleted_rounds(&self) -> usize {
        self.categories
            .values()
            .map(|c| match c {
                CategorySweep::Trimmed { rounds, .. } => *rounds,
                _ => 0,
            })
            .sum()
    }

    /// Categories that failed.
    pub fn failures(&self) -> usize {
        self.categories.values().filter(|c| matches!(c, CategorySweep::Failed(_))).count()
    }
}

/// Periodic pruning of completed rounds.
pub struct RetentionSweeper {
    store: Arc<dyn RoundStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    /// Create a sweeper.
    pub fn new(store: Arc<dyn RoundStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Run one sweep over every capped category.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for (&category, &cap) in &self.config.caps {
            let result = match self.sweep_category(category, cap).await {
                Ok(result) => result,
                Err(e) => {
                    warn!("Retention sweep of {} failed: {}", category, e);
                    CategorySweep::Failed(e.to_string())
                }
            };
            report.categories.insert(category, result);
        }

        let deleted = report.deleted_rounds();
        if deleted > 0 {
            info!("Retention sweep removed {} completed rounds", deleted);
        }
        report
    }

    async fn sweep_category(&self, category: DrawCategory, cap: usize) -> Result<CategorySweep, StoreError> {
        let completed = self.store.list_completed(category).await?;
        if completed.len() <= cap {
            return Ok(CategorySweep::WithinCap { completed: completed.len() });
        }

        let excess: Vec<RoundId> = completed[cap..].iter().map(|entry| entry.id).collect();
        let dependents = self.store.delete_dependents(&excess).await?;
        let rounds = self.store.delete_many(&excess).await?;

        info!("Trimmed {} {} rounds ({} dependents), keeping {}", rounds, category, dependents, cap);
        Ok(CategorySweep::Trimmed { rounds, dependents })
    }

    /// Spawn the periodic sweep loop.
    pub fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        info!(
            "Retention sweeper starting in {:?}, then every {:?}",
            self.config.initial_delay, self.config.period
        );
        let initial_delay = self.config.initial_delay;
        let period = self.config.period;

        schedule_recurring("retention sweeper", initial_delay, period, shutdown, move || {
            let sweeper = self.clone();
            async move {
                sweeper.sweep().await;
            }
        })
    }
}
