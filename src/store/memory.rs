//! In-Memory Round Store
//!
//! BTreeMap-backed store behind tokio RwLocks. Conditional updates run
//! entirely under the rounds write lock, which is what makes the
//! status compare-and-swap atomic.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::core::ids::{ParticipantId, RoundId};
use crate::round::state::{DrawCategory, Round, RoundStatus, WinnerRecord};
use crate::store::{
    CompletedEntry, GuessSlot, RoundMutation, RoundStore, StoreError, UpdateOutcome,
};

/// In-process round store.
#[derive(Default)]
pub struct InMemoryStore {
    rounds: RwLock<BTreeMap<RoundId, Round>>,
    cooldowns: RwLock<BTreeMap<(RoundId, ParticipantId), DateTime<Utc>>>,
    winners: RwLock<BTreeMap<RoundId, WinnerRecord>>,
    offline: RwLock<bool>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `Unavailable` while set.
    pub async fn set_offline(&self, offline: bool) {
        *self.offline.write().await = offline;
    }

    /// Number of stored rounds.
    pub async fn round_count(&self) -> usize {
        self.rounds.read().await.len()
    }

    /// Number of stored cooldown entries.
    pub async fn cooldown_count(&self) -> usize {
        self.cooldowns.read().await.len()
    }

    async fn check_online(&self) -> Result<(), StoreError> {
        if *self.offline.read().await {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RoundStore for InMemoryStore {
    async fn get(&self, id: RoundId) -> Result<Round, StoreError> {
        self.check_online().await?;
        self.rounds
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, round: Round) -> Result<(), StoreError> {
        self.check_online().await?;
        let mut rounds = self.rounds.write().await;
        if rounds.contains_key(&round.id) {
            return Err(StoreError::Duplicate(round.id));
        }
        rounds.insert(round.id, round);
        Ok(())
    }

    async fn update_if_status(
        &self,
        id: RoundId,
        expected: RoundStatus,
        mutation: RoundMutation,
    ) -> Result<UpdateOutcome, StoreError> {
        self.check_online().await?;

        let mut rounds = self.rounds.write().await;
        let current = rounds.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if current.status != expected {
            return Ok(UpdateOutcome::StatusMismatch(current.clone()));
        }

        let mut draft = current.clone();
        if let Err(e) = mutation(&mut draft) {
            return Ok(UpdateOutcome::Rejected(e));
        }

        draft.version += 1;
        *current = draft.clone();
        Ok(UpdateOutcome::Applied(draft))
    }

    async fn list_open(&self) -> Result<Vec<RoundId>, StoreError> {
        self.check_online().await?;
        Ok(self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.id)
            .collect())
    }

    async fn list_completed(&self, category: DrawCategory) -> Result<Vec<CompletedEntry>, StoreError> {
        self.check_online().await?;

        let mut entries: Vec<CompletedEntry> = self
            .rounds
            .read()
            .await
            .values()
            .filter(|r| r.category == category && r.status == RoundStatus::Completed)
            .filter_map(|r| r.completed_at.map(|completed_at| CompletedEntry { id: r.id, completed_at }))
            .collect();

        // Newest first; id breaks ties so the order is total
        entries.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }

    async fn delete_many(&self, ids: &[RoundId]) -> Result<usize, StoreError> {
        self.check_online().await?;
        let mut rounds = self.rounds.write().await;
        let removed = ids.iter().filter(|id| rounds.remove(*id).is_some()).count();
        debug!("Deleted {} rounds", removed);
        Ok(removed)
    }

    async fn delete_dependents(&self, ids: &[RoundId]) -> Result<usize, StoreError> {
        self.check_online().await?;
        let targets: BTreeSet<RoundId> = ids.iter().copied().collect();

        let mut removed = 0;
        {
            let mut winners = self.winners.write().await;
            for id in &targets {
                if winners.remove(id).is_some() {
                    removed += 1;
                }
            }
        }
        {
            let mut cooldowns = self.cooldowns.write().await;
            let before = cooldowns.len();
            cooldowns.retain(|(round_id, _), _| !targets.contains(round_id));
            removed += before - cooldowns.len();
        }
        Ok(removed)
    }

    async fn claim_guess_slot(
        &self,
        round_id: RoundId,
        participant: ParticipantId,
        now: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    ) -> Result<GuessSlot, StoreError> {
        self.check_online().await?;
        let mut cooldowns = self.cooldowns.write().await;
        let key = (round_id, participant);

        if let Some(&until) = cooldowns.get(&key) {
            if until > now {
                return Ok(GuessSlot::CoolingDown(until));
            }
        }
        cooldowns.insert(key, next_allowed);
        Ok(GuessSlot::Claimed)
    }

    async fn clear_cooldown(&self, round_id: RoundId, participant: ParticipantId) -> Result<(), StoreError> {
        self.check_online().await?;
        self.cooldowns.write().await.remove(&(round_id, participant));
        Ok(())
    }

    async fn record_winner(&self, record: WinnerRecord) -> Result<(), StoreError> {
        self.check_online().await?;
        self.winners.write().await.insert(record.round_id, record);
        Ok(())
    }

    async fn winner(&self, round_id: RoundId) -> Result<Option<WinnerRecord>, StoreError> {
        self.check_online().await?;
        Ok(self.winners.read().await.get(&round_id).cloned())
    }
}
