//! Round Store
//!
//! Narrow transactional interface to durable round records. The store is the
//! single source of truth: the engine reads a fresh copy on every call and
//! writes only through [`RoundStore::update_if_status`], a compare-and-swap
//! on the round's status.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::ids::{ParticipantId, RoundId};
use crate::engine::error::EngineError;
use crate::round::state::{DrawCategory, Round, RoundStatus, WinnerRecord};

pub use memory::InMemoryStore;

/// Store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Round does not exist.
    #[error("round {0} not found")]
    NotFound(RoundId),

    /// Round id already in use.
    #[error("round {0} already exists")]
    Duplicate(RoundId),

    /// Backend unreachable or timed out.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Mutation applied to a round inside a conditional update.
///
/// Runs against a draft copy. Returning an error discards the draft.
pub type RoundMutation = Box<dyn FnOnce(&mut Round) -> Result<(), EngineError> + Send>;

/// Result of a conditional update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Status matched and the mutation committed. Holds the new record.
    Applied(Round),
    /// Status did not match. Holds the current record, unchanged.
    StatusMismatch(Round),
    /// Status matched but the mutation refused. Nothing was written.
    Rejected(EngineError),
}

/// Result of a cooldown claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessSlot {
    /// Guess may proceed; the cooldown has been re-armed.
    Claimed,
    /// Participant is cooling down until the given time.
    CoolingDown(DateTime<Utc>),
}

/// Completed round listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletedEntry {
    /// Round id.
    pub id: RoundId,
    /// When the round completed.
    pub completed_at: DateTime<Utc>,
}

/// Durable round storage.
#[async_trait]
pub trait RoundStore: Send + Sync {
    /// Fetch a round.
    async fn get(&self, id: RoundId) -> Result<Round, StoreError>;

    /// Insert a new round.
    async fn insert(&self, round: Round) -> Result<(), StoreError>;

    /// Apply `mutation` atomically if the round's status equals `expected`.
    ///
    /// Implementations must serialize concurrent calls for the same round so
    /// that at most one of two racing updates observes the expected status.
    async fn update_if_status(
        &self,
        id: RoundId,
        expected: RoundStatus,
        mutation: RoundMutation,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Ids of every round that is scheduled or active.
    async fn list_open(&self) -> Result<Vec<RoundId>, StoreError>;

    /// Completed rounds of a category, newest completion first.
    async fn list_completed(&self, category: DrawCategory) -> Result<Vec<CompletedEntry>, StoreError>;

    /// Delete rounds. Returns how many existed.
    async fn delete_many(&self, ids: &[RoundId]) -> Result<usize, StoreError>;

    /// Delete child records (winner records, cooldowns) of the given rounds.
    /// Returns how many records were removed.
    async fn delete_dependents(&self, ids: &[RoundId]) -> Result<usize, StoreError>;

    /// Atomically check the participant's cooldown and, if elapsed, arm it
    /// until `next_allowed`.
    async fn claim_guess_slot(
        &self,
        round_id: RoundId,
        participant: ParticipantId,
        now: DateTime<Utc>,
        next_allowed: DateTime<Utc>,
    ) -> Result<GuessSlot, StoreError>;

    /// Remove a participant's cooldown.
    async fn clear_cooldown(&self, round_id: RoundId, participant: ParticipantId) -> Result<(), StoreError>;

    /// Persist the payout record of a won round.
    async fn record_winner(&self, record: WinnerRecord) -> Result<(), StoreError>;

    /// Payout record of a round, if any.
    async fn winner(&self, round_id: RoundId) -> Result<Option<WinnerRecord>, StoreError>;
}
