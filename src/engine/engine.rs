//! Round Engine
//!
//! Owns the round lifecycle: creation, activation, scheduled reveals,
//! registration, guess arbitration, and timeout closure.
//!
//! ## Concurrency
//!
//! The engine holds no round state of its own. Each operation reads a fresh
//! record, validates it, and commits through the store's status
//! compare-and-swap. Two correct guesses racing on one round both reach
//! `update_if_status(.., Active, ..)`; exactly one observes `Active` and
//! wins, the other sees `StatusMismatch` and gets a concluded verdict.
//!
//! Wallet calls happen outside the store's critical section. A wallet
//! failure after a committed write is undone with a compensating update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::clock::Clock;
use crate::core::ids::{ParticipantId, RoundId};
use crate::engine::error::EngineError;
use crate::round::events::{RevealedSlot, RoundEvent};
use crate::round::guess::{canonical_submission, matches_secret, normalize_token};
use crate::round::schedule::RevealSchedule;
use crate::round::state::{
    Amount, GuessVerdict, NewRound, Round, RoundSnapshot, RoundStatus, WinnerRecord,
};
use crate::store::{GuessSlot, RoundMutation, RoundStore, UpdateOutcome};
use crate::wallet::Wallet;

/// What a single tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Round moved from scheduled to active.
    pub activated: bool,
    /// Slots disclosed by this tick.
    pub revealed: Vec<usize>,
    /// Round closed by timeout.
    pub expired: bool,
}

impl TickOutcome {
    /// Whether the tick changed nothing.
    pub fn is_noop(&self) -> bool {
        !self.activated && self.revealed.is_empty() && !self.expired
    }
}

/// Aggregate of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Open rounds visited.
    pub rounds: usize,
    /// Rounds activated.
    pub activated: usize,
    /// Slots disclosed across all rounds.
    pub revealed_slots: usize,
    /// Rounds closed by timeout.
    pub expired: usize,
    /// Rounds whose tick failed.
    pub failed: usize,
    /// Set when the open-round listing itself failed.
    pub listing_failed: bool,
}

/// The round engine.
pub struct RoundEngine {
    store: Arc<dyn RoundStore>,
    wallet: Arc<dyn Wallet>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    events: broadcast::Sender<RoundEvent>,
}

impl RoundEngine {
    /// Create a new engine.
    pub fn new(
        store: Arc<dyn RoundStore>,
        wallet: Arc<dyn Wallet>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self { store, wallet, clock, config, events }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Subscribe to round events.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RoundEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn schedule_for(&self, round: &Round) -> RevealSchedule {
        RevealSchedule::new(
            &self.config.reveal_policy,
            round.start_time,
            round.end_time,
            round.slot_count(),
        )
    }

    fn view(&self, round: &Round, now: DateTime<Utc>) -> RoundSnapshot {
        round.snapshot(&self.schedule_for(round), now)
    }

    // =========================================================================
    // CREATION
    // =========================================================================

    /// Create a round. It opens immediately if `start_time` has passed.
    #[instrument(skip(self, params), fields(category = %params.category))]
    pub async fn create_round(&self, params: NewRound) -> Result<RoundSnapshot, EngineError> {
        if params.secret.is_empty() {
            return Err(EngineError::InvalidRound("secret must not be empty".into()));
        }
        for token in &params.secret {
            let token = normalize_token(token);
            if token.is_empty() || token.contains(|c: char| c.is_whitespace() || c == ',') {
                return Err(EngineError::InvalidRound(format!("invalid secret token {:?}", token)));
            }
        }

        let round = Round::new(RoundId::new_v4(), params, self.config.round_duration);
        let id = round.id;
        let created = RoundEvent::RoundCreated {
            round_id: id,
            category: round.category,
            start_time: round.start_time,
            end_time: round.end_time,
            slot_count: round.slot_count(),
        };

        self.store.insert(round).await?;
        info!("Created round {}", id.short());
        self.publish(created);

        self.tick(id).await?;
        self.snapshot(id).await
    }

    // =========================================================================
    // TICK
    // =========================================================================

    /// Advance one round to the current time.
    ///
    /// Activates a due scheduled round, applies every due reveal, and closes
    /// an expired round with full disclosure. Writes nothing when there is
    /// nothing to do, so redundant calls are harmless.
    #[instrument(skip(self), fields(round = %round_id.short()))]
    pub async fn tick(&self, round_id: RoundId) -> Result<TickOutcome, EngineError> {
        let now = self.clock.now();
        let mut outcome = TickOutcome::default();

        let mut round = self.store.get(round_id).await?;

        if round.status == RoundStatus::Scheduled {
            if now < round.start_time {
                return Ok(outcome);
            }
            let activate: RoundMutation = Box::new(|r: &mut Round| {
                r.status = RoundStatus::Active;
                Ok(())
            });
            round = match self.store.update_if_status(round_id, RoundStatus::Scheduled, activate).await? {
                UpdateOutcome::Applied(r) => {
                    outcome.activated = true;
                    info!("Round {} is now active", round_id.short());
                    self.publish(RoundEvent::RoundActivated { round_id, at: now });
                    r
                }
                UpdateOutcome::StatusMismatch(r) => r,
                UpdateOutcome::Rejected(e) => return Err(e),
            };
        }

        if round.status != RoundStatus::Active {
            return Ok(outcome);
        }

        let expired = now >= round.end_time;
        let pending = self.schedule_for(&round).pending(now, &round.revealed);
        if pending.is_empty() && !expired {
            return Ok(outcome);
        }

        let mutation: RoundMutation = Box::new(move |r: &mut Round| {
            r.reveal(&pending);
            if expired {
                r.close_without_winner(now);
            }
            Ok(())
        });

        match self.store.update_if_status(round_id, RoundStatus::Active, mutation).await? {
            UpdateOutcome::Applied(updated) => {
                let slots: Vec<RevealedSlot> = updated
                    .revealed
                    .iter()
                    .filter(|(slot, _)| !round.revealed.contains_key(slot))
                    .map(|(slot, token)| RevealedSlot { slot: *slot, token: token.clone() })
                    .collect();

                outcome.revealed = slots.iter().map(|s| s.slot).collect();
                if !slots.is_empty() {
                    debug!("Revealed slots {:?}", outcome.revealed);
                    self.publish(RoundEvent::SlotsRevealed { round_id, slots });
                }

                if expired {
                    outcome.expired = true;
                    info!("Round {} expired without a winner", round_id.short());
                    self.publish(RoundEvent::RoundExpired { round_id, at: now });
                }
            }
            UpdateOutcome::StatusMismatch(_) => {
                debug!("Round {} closed before tick could apply", round_id.short());
            }
            UpdateOutcome::Rejected(e) => return Err(e),
        }

        Ok(outcome)
    }

    /// Tick every open round. Failures are logged and counted, never raised.
    pub async fn tick_all(&self) -> TickSummary {
        let mut summary = TickSummary::default();

        let ids = match self.store.list_open().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!("Skipping tick pass, could not list open rounds: {}", e);
                summary.listing_failed = true;
                return summary;
            }
        };

        for id in ids {
            summary.rounds += 1;
            match self.tick(id).await {
                Ok(outcome) => {
                    summary.activated += outcome.activated as usize;
                    summary.revealed_slots += outcome.revealed.len();
                    summary.expired += outcome.expired as usize;
                }
                Err(e) => {
                    warn!("Tick failed for round {}: {}", id.short(), e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Pay the fee and join a round.
    ///
    /// The fee is debited first. If the membership write then fails for any
    /// reason the fee is refunded, so the caller never pays without joining.
    #[instrument(skip(self), fields(round = %round_id.short(), participant = %participant.short()))]
    pub async fn register(
        &self,
        round_id: RoundId,
        participant: ParticipantId,
    ) -> Result<RoundSnapshot, EngineError> {
        let now = self.clock.now();
        let round = self.store.get(round_id).await?;

        if !round.is_open_at(now) {
            return Err(EngineError::RoundNotActive);
        }
        if round.is_registered(&participant) {
            return Err(EngineError::AlreadyRegistered);
        }

        let fee = round.registration_fee;
        self.wallet.debit(participant, fee).await?;

        let join: RoundMutation = Box::new(move |r: &mut Round| {
            if now >= r.end_time {
                return Err(EngineError::RoundNotActive);
            }
            if !r.participants.insert(participant) {
                return Err(EngineError::AlreadyRegistered);
            }
            r.prize_pool = r.prize_pool.saturating_add(fee);
            Ok(())
        });

        let committed = match self.store.update_if_status(round_id, RoundStatus::Active, join).await {
            Ok(UpdateOutcome::Applied(r)) => Ok(r),
            Ok(UpdateOutcome::StatusMismatch(_)) => Err(EngineError::RoundNotActive),
            Ok(UpdateOutcome::Rejected(e)) => Err(e),
            Err(e) => Err(e.into()),
        };

        match committed {
            Ok(updated) => {
                info!(
                    "Participant {} joined round {} (pool {})",
                    participant.short(), round_id.short(), updated.prize_pool
                );
                self.publish(RoundEvent::ParticipantRegistered {
                    round_id,
                    participant_id: participant,
                    prize_pool: updated.prize_pool,
                    participant_count: updated.participants.len(),
                });
                Ok(self.view(&updated, now))
            }
            Err(e) => {
                self.refund(participant, fee).await;
                Err(e)
            }
        }
    }

    async fn refund(&self, participant: ParticipantId, amount: Amount) {
        if amount == 0 {
            return;
        }
        if let Err(e) = self.wallet.credit(participant, amount).await {
            error!("Refund of {} to {} failed: {}", amount, participant.short(), e);
        }
    }

    // =========================================================================
    // GUESSING
    // =========================================================================

    /// Evaluate a guess.
    ///
    /// Rejections (`NotRegistered`, `RoundNotActive`, `OnCooldown`) are errors.
    /// Wrong guesses and lost races are verdicts.
    #[instrument(skip(self, submission), fields(round = %round_id.short(), participant = %participant.short()))]
    pub async fn submit_guess(
        &self,
        round_id: RoundId,
        participant: ParticipantId,
        submission: &str,
    ) -> Result<GuessVerdict, EngineError> {
        let now = self.clock.now();
        let round = self.store.get(round_id).await?;

        if !round.is_registered(&participant) {
            return Err(EngineError::NotRegistered);
        }
        if !round.is_open_at(now) {
            return Err(EngineError::RoundNotActive);
        }

        let next_allowed = now + self.config.guess_cooldown;
        if let GuessSlot::CoolingDown(until) = self
            .store
            .claim_guess_slot(round_id, participant, now, next_allowed)
            .await?
        {
            return Err(EngineError::OnCooldown { remaining: until - now });
        }

        if !matches_secret(submission, &round.secret) {
            debug!("Wrong guess from {}", participant.short());
            self.publish(RoundEvent::GuessRejected {
                round_id,
                participant_id: participant,
                next_allowed_at: next_allowed,
            });
            return Ok(GuessVerdict::wrong(self.config.guess_cooldown));
        }

        let canonical = canonical_submission(submission);
        let close: RoundMutation = Box::new(move |r: &mut Round| {
            if now >= r.end_time {
                return Err(EngineError::RoundNotActive);
            }
            r.close_with_winner(participant, canonical, now);
            Ok(())
        });

        let won = match self.store.update_if_status(round_id, RoundStatus::Active, close).await? {
            UpdateOutcome::Applied(r) => r,
            UpdateOutcome::StatusMismatch(current) => {
                info!(
                    "Correct guess from {} arrived after round {} closed (winner: {:?})",
                    participant.short(),
                    round_id.short(),
                    current.winner_id.map(|w| w.short())
                );
                return Ok(GuessVerdict::concluded());
            }
            UpdateOutcome::Rejected(e) => return Err(e),
        };

        let prize = won.prize_pool;
        if let Err(e) = self.wallet.credit(participant, prize).await {
            error!("Prize credit for round {} failed: {}; reopening round", round_id.short(), e);
            self.rollback_win(round_id, participant).await;
            return Err(e.into());
        }

        let record = WinnerRecord { round_id, participant_id: participant, amount: prize, won_at: now };
        if let Err(e) = self.store.record_winner(record).await {
            // Prize is already paid; the round record alone is authoritative
            warn!("Could not persist winner record for round {}: {}", round_id.short(), e);
        }

        info!("Round {} won by {} (prize {})", round_id.short(), participant.short(), prize);
        self.publish(RoundEvent::RoundWon { round_id, winner_id: participant, prize, won_at: now });

        Ok(GuessVerdict::won())
    }

    /// Undo a committed win whose payout failed.
    ///
    /// Only the would-be winner's cooldown is cleared. Correct guessers who
    /// lost the race in the meantime keep their `round_concluded` verdict and
    /// their armed cooldown; once it lapses they may guess on the reopened
    /// round again.
    async fn rollback_win(&self, round_id: RoundId, participant: ParticipantId) {
        let reopen: RoundMutation = Box::new(move |r: &mut Round| {
            if r.winner_id != Some(participant) {
                return Err(EngineError::ConcurrentWinnerConflict);
            }
            r.status = RoundStatus::Active;
            r.winner_id = None;
            r.winning_submission = None;
            r.won_at = None;
            r.completed_at = None;
            Ok(())
        });

        match self.store.update_if_status(round_id, RoundStatus::Completed, reopen).await {
            Ok(UpdateOutcome::Applied(_)) => {
                if let Err(e) = self.store.clear_cooldown(round_id, participant).await {
                    warn!("Could not clear cooldown after rollback: {}", e);
                }
            }
            Ok(other) => error!("Rollback of round {} refused: {:?}", round_id.short(), other),
            Err(e) => error!("Rollback of round {} failed: {}", round_id.short(), e),
        }
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Current view of a round.
    pub async fn snapshot(&self, round_id: RoundId) -> Result<RoundSnapshot, EngineError> {
        let round = self.store.get(round_id).await?;
        Ok(self.view(&round, self.clock.now()))
    }

    /// Views of every scheduled or active round.
    pub async fn open_rounds(&self) -> Result<Vec<RoundSnapshot>, EngineError> {
        let now = self.clock.now();
        let mut snapshots = Vec::new();
        for id in self.store.list_open().await? {
            match self.store.get(id).await {
                Ok(round) => snapshots.push(self.view(&round, now)),
                // Deleted between listing and fetch
                Err(crate::store::StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(snapshots)
    }

    /// Payout record of a won round.
    pub async fn winner(&self, round_id: RoundId) -> Result<Option<WinnerRecord>, EngineError> {
        Ok(self.store.winner(round_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use rand::seq::SliceRandom;
    use tokio::sync::Notify;

    use crate::core::clock::ManualClock;
    use crate::round::state::DrawCategory;
    use crate::store::{CompletedEntry, InMemoryStore, StoreError};
    use crate::wallet::{InMemoryWallet, WalletError};

    const SECRET: [&str; 12] = [
        "amber", "bridge", "cactus", "delta", "ember", "falcon",
        "garnet", "harbor", "island", "jigsaw", "kettle", "lumen",
    ];
    const FEE: Amount = 500;
    const SEED: Amount = 10_000;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn solution() -> String {
        SECRET.join(" ")
    }

    struct Harness {
        engine: Arc<RoundEngine>,
        store: Arc<InMemoryStore>,
        wallet: Arc<InMemoryWallet>,
        clock: ManualClock,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let wallet = Arc::new(InMemoryWallet::new());
            let clock = ManualClock::new(t0());
            let engine = Arc::new(RoundEngine::new(
                store.clone(),
                wallet.clone(),
                Arc::new(clock.clone()),
                EngineConfig::default(),
            ));
            Self { engine, store, wallet, clock }
        }

        async fn open_round(&self) -> RoundId {
            let snapshot = self
                .engine
                .create_round(NewRound {
                    category: DrawCategory::Mystery,
                    secret: SECRET.iter().map(|s| s.to_string()).collect(),
                    registration_fee: FEE,
                    seed_prize: SEED,
                    start_time: self.clock.now(),
                })
                .await
                .unwrap();
            snapshot.id
        }

        async fn funded_participant(&self, seed: u8) -> ParticipantId {
            let id = ParticipantId::new([seed; 16]);
            self.wallet.deposit(id, 10 * FEE).await;
            id
        }

        async fn registered(&self, round_id: RoundId, seed: u8) -> ParticipantId {
            let id = self.funded_participant(seed).await;
            self.engine.register(round_id, id).await.unwrap();
            id
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle and reveals
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_create_round_opens_with_initial_reveals() {
        let h = Harness::new();
        let id = h.open_round().await;

        let snapshot = h.engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, RoundStatus::Active);
        assert_eq!(snapshot.revealed.keys().copied().collect::<Vec<_>>(), vec![1, 10]);
        assert_eq!(snapshot.revealed[&10], "jigsaw");
        assert_eq!(snapshot.end_time, t0() + Duration::hours(72));
        assert_eq!(snapshot.next_reveal_at, Some(t0() + Duration::hours(24)));
        assert_eq!(snapshot.prize_pool, SEED);
    }

    #[tokio::test]
    async fn test_future_round_stays_scheduled_until_start() {
        let h = Harness::new();
        let snapshot = h
            .engine
            .create_round(NewRound {
                category: DrawCategory::Mystery,
                secret: vec!["one".into(), "two".into()],
                registration_fee: FEE,
                seed_prize: 0,
                start_time: t0() + Duration::hours(1),
            })
            .await
            .unwrap();
        assert_eq!(snapshot.status, RoundStatus::Scheduled);

        assert!(h.engine.tick(snapshot.id).await.unwrap().is_noop());

        h.clock.advance(Duration::hours(1));
        let outcome = h.engine.tick(snapshot.id).await.unwrap();
        assert!(outcome.activated);
        assert_eq!(outcome.revealed, vec![1]);
    }

    #[tokio::test]
    async fn test_create_round_rejects_bad_secret() {
        let h = Harness::new();
        let params = |secret: Vec<String>| NewRound {
            category: DrawCategory::Mystery,
            secret,
            registration_fee: FEE,
            seed_prize: 0,
            start_time: t0(),
        };

        let empty = h.engine.create_round(params(vec![])).await;
        assert!(matches!(empty, Err(EngineError::InvalidRound(_))));

        let spaced = h.engine.create_round(params(vec!["two words".into()])).await;
        assert!(matches!(spaced, Err(EngineError::InvalidRound(_))));
        assert_eq!(h.store.round_count().await, 0);
    }

    #[tokio::test]
    async fn test_four_slots_revealed_at_twenty_eight_hours() {
        let h = Harness::new();
        let id = h.open_round().await;

        h.clock.set(t0() + Duration::hours(28));
        let outcome = h.engine.tick(id).await.unwrap();
        assert_eq!(outcome.revealed, vec![2, 4]);

        let snapshot = h.engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.revealed.keys().copied().collect::<Vec<_>>(), vec![1, 2, 4, 10]);
        assert_eq!(snapshot.next_reveal_at, Some(t0() + Duration::hours(32)));
    }

    #[tokio::test]
    async fn test_tick_is_idempotent() {
        let h = Harness::new();
        let id = h.open_round().await;
        h.clock.set(t0() + Duration::hours(24));

        let first = h.engine.tick(id).await.unwrap();
        assert_eq!(first.revealed, vec![4]);
        let before = h.engine.snapshot(id).await.unwrap();

        let second = h.engine.tick(id).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(h.engine.snapshot(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_revealed_count_never_decreases() {
        let h = Harness::new();
        let id = h.open_round().await;

        let mut last = 0;
        for _ in 0..80 {
            h.clock.advance(Duration::hours(1));
            h.engine.tick(id).await.unwrap();
            let count = h.engine.snapshot(id).await.unwrap().revealed.len();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, SECRET.len());
    }

    #[tokio::test]
    async fn test_timeout_closes_with_full_disclosure() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;

        h.clock.set(t0() + Duration::hours(72) + Duration::seconds(3));
        let outcome = h.engine.tick(id).await.unwrap();
        assert!(outcome.expired);
        assert_eq!(outcome.revealed.len(), 10);

        let snapshot = h.engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, RoundStatus::Completed);
        assert_eq!(snapshot.revealed.len(), 12);
        assert!(snapshot.winner_id.is_none());
        assert!(snapshot.next_reveal_at.is_none());

        // Late guesses see a closed round
        let late = h.engine.submit_guess(id, alice, &solution()).await;
        assert_eq!(late, Err(EngineError::RoundNotActive));
        assert!(h.engine.tick(id).await.unwrap().is_noop());
    }

    #[tokio::test]
    async fn test_late_tick_catches_up() {
        let h = Harness::new();
        let id = h.open_round().await;

        // One tick 40h in reveals everything due by then in one step
        h.clock.set(t0() + Duration::hours(40));
        let outcome = h.engine.tick(id).await.unwrap();
        assert_eq!(outcome.revealed, vec![2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_tick_all_counts_work() {
        let h = Harness::new();
        h.open_round().await;
        h.open_round().await;

        h.clock.set(t0() + Duration::hours(24));
        let summary = h.engine.tick_all().await;
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.revealed_slots, 2);
        assert_eq!(summary.failed, 0);

        h.store.set_offline(true).await;
        let summary = h.engine.tick_all().await;
        assert!(summary.listing_failed);
    }

    /// Store wrapper that fails reads of one round, or parks one
    /// participant's cooldown claim until released.
    struct FaultyStore {
        inner: Arc<InMemoryStore>,
        unreadable: Option<RoundId>,
        park_claim_of: Option<ParticipantId>,
        claim_parked: Notify,
        claim_release: Notify,
    }

    impl FaultyStore {
        fn new(inner: Arc<InMemoryStore>) -> Self {
            Self {
                inner,
                unreadable: None,
                park_claim_of: None,
                claim_parked: Notify::new(),
                claim_release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl RoundStore for FaultyStore {
        async fn get(&self, id: RoundId) -> Result<Round, StoreError> {
            if self.unreadable == Some(id) {
                return Err(StoreError::Unavailable("read timeout".into()));
            }
            self.inner.get(id).await
        }
        async fn insert(&self, round: Round) -> Result<(), StoreError> {
            self.inner.insert(round).await
        }
        async fn update_if_status(
            &self,
            id: RoundId,
            expected: RoundStatus,
            mutation: RoundMutation,
        ) -> Result<UpdateOutcome, StoreError> {
            self.inner.update_if_status(id, expected, mutation).await
        }
        async fn list_open(&self) -> Result<Vec<RoundId>, StoreError> {
            self.inner.list_open().await
        }
        async fn list_completed(&self, category: DrawCategory) -> Result<Vec<CompletedEntry>, StoreError> {
            self.inner.list_completed(category).await
        }
        async fn delete_many(&self, ids: &[RoundId]) -> Result<usize, StoreError> {
            self.inner.delete_many(ids).await
        }
        async fn delete_dependents(&self, ids: &[RoundId]) -> Result<usize, StoreError> {
            self.inner.delete_dependents(ids).await
        }
        async fn claim_guess_slot(
            &self,
            round_id: RoundId,
            participant: ParticipantId,
            now: DateTime<Utc>,
            next_allowed: DateTime<Utc>,
        ) -> Result<GuessSlot, StoreError> {
            let slot = self.inner.claim_guess_slot(round_id, participant, now, next_allowed).await?;
            if self.park_claim_of == Some(participant) {
                self.claim_parked.notify_one();
                self.claim_release.notified().await;
            }
            Ok(slot)
        }
        async fn clear_cooldown(&self, round_id: RoundId, participant: ParticipantId) -> Result<(), StoreError> {
            self.inner.clear_cooldown(round_id, participant).await
        }
        async fn record_winner(&self, record: WinnerRecord) -> Result<(), StoreError> {
            self.inner.record_winner(record).await
        }
        async fn winner(&self, round_id: RoundId) -> Result<Option<WinnerRecord>, StoreError> {
            self.inner.winner(round_id).await
        }
    }

    #[tokio::test]
    async fn test_tick_all_skips_failing_round() {
        let h = Harness::new();
        let broken = h.open_round().await;
        let healthy = h.open_round().await;

        let engine = RoundEngine::new(
            Arc::new(FaultyStore { unreadable: Some(broken), ..FaultyStore::new(h.store.clone()) }),
            h.wallet.clone(),
            Arc::new(h.clock.clone()),
            EngineConfig::default(),
        );

        h.clock.set(t0() + Duration::hours(24));
        let summary = engine.tick_all().await;
        assert_eq!(summary.rounds, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.revealed_slots, 1);
        assert!(!summary.listing_failed);

        let healthy = h.engine.snapshot(healthy).await.unwrap();
        assert_eq!(healthy.revealed.keys().copied().collect::<Vec<_>>(), vec![1, 4, 10]);
        let broken = h.engine.snapshot(broken).await.unwrap();
        assert_eq!(broken.revealed.keys().copied().collect::<Vec<_>>(), vec![1, 10]);
    }

    // -------------------------------------------------------------------------
    // Registration
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_register_debits_and_grows_pool() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.funded_participant(1).await;

        let snapshot = h.engine.register(id, alice).await.unwrap();
        assert_eq!(snapshot.participant_count, 1);
        assert_eq!(snapshot.prize_pool, SEED + FEE);
        assert_eq!(h.wallet.balance(&alice).await, 9 * FEE);

        let again = h.engine.register(id, alice).await;
        assert_eq!(again, Err(EngineError::AlreadyRegistered));
        assert_eq!(h.wallet.balance(&alice).await, 9 * FEE);
    }

    #[tokio::test]
    async fn test_register_insufficient_funds_changes_nothing() {
        let h = Harness::new();
        let id = h.open_round().await;
        let broke = ParticipantId::new([7; 16]);
        h.wallet.deposit(broke, FEE - 1).await;

        let result = h.engine.register(id, broke).await;
        assert_eq!(result, Err(EngineError::InsufficientFunds));

        let snapshot = h.engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.participant_count, 0);
        assert_eq!(snapshot.prize_pool, SEED);
        assert_eq!(h.wallet.balance(&broke).await, FEE - 1);
    }

    #[tokio::test]
    async fn test_register_after_end_rejected() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.funded_participant(1).await;

        // Expired but not yet ticked
        h.clock.set(t0() + Duration::hours(72));
        assert_eq!(h.engine.register(id, alice).await, Err(EngineError::RoundNotActive));
        assert_eq!(h.wallet.balance(&alice).await, 10 * FEE);
    }

    #[tokio::test]
    async fn test_double_registration_charges_once() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.funded_participant(1).await;

        // Concurrent double registration: the second write is rejected and refunded
        let (a, b) = tokio::join!(h.engine.register(id, alice), h.engine.register(id, alice));
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(h.wallet.balance(&alice).await, 9 * FEE);
        assert_eq!(h.engine.snapshot(id).await.unwrap().prize_pool, SEED + FEE);
    }

    // -------------------------------------------------------------------------
    // Guessing
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_guess_requires_registration() {
        let h = Harness::new();
        let id = h.open_round().await;
        let stranger = ParticipantId::new([9; 16]);

        let result = h.engine.submit_guess(id, stranger, &solution()).await;
        assert_eq!(result, Err(EngineError::NotRegistered));
    }

    #[tokio::test]
    async fn test_wrong_guess_cooldown_scenario() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;

        h.clock.set(t0() + Duration::hours(1));
        let verdict = h.engine.submit_guess(id, alice, "wrong answer").await.unwrap();
        assert!(!verdict.correct);
        assert_eq!(verdict.cooldown_remaining(), Some(Duration::minutes(1)));

        h.clock.advance(Duration::seconds(30));
        let blocked = h.engine.submit_guess(id, alice, "still wrong").await;
        assert_eq!(blocked, Err(EngineError::OnCooldown { remaining: Duration::seconds(30) }));

        h.clock.advance(Duration::seconds(31));
        let verdict = h.engine.submit_guess(id, alice, "still wrong").await.unwrap();
        assert!(!verdict.correct);
    }

    #[tokio::test]
    async fn test_cooldown_blocks_even_correct_guess() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;

        h.engine.submit_guess(id, alice, "nope").await.unwrap();
        h.clock.advance(Duration::seconds(59));
        let blocked = h.engine.submit_guess(id, alice, &solution()).await;
        assert!(matches!(blocked, Err(EngineError::OnCooldown { .. })));
        assert_eq!(h.engine.snapshot(id).await.unwrap().status, RoundStatus::Active);
    }

    #[tokio::test]
    async fn test_shuffled_secret_never_wins() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let mut words = SECRET.to_vec();
            words.shuffle(&mut rng);
            if words == SECRET {
                words.rotate_left(1);
            }
            let verdict = h.engine.submit_guess(id, alice, &words.join(" ")).await.unwrap();
            assert!(!verdict.correct);
            h.clock.advance(Duration::minutes(1));
        }
        let snapshot = h.engine.snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, RoundStatus::Active);
        assert_eq!(snapshot.revealed.len(), 2);
    }

    #[tokio::test]
    async fn test_correct_guess_wins_and_pays() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;
        let bob = h.registered(id, 2).await;
        let mut events = h.engine.subscribe();

        h.clock.advance(Duration::hours(5));
        let submission = solution().to_uppercase().replace(' ', ", ");
        let verdict = h.engine.submit_guess(id, alice, &submission).await.unwrap();
        assert_eq!(verdict, GuessVerdict::won());

        let snapshot = h.engine.snapshot(id).await.unwrap();
        let prize = SEED + 2 * FEE;
        assert_eq!(snapshot.status, RoundStatus::Completed);
        assert_eq!(snapshot.winner_id, Some(alice));
        assert_eq!(snapshot.winning_submission, Some(solution()));
        assert_eq!(snapshot.won_at, Some(t0() + Duration::hours(5)));
        assert_eq!(h.wallet.balance(&alice).await, 9 * FEE + prize);

        let record = h.engine.winner(id).await.unwrap().unwrap();
        assert_eq!(record.amount, prize);

        match events.recv().await.unwrap() {
            RoundEvent::RoundWon { winner_id, prize: paid, .. } => {
                assert_eq!(winner_id, alice);
                assert_eq!(paid, prize);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let late = h.engine.submit_guess(id, bob, &solution()).await;
        assert_eq!(late, Err(EngineError::RoundNotActive));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_correct_guesses_single_winner() {
        const K: u8 = 16;
        let h = Harness::new();
        let id = h.open_round().await;

        let mut participants = Vec::new();
        for seed in 1..=K {
            participants.push(h.registered(id, seed).await);
        }

        let mut handles = Vec::new();
        for participant in participants.clone() {
            let engine = h.engine.clone();
            handles.push(tokio::spawn(async move {
                engine.submit_guess(id, participant, &solution()).await
            }));
        }

        let mut winners = 0;
        let mut concluded = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(v) if v.correct => winners += 1,
                Ok(v) if v.round_concluded => concluded += 1,
                // Reached the round after the winner's commit was visible
                Err(EngineError::RoundNotActive) => concluded += 1,
                other => panic!("unexpected result: {:?}", other),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(concluded, K as usize - 1);

        let snapshot = h.engine.snapshot(id).await.unwrap();
        let winner = snapshot.winner_id.unwrap();
        let prize = SEED + K as Amount * FEE;
        assert_eq!(h.wallet.balance(&winner).await, 9 * FEE + prize);
        for p in participants.iter().filter(|p| **p != winner) {
            assert_eq!(h.wallet.balance(p).await, 9 * FEE);
        }
    }

    #[tokio::test]
    async fn test_failed_payout_rolls_back_win() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;
        let before = h.engine.snapshot(id).await.unwrap();

        h.wallet.set_offline(true).await;
        let result = h.engine.submit_guess(id, alice, &solution()).await;
        assert!(matches!(result, Err(EngineError::WalletUnavailable(_))));

        let after = h.engine.snapshot(id).await.unwrap();
        assert_eq!(after.status, RoundStatus::Active);
        assert!(after.winner_id.is_none());
        assert_eq!(after.prize_pool, before.prize_pool);
        assert!(h.engine.winner(id).await.unwrap().is_none());

        // Cooldown was cleared, so an immediate retry can still win
        h.wallet.set_offline(false).await;
        let verdict = h.engine.submit_guess(id, alice, &solution()).await.unwrap();
        assert!(verdict.correct);
    }

    /// Wallet whose first credit parks until released, then fails.
    struct StalledPayoutWallet {
        inner: Arc<InMemoryWallet>,
        armed: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Wallet for StalledPayoutWallet {
        async fn debit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError> {
            self.inner.debit(participant, amount).await
        }
        async fn credit(&self, participant: ParticipantId, amount: Amount) -> Result<(), WalletError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
                return Err(WalletError::Unavailable("payout timeout".into()));
            }
            self.inner.credit(participant, amount).await
        }
    }

    #[tokio::test]
    async fn test_race_loser_keeps_cooldown_after_rollback() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;
        let bob = h.registered(id, 2).await;

        let store = Arc::new(FaultyStore { park_claim_of: Some(bob), ..FaultyStore::new(h.store.clone()) });
        let wallet = Arc::new(StalledPayoutWallet {
            inner: h.wallet.clone(),
            armed: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let engine = Arc::new(RoundEngine::new(
            store.clone(),
            wallet.clone(),
            Arc::new(h.clock.clone()),
            EngineConfig::default(),
        ));

        // Bob passes validation and arms his cooldown, then stalls
        let racing = engine.clone();
        let loser = tokio::spawn(async move { racing.submit_guess(id, bob, &solution()).await });
        store.claim_parked.notified().await;

        // Alice wins, and her payout stalls
        let racing = engine.clone();
        let winner = tokio::spawn(async move { racing.submit_guess(id, alice, &solution()).await });
        wallet.entered.notified().await;

        store.claim_release.notify_one();
        assert_eq!(loser.await.unwrap().unwrap(), GuessVerdict::concluded());

        wallet.release.notify_one();
        assert!(matches!(winner.await.unwrap(), Err(EngineError::WalletUnavailable(_))));
        assert_eq!(engine.snapshot(id).await.unwrap().status, RoundStatus::Active);

        let blocked = h.engine.submit_guess(id, bob, &solution()).await;
        assert!(matches!(blocked, Err(EngineError::OnCooldown { .. })));

        h.clock.advance(Duration::seconds(61));
        let verdict = h.engine.submit_guess(id, bob, &solution()).await.unwrap();
        assert!(verdict.correct);
        assert_eq!(h.engine.snapshot(id).await.unwrap().winner_id, Some(bob));
    }

    #[tokio::test]
    async fn test_guess_after_end_before_tick_rejected() {
        let h = Harness::new();
        let id = h.open_round().await;
        let alice = h.registered(id, 1).await;

        h.clock.set(t0() + Duration::hours(72));
        let result = h.engine.submit_guess(id, alice, &solution()).await;
        assert_eq!(result, Err(EngineError::RoundNotActive));
    }

    #[tokio::test]
    async fn test_unknown_round() {
        let h = Harness::new();
        let missing = RoundId::from_bytes([0xee; 16]);
        assert_eq!(h.engine.snapshot(missing).await, Err(EngineError::RoundNotFound(missing)));
        assert_eq!(h.engine.tick(missing).await, Err(EngineError::RoundNotFound(missing)));
    }
}
