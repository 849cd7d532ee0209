//! Round State Definitions
//!
//! The durable round record plus the read-only views handed to callers.
//! Uses BTreeMap/BTreeSet so snapshots serialize in a stable order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Deserialize};

use crate::core::hash::{commit_secret, Commitment};
use crate::core::ids::{ParticipantId, RoundId};
use crate::round::guess::normalize_token;
use crate::round::schedule::RevealSchedule;

/// Monetary amount in minor currency units.
pub type Amount = u64;

// =============================================================================
// CATEGORY
// =============================================================================

/// Draw category. Retention caps are configured per category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawCategory {
    /// Daily draw.
    Daily,
    /// Weekly draw.
    Weekly,
    /// Monthly draw.
    Monthly,
    /// Mystery Search puzzle round.
    Mystery,
}

impl DrawCategory {
    /// Every category, in sweep order.
    pub const ALL: [DrawCategory; 4] = [
        DrawCategory::Daily,
        DrawCategory::Weekly,
        DrawCategory::Monthly,
        DrawCategory::Mystery,
    ];

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            DrawCategory::Daily => "daily",
            DrawCategory::Weekly => "weekly",
            DrawCategory::Monthly => "monthly",
            DrawCategory::Mystery => "mystery",
        }
    }
}

impl fmt::Display for DrawCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// STATUS
// =============================================================================

/// Round lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Created, not yet open.
    Scheduled,
    /// Open for registration and guesses.
    Active,
    /// Closed by a winning guess or by timeout. Terminal.
    Completed,
}

impl RoundStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundStatus::Completed)
    }
}

// =============================================================================
// ROUND
// =============================================================================

/// Parameters for a new round.
#[derive(Debug, Clone)]
pub struct NewRound {
    /// Draw category.
    pub category: DrawCategory,
    /// Solution tokens, in order.
    pub secret: Vec<String>,
    /// Fee charged once per participant.
    pub registration_fee: Amount,
    /// Amount the prize pool starts with.
    pub seed_prize: Amount,
    /// When the round opens.
    pub start_time: DateTime<Utc>,
}

/// A puzzle round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Draw category.
    pub category: DrawCategory,
    /// Normalized solution tokens. Never leaves the engine while open.
    pub secret: Vec<String>,
    /// Disclosed slots (1-based index to token).
    pub revealed: BTreeMap<usize, String>,
    /// Fee charged once per participant.
    pub registration_fee: Amount,
    /// Current prize.
    pub prize_pool: Amount,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Opening time.
    pub start_time: DateTime<Utc>,
    /// Closing time (`start_time + round_duration`).
    pub end_time: DateTime<Utc>,
    /// Registered participants.
    pub participants: BTreeSet<ParticipantId>,
    /// Winner, set only by a winning guess.
    pub winner_id: Option<ParticipantId>,
    /// Canonical winning submission.
    pub winning_submission: Option<String>,
    /// When the winning guess landed.
    pub won_at: Option<DateTime<Utc>>,
    /// When the round reached `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
    /// Bumped on every committed mutation.
    pub version: u64,
}

impl Round {
    /// Build a scheduled round from creation parameters.
    pub fn new(id: RoundId, params: NewRound, duration: Duration) -> Self {
        Self {
            id,
            category: params.category,
            secret: params.secret.iter().map(|t| normalize_token(t)).collect(),
            revealed: BTreeMap::new(),
            registration_fee: params.registration_fee,
            prize_pool: params.seed_prize,
            status: RoundStatus::Scheduled,
            start_time: params.start_time,
            end_time: params.start_time + duration,
            participants: BTreeSet::new(),
            winner_id: None,
            winning_submission: None,
            won_at: None,
            completed_at: None,
            version: 0,
        }
    }

    /// Number of secret slots.
    pub fn slot_count(&self) -> usize {
        self.secret.len()
    }

    /// Whether registration and guesses are accepted at `now`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.status == RoundStatus::Active && now < self.end_time
    }

    /// Whether the participant has registered.
    pub fn is_registered(&self, participant: &ParticipantId) -> bool {
        self.participants.contains(participant)
    }

    /// Disclose the given slots. Already revealed or out-of-range slots are
    /// skipped. Returns the slots that were newly revealed.
    pub fn reveal(&mut self, slots: &[usize]) -> Vec<usize> {
        let mut newly = Vec::new();
        for &slot in slots {
            if slot == 0 || slot > self.secret.len() || self.revealed.contains_key(&slot) {
                continue;
            }
            self.revealed.insert(slot, self.secret[slot - 1].clone());
            newly.push(slot);
        }
        newly
    }

    /// Disclose every remaining slot.
    pub fn reveal_all(&mut self) -> Vec<usize> {
        let all: Vec<usize> = (1..=self.secret.len()).collect();
        self.reveal(&all)
    }

    /// Close by timeout: full disclosure, no winner.
    pub fn close_without_winner(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        let newly = self.reveal_all();
        self.status = RoundStatus::Completed;
        self.completed_at = Some(now);
        newly
    }

    /// Close with a winner.
    pub fn close_with_winner(&mut self, winner: ParticipantId, submission: String, now: DateTime<Utc>) {
        self.status = RoundStatus::Completed;
        self.winner_id = Some(winner);
        self.winning_submission = Some(submission);
        self.won_at = Some(now);
        self.completed_at = Some(now);
    }

    /// Commitment to the secret, published from creation onward.
    pub fn secret_commitment(&self) -> Commitment {
        commit_secret(&self.id, &self.secret)
    }

    /// Read-only view for callers.
    pub fn snapshot(&self, schedule: &RevealSchedule, now: DateTime<Utc>) -> RoundSnapshot {
        let next_reveal_at = if self.status == RoundStatus::Completed {
            None
        } else {
            schedule.next_reveal_after(now, &self.revealed)
        };

        RoundSnapshot {
            id: self.id,
            category: self.category,
            revealed: self.revealed.clone(),
            slot_count: self.secret.len(),
            registration_fee: self.registration_fee,
            prize_pool: self.prize_pool,
            status: self.status,
            start_time: self.start_time,
            end_time: self.end_time,
            winner_id: self.winner_id,
            winning_submission: self.winning_submission.clone(),
            won_at: self.won_at,
            next_reveal_at,
            participant_count: self.participants.len(),
            secret_commitment: hex::encode(self.secret_commitment()),
            version: self.version,
        }
    }
}

// =============================================================================
// BOUNDARY VIEWS
// =============================================================================

/// Round as seen by presentation layers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round identifier.
    pub id: RoundId,
    /// Draw category.
    pub category: DrawCategory,
    /// Disclosed slots, on the wire as `[{"slot": 1, "token": "..."}]`.
    #[serde(with = "revealed_slots")]
    pub revealed: BTreeMap<usize, String>,
    /// Total slot count.
    pub slot_count: usize,
    /// Registration fee.
    pub registration_fee: Amount,
    /// Current prize.
    pub prize_pool: Amount,
    /// Lifecycle status.
    pub status: RoundStatus,
    /// Opening time.
    pub start_time: DateTime<Utc>,
    /// Closing time.
    pub end_time: DateTime<Utc>,
    /// Winner, if closed by a correct guess.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<ParticipantId>,
    /// Winning submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winning_submission: Option<String>,
    /// When the round was won.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub won_at: Option<DateTime<Utc>>,
    /// Next scheduled disclosure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_reveal_at: Option<DateTime<Utc>>,
    /// Registered participant count.
    pub participant_count: usize,
    /// Hex SHA-256 commitment to the secret.
    pub secret_commitment: String,
    /// Record version.
    pub version: u64,
}

/// Slot map as a list of `RevealedSlot`. JSON object keys are strings, which
/// internally tagged messages cannot read back as `usize`.
mod revealed_slots {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::round::events::RevealedSlot;

    pub fn serialize<S: Serializer>(map: &BTreeMap<usize, String>, s: S) -> Result<S::Ok, S::Error> {
        let slots: Vec<RevealedSlot> = map
            .iter()
            .map(|(slot, token)| RevealedSlot { slot: *slot, token: token.clone() })
            .collect();
        slots.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<BTreeMap<usize, String>, D::Error> {
        let slots = Vec::<RevealedSlot>::deserialize(d)?;
        Ok(slots.into_iter().map(|s| (s.slot, s.token)).collect())
    }
}

/// Outcome of a guess that passed validation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuessVerdict {
    /// Whether this guess won the round.
    pub correct: bool,
    /// Wait before the next guess is accepted, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_ms: Option<u64>,
    /// Set when the round closed before this guess could win.
    #[serde(default)]
    pub round_concluded: bool,
}

impl GuessVerdict {
    /// Winning verdict.
    pub fn won() -> Self {
        Self { correct: true, cooldown_remaining_ms: None, round_concluded: true }
    }

    /// Wrong guess with the cooldown that now applies.
    pub fn wrong(cooldown: Duration) -> Self {
        Self {
            correct: false,
            cooldown_remaining_ms: Some(cooldown.num_milliseconds().max(0) as u64),
            round_concluded: false,
        }
    }

    /// Correct guess that lost the race to another winner.
    pub fn concluded() -> Self {
        Self { correct: false, cooldown_remaining_ms: None, round_concluded: true }
    }

    /// Remaining cooldown as a duration.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.cooldown_remaining_ms.map(|ms| Duration::milliseconds(ms as i64))
    }
}

/// Dependent record written when a round is won and paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinnerRecord {
    /// Round that was won.
    pub round_id: RoundId,
    /// Winner.
    pub participant_id: ParticipantId,
    /// Amount credited.
    pub amount: Amount,
    /// When the round was won.
    pub won_at: DateTime<Utc>,
}
