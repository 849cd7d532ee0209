//! Round Events
//!
//! Published by the engine after every committed transition. The gateway
//! forwards them to subscribed clients; nothing in the engine reads them back.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::ids::{ParticipantId, RoundId};
use crate::round::state::{Amount, DrawCategory};

/// A slot that became public.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedSlot {
    /// 1-based slot index.
    pub slot: usize,
    /// Disclosed token.
    pub token: String,
}

/// Round lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Round was created.
    RoundCreated {
        /// New round.
        round_id: RoundId,
        /// Draw category.
        category: DrawCategory,
        /// Opening time.
        start_time: DateTime<Utc>,
        /// Closing time.
        end_time: DateTime<Utc>,
        /// Number of secret slots.
        slot_count: usize,
    },

    /// Round opened for registration.
    RoundActivated {
        /// Round that opened.
        round_id: RoundId,
        /// Activation time.
        at: DateTime<Utc>,
    },

    /// Slots were disclosed.
    SlotsRevealed {
        /// Round disclosing.
        round_id: RoundId,
        /// Newly public slots, ascending.
        slots: Vec<RevealedSlot>,
    },

    /// A participant paid the fee and joined.
    ParticipantRegistered {
        /// Round joined.
        round_id: RoundId,
        /// New participant.
        participant_id: ParticipantId,
        /// Prize after the fee was added.
        prize_pool: Amount,
        /// Participant count including this one.
        participant_count: usize,
    },

    /// A wrong guess put a participant on cooldown.
    GuessRejected {
        /// Round guessed on.
        round_id: RoundId,
        /// Guesser.
        participant_id: ParticipantId,
        /// End of the cooldown.
        next_allowed_at: DateTime<Utc>,
    },

    /// The round was won.
    RoundWon {
        /// Round won.
        round_id: RoundId,
        /// Winner.
        winner_id: ParticipantId,
        /// Amount credited.
        prize: Amount,
        /// Time of the winning guess.
        won_at: DateTime<Utc>,
    },

    /// The round ran out of time with no winner.
    RoundExpired {
        /// Round that expired.
        round_id: RoundId,
        /// Closing time.
        at: DateTime<Utc>,
    },
}

impl RoundEvent {
    /// Round the event belongs to.
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundCreated { round_id, .. }
            | RoundEvent::RoundActivated { round_id, .. }
            | RoundEvent::SlotsRevealed { round_id, .. }
            | RoundEvent::ParticipantRegistered { round_id, .. }
            | RoundEvent::GuessRejected { round_id, .. }
            | RoundEvent::RoundWon { round_id, .. }
            | RoundEvent::RoundExpired { round_id, .. } => *round_id,
        }
    }

    /// Whether the event ends the round.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RoundEvent::RoundWon { .. } | RoundEvent::RoundExpired { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = RoundEvent::RoundActivated {
            round_id: RoundId::from_bytes([1; 16]),
            at: DateTime::<Utc>::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "round_activated");
        assert!(!event.is_terminal());
    }

    #[test]
    fn test_round_id_accessor() {
        let round_id = RoundId::from_bytes([2; 16]);
        let event = RoundEvent::RoundExpired { round_id, at: DateTime::<Utc>::UNIX_EPOCH };
        assert_eq!(event.round_id(), round_id);
        assert!(event.is_terminal());
    }
}
