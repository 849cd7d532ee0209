//! Core primitives.
//!
//! Identifiers, the clock abstraction, and commitment hashing.
//! Nothing here touches the store or the wallet.

pub mod clock;
pub mod hash;
pub mod ids;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock, schedule_recurring};
pub use hash::{Commitment, commit_secret, participant_id_from_subject};
pub use ids::{ParticipantId, RoundId};
