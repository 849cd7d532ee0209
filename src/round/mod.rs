//! Round Model
//!
//! Pure round logic: the record, its reveal schedule, guess normalization,
//! and lifecycle events. No I/O happens here.
//!
//! ## Module Structure
//!
//! - `state`: Round record, snapshots, verdicts
//! - `schedule`: Derived reveal timetable
//! - `guess`: Submission normalization and matching
//! - `events`: Lifecycle events for subscribers

pub mod events;
pub mod guess;
pub mod schedule;
pub mod state;

// Re-export key types
pub use events::{RevealedSlot, RoundEvent};
pub use schedule::{RevealEvent, RevealPolicy, RevealSchedule};
pub use state::{
    Amount, DrawCategory, GuessVerdict, NewRound, Round, RoundSnapshot, RoundStatus, WinnerRecord,
};
