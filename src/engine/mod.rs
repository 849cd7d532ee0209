//! Round Engine
//!
//! Lifecycle operations over the round store plus the background ticker.
//!
//! ## Module Structure
//!
//! - `engine`: Register, tick, guess, snapshot
//! - `scheduler`: Periodic tick of every open round
//! - `error`: Engine error type

#[allow(clippy::module_inception)]
pub mod engine;
pub mod error;
pub mod scheduler;

pub use engine::{RoundEngine, TickOutcome, TickSummary};
pub use error::EngineError;
pub use scheduler::RoundScheduler;
