//! # Mystery Round Server
//!
//! Time-boxed puzzle rounds for the prize-draw storefront. Participants pay
//! to join a round, the server discloses the secret's tokens one slot at a
//! time on a fixed cadence, and the first participant to submit the whole
//! ordered secret wins the prize pool.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   MYSTERY ROUND SERVER                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── clock.rs    - Clock trait, recurring task helper        │
//! │  ├── ids.rs      - Round and participant ids                 │
//! │  └── hash.rs     - Secret commitments, id derivation         │
//! │                                                              │
//! │  round/          - Pure round logic (no I/O)                 │
//! │  ├── state.rs    - Round record, snapshots, verdicts         │
//! │  ├── schedule.rs - Derived reveal timetable                  │
//! │  ├── guess.rs    - Submission normalization                  │
//! │  └── events.rs   - Lifecycle events                          │
//! │                                                              │
//! │  store/          - Round persistence (status CAS)            │
//! │  wallet/         - Fee debit and prize credit                │
//! │                                                              │
//! │  engine/         - Lifecycle orchestration                   │
//! │  ├── engine.rs   - Register, tick, guess, snapshot           │
//! │  └── scheduler.rs- Periodic tick of open rounds              │
//! │                                                              │
//! │  retention/      - Per-category pruning of completed rounds  │
//! │  config.rs       - Env-driven configuration                  │
//! │                                                              │
//! │  network/        - WebSocket gateway                         │
//! │  ├── server.rs   - Connection handling, event fan-out        │
//! │  ├── protocol.rs - Message types                             │
//! │  └── auth.rs     - JWT validation                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! - The store is the only holder of round state. The engine re-reads on
//!   every call and writes through a compare-and-swap on round status.
//! - At most one participant ever wins a round.
//! - Revealed slots only grow, and a round reaches `Completed` exactly once.
//! - The reveal schedule is a pure function of the round's times and slot
//!   count. It is recomputed, never stored.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod network;
pub mod retention;
pub mod round;
pub mod store;
pub mod wallet;

// Re-export commonly used types
pub use config::{AppConfig, EngineConfig, RetentionConfig};
pub use core::clock::{Clock, ManualClock, SystemClock};
pub use core::ids::{ParticipantId, RoundId};
pub use engine::{EngineError, RoundEngine, RoundScheduler};
pub use retention::RetentionSweeper;
pub use round::state::{DrawCategory, GuessVerdict, NewRound, RoundSnapshot, RoundStatus};
pub use store::{InMemoryStore, RoundStore};
pub use wallet::{InMemoryWallet, Wallet};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
