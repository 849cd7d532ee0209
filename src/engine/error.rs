//! Engine Errors

use chrono::Duration;

use crate::core::ids::RoundId;
use crate::store::StoreError;
use crate::wallet::WalletError;

/// Errors returned by round engine operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// No round with this id.
    #[error("round {0} not found")]
    RoundNotFound(RoundId),

    /// Round is not accepting registrations or guesses.
    #[error("round is not active")]
    RoundNotActive,

    /// Participant already paid for this round.
    #[error("already registered")]
    AlreadyRegistered,

    /// Participant never registered for this round.
    #[error("not registered for this round")]
    NotRegistered,

    /// Participant must wait before guessing again.
    #[error("on cooldown for {}s", .remaining.num_seconds())]
    OnCooldown {
        /// Time left until the next guess is accepted.
        remaining: Duration,
    },

    /// Wallet could not cover the fee.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Another participant won the round first.
    #[error("round already won by another participant")]
    ConcurrentWinnerConflict,

    /// Transient store failure.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Transient wallet failure.
    #[error("wallet unavailable: {0}")]
    WalletUnavailable(String),

    /// Round parameters rejected at creation.
    #[error("invalid round: {0}")]
    InvalidRound(String),
}

impl EngineError {
    /// Whether a caller may retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_) | EngineError::WalletUnavailable(_))
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::RoundNotFound(id),
            StoreError::Duplicate(id) => EngineError::InvalidRound(format!("round {} already exists", id)),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

impl From<WalletError> for EngineError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::InsufficientFunds { .. } => EngineError::InsufficientFunds,
            WalletError::Unavailable(msg) => EngineError::WalletUnavailable(msg),
        }
    }
}
