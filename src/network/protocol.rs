//! Protocol Messages
//!
//! JSON wire format for the WebSocket gateway. Every message is an
//! internally tagged object: `{"type": "guess", "round_id": "...", ...}`.

use serde::{Deserialize, Serialize};

use crate::core::ids::{ParticipantId, RoundId};
use crate::engine::error::EngineError;
use crate::network::auth::AuthError;
use crate::round::events::RoundEvent;
use crate::round::state::{GuessVerdict, RoundSnapshot};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a bearer token.
    Auth {
        /// JWT from the identity provider.
        token: String,
    },

    /// Pay the fee and join a round.
    Register {
        /// Target round.
        round_id: RoundId,
    },

    /// Submit a full-secret guess.
    Guess {
        /// Target round.
        round_id: RoundId,
        /// Ordered tokens, separated by spaces or commas.
        submission: String,
    },

    /// Fetch the current view of a round.
    Snapshot {
        /// Target round.
        round_id: RoundId,
    },

    /// List scheduled and active rounds.
    ListRounds,

    /// Start receiving events for a round.
    Subscribe {
        /// Target round.
        round_id: RoundId,
    },

    /// Stop receiving events for a round.
    Unsubscribe {
        /// Target round.
        round_id: RoundId,
    },

    /// Latency check.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Result of an `auth` request.
    AuthResult(AuthResult),

    /// Round view, sent for `snapshot` and after `register`.
    Snapshot {
        /// Current view.
        round: RoundSnapshot,
    },

    /// Reply to `list_rounds`.
    Rounds {
        /// Open rounds.
        rounds: Vec<RoundSnapshot>,
    },

    /// Outcome of a guess.
    Verdict {
        /// Round guessed on.
        round_id: RoundId,
        /// Verdict.
        verdict: GuessVerdict,
    },

    /// Lifecycle event for a subscribed round.
    Event {
        /// The event.
        event: RoundEvent,
    },

    /// Subscription acknowledged.
    Subscribed {
        /// Round now subscribed.
        round_id: RoundId,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server time (Unix millis).
        server_time: u64,
    },

    /// Request failed.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Participant id if successful.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Milliseconds until a cooldown ends, for `on_cooldown`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ServerError {
    /// Error with no retry hint.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), retry_after_ms: None }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Request needs an authenticated connection.
    NotAuthenticated,
    /// Token past its expiry.
    TokenExpired,
    /// Token malformed or badly signed.
    InvalidToken,
    /// Message could not be parsed.
    InvalidInput,
    /// Unknown round.
    RoundNotFound,
    /// Round closed or not yet open.
    RoundNotActive,
    /// Already registered.
    AlreadyRegistered,
    /// Not registered.
    NotRegistered,
    /// Guess rate limit.
    OnCooldown,
    /// Wallet could not cover the fee.
    InsufficientFunds,
    /// Round already won.
    RoundAlreadyWon,
    /// Backend temporarily unavailable; retry later.
    Unavailable,
    /// Server at capacity.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

impl From<&EngineError> for ServerError {
    fn from(err: &EngineError) -> Self {
        let code = match err {
            EngineError::RoundNotFound(_) => ErrorCode::RoundNotFound,
            EngineError::RoundNotActive => ErrorCode::RoundNotActive,
            EngineError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            EngineError::NotRegistered => ErrorCode::NotRegistered,
            EngineError::OnCooldown { .. } => ErrorCode::OnCooldown,
            EngineError::InsufficientFunds => ErrorCode::InsufficientFunds,
            EngineError::ConcurrentWinnerConflict => ErrorCode::RoundAlreadyWon,
            EngineError::StoreUnavailable(_) | EngineError::WalletUnavailable(_) => ErrorCode::Unavailable,
            EngineError::InvalidRound(_) => ErrorCode::InvalidInput,
        };

        let retry_after_ms = match err {
            EngineError::OnCooldown { remaining } => Some(remaining.num_milliseconds().max(0) as u64),
            _ => None,
        };

        // Backend detail stays in the server log
        let message = if err.is_transient() {
            "temporarily unavailable, retry later".to_string()
        } else {
            err.to_string()
        };

        Self { code, message, retry_after_ms }
    }
}

impl From<&AuthError> for ServerError {
    fn from(err: &AuthError) -> Self {
        let code = match err {
            AuthError::Expired => ErrorCode::TokenExpired,
            AuthError::NotConfigured => ErrorCode::InternalError,
            AuthError::InvalidFormat | AuthError::InvalidSignature | AuthError::DecodeError(_) => {
                ErrorCode::InvalidToken
            }
            AuthError::InvalidIssuer | AuthError::InvalidAudience | AuthError::MissingClaim(_) => {
                ErrorCode::AuthFailed
            }
        };
        Self::new(code, err.to_string())
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Whether the message may be sent before authenticating.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            ClientMessage::Auth { .. }
                | ClientMessage::Ping { .. }
                | ClientMessage::Snapshot { .. }
                | ClientMessage::ListRounds
                | ClientMessage::Subscribe { .. }
                | ClientMessage::Unsubscribe { .. }
        )
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Shorthand for an error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError::new(code, message))
    }
}
