//! Network Layer
//!
//! WebSocket gateway in front of the round engine. Nothing here holds round
//! state; every request goes through the engine.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, TokenClaims, validate_token};
pub use protocol::{AuthResult, ClientMessage, ErrorCode, ServerError, ServerMessage};
pub use server::{GatewayError, RoundServer, ServerConfig};
