//! Gateway error types

use ember_core::Intents;
use thiserror::Error;

use crate::session::ShardStatus;
use crate::transport::TransportError;

/// Errors surfaced by the gateway session layer
#[derive(Debug, Error)]
pub enum GatewayError {
    /// `open()` called while a connection is already established
    #[error("gateway is already connected")]
    AlreadyConnected,

    /// No live connection behind this shard
    #[error("shard is not connected")]
    NotConnected,

    /// Application command issued outside the Ready state
    #[error("shard is not ready for commands (status: {0})")]
    NotReady(ShardStatus),

    /// Transport-level failure (connect, read, write)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload could not be encoded or decoded
    #[error("failed to encode or decode gateway payload: {0}")]
    Decode(#[from] serde_json::Error),

    /// Operation requires a gateway intent the session was not opened with
    #[error("missing required gateway intent: {0}")]
    MissingIntent(Intents),

    /// Command rate limiter was closed while waiting for a slot
    #[error("command rate limiter is closed")]
    RateLimiterClosed,

    /// The service rejected the credentials; never retried
    #[error("authentication failed (close code {code})")]
    AuthenticationFailed { code: u16 },

    /// The service closed the session with a code that forbids retrying
    #[error("fatal close code {code}: {reason}")]
    FatalClose { code: u16, reason: String },

    /// Reconnect attempts exhausted
    #[error("reconnect failed after {attempts} attempts (last close code: {last_close:?})")]
    ReconnectFailed {
        attempts: u32,
        last_close: Option<u16>,
    },

    /// A member request was cancelled by the caller; distinct from failure
    #[error("member request cancelled")]
    RequestCancelled,
}

impl GatewayError {
    /// Whether the error is terminal for the session (never retried)
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. }
                | Self::FatalClose { .. }
                | Self::ReconnectFailed { .. }
        )
    }
}
