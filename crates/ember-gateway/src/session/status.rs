//! Shard lifecycle status

use serde::{Deserialize, Serialize};

/// Lifecycle status of a shard's session
///
/// A healthy connection walks `Unconnected → Connecting → WaitingForHello →
/// Identifying | Resuming → WaitingForReady → Ready`; `Disconnected` is
/// terminal from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardStatus {
    /// No connection has been opened yet
    Unconnected,
    /// Dialing the gateway endpoint
    Connecting,
    /// Connected, waiting for the server's Hello frame
    WaitingForHello,
    /// Hello received, Identify being sent (no prior session)
    Identifying,
    /// Hello received, Resume being sent (stored session)
    Resuming,
    /// Identify/Resume sent, waiting for Ready/Resumed
    WaitingForReady,
    /// Session established; application commands permitted
    Ready,
    /// Closed by the user or given up after exhausted retries
    Disconnected,
}

impl ShardStatus {
    /// Whether a connection attempt or session is in flight
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Unconnected | Self::Disconnected)
    }

    /// Whether application commands are accepted
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Get the name of this status
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unconnected => "Unconnected",
            Self::Connecting => "Connecting",
            Self::WaitingForHello => "WaitingForHello",
            Self::Identifying => "Identifying",
            Self::Resuming => "Resuming",
            Self::WaitingForReady => "WaitingForReady",
            Self::Ready => "Ready",
            Self::Disconnected => "Disconnected",
        }
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
