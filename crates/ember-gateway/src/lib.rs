//! # ember-gateway
//!
//! Session layer for the real-time event gateway: the per-shard connection
//! state machine (handshake, heartbeat, reconnect/resume), the rate-limited
//! command path, member-chunk correlation, and guild availability tracking.

pub mod availability;
pub mod cache;
pub mod chunking;
pub mod config;
pub mod error;
pub mod events;
pub mod protocol;
pub mod ratelimit;
pub mod session;
pub mod transport;

// Re-export the primary surface at crate root
pub use availability::GuildTracker;
pub use cache::{InMemoryMemberCache, MemberCache};
pub use chunking::{MemberChunker, MemberPredicate, MemberSelector, MemberStream};
pub use config::{CloseHandler, GatewayConfig};
pub use error::GatewayError;
pub use events::{EventSink, EventType};
pub use ratelimit::{CommandLimiter, CommandPermit};
pub use session::{Shard, ShardStatus};
pub use transport::{
    DuplexConnection, Frame, FrameReader, FrameWriter, Transport, TransportError,
    WebSocketTransport,
};
