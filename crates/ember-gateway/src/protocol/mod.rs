//! Gateway wire protocol
//!
//! Opcodes, close codes, the message envelope, and the payload structures
//! the session layer itself encodes and decodes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::{classify_close_code, CloseAction, CloseCode};
pub use messages::GatewayMessage;
pub use opcodes::OpCode;
pub use payloads::{
    ConnectionProperties, GuildLifecyclePayload, GuildMembersChunkPayload, HelloPayload,
    IdentifyPayload, PresenceUpdatePayload, ReadyPayload, RequestGuildMembersPayload,
    ResumePayload, UnavailableGuild, VoiceStateUpdatePayload,
};

/// Gateway protocol version negotiated in the connection URL
pub const VERSION: u8 = 10;

/// Standard close code for a graceful shutdown
pub const CLOSE_NORMAL: u16 = 1000;
/// Standard close code for an endpoint going away
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Standard close code used when tearing down to reconnect
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
