//! Payload definitions
//!
//! Structures for the handshake and command payloads the session layer
//! itself produces or consumes. Dispatch payloads outside that set are
//! forwarded raw.

use ember_core::{Intents, Member, OnlineStatus, Snowflake, User};
use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Client properties reported at Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "ember".to_string(),
            device: "ember".to_string(),
        }
    }
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token
    pub token: String,

    /// Client properties
    pub properties: ConnectionProperties,

    /// Whether the client accepts zlib-compressed payloads
    pub compress: bool,

    /// Member count above which a guild is considered large
    pub large_threshold: u32,

    /// `[shard_id, shard_count]`, present only when sharded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Requested gateway intents
    pub intents: Intents,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdatePayload>,
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// Payload for op 3 (Presence Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// Unix time (ms) the client went idle, if it did
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,

    /// New online status
    pub status: OnlineStatus,

    /// Whether the client is AFK
    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Create a presence update for the given status
    #[must_use]
    pub fn new(status: OnlineStatus) -> Self {
        Self {
            since: None,
            status,
            afk: false,
        }
    }

    /// Mark the client AFK since the given unix millisecond timestamp
    #[must_use]
    pub fn afk_since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self.afk = true;
        self
    }
}

/// Payload for op 4 (Voice State Update)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateUpdatePayload {
    pub guild_id: Snowflake,

    /// Channel to join, or `None` to disconnect from voice
    pub channel_id: Option<Snowflake>,

    pub self_mute: bool,
    pub self_deaf: bool,
}

/// Payload for op 8 (Request Guild Members)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestGuildMembersPayload {
    pub guild_id: Snowflake,

    /// Username prefix filter; empty string matches everyone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Maximum members to return; 0 means no limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Include presence data with each member
    pub presences: bool,

    /// Specific member IDs to fetch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<Snowflake>>,

    /// Correlation token echoed back in each chunk
    pub nonce: String,
}

/// One page of a `GUILD_MEMBERS_CHUNK` dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildMembersChunkPayload {
    pub guild_id: Snowflake,

    #[serde(default)]
    pub members: Vec<Member>,

    /// Zero-based index of this chunk
    pub chunk_index: u32,

    /// Total number of chunks for the request
    pub chunk_count: u32,

    /// Correlation token from the originating request
    #[serde(default)]
    pub nonce: Option<String>,
}

/// A guild reference in the Ready payload; full state follows later
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnavailableGuild {
    pub id: Snowflake,

    #[serde(default)]
    pub unavailable: bool,
}

/// Payload of the READY dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway version the server settled on
    pub v: u8,

    /// The authenticated user
    pub user: User,

    /// Session token used for resuming
    pub session_id: String,

    /// `[shard_id, shard_count]` echo, present only when sharded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u32; 2]>,

    /// Guilds the session belongs to, all initially unavailable
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

/// Minimal view of guild lifecycle dispatches (`GUILD_CREATE`/`GUILD_DELETE`)
///
/// Only the fields the availability tracker needs; the rest of the payload
/// is forwarded raw to the event sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildLifecyclePayload {
    pub id: Snowflake,

    /// Set on GUILD_DELETE when the guild went down rather than being left
    #[serde(default)]
    pub unavailable: bool,
}
