//! Gateway configuration
//!
//! Library configuration passed to each shard; values mirror the knobs the
//! service exposes plus local reconnect and rate-limit policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ember_core::Intents;

use crate::error::GatewayError;
use crate::protocol::{ConnectionProperties, PresenceUpdatePayload};

/// Callback invoked when the session will not recover on its own
/// (fatal close code, reconnect attempts exhausted, auto-reconnect off).
pub type CloseHandler = Arc<dyn Fn(&GatewayError) + Send + Sync>;

/// Configuration for a gateway shard
#[derive(Clone)]
pub struct GatewayConfig {
    /// Gateway endpoint, without version/encoding query parameters
    pub url: String,
    /// Authentication token sent in Identify/Resume
    pub token: String,
    /// This shard's index
    pub shard_id: u32,
    /// Total shard count
    pub shard_count: u32,
    /// Gateway intents requested at Identify
    pub intents: Intents,
    /// Request zlib-compressed payloads
    pub compress: bool,
    /// Member count above which a guild is considered large
    pub large_threshold: u32,
    /// Reconnect automatically on recoverable closes
    pub auto_reconnect: bool,
    /// Give up after this many consecutive failed reconnect attempts
    pub max_reconnect_attempts: u32,
    /// Base delay for linear reconnect backoff (`attempt * base`)
    pub reconnect_base_delay: Duration,
    /// Outbound command budget per window
    pub commands_per_window: u32,
    /// Rolling command window length
    pub command_window: Duration,
    /// Client properties reported at Identify
    pub properties: ConnectionProperties,
    /// Initial presence sent with Identify
    pub presence: Option<PresenceUpdatePayload>,
    /// Terminal-close callback
    pub on_close: Option<CloseHandler>,
}

impl GatewayConfig {
    /// Upstream command budget: 120 commands per 60 second window
    pub const DEFAULT_COMMANDS_PER_WINDOW: u32 = 120;
    /// Default rolling window length
    pub const DEFAULT_COMMAND_WINDOW: Duration = Duration::from_secs(60);

    /// Create a configuration for the given token with default settings
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            url: default_url(),
            token: token.into(),
            shard_id: 0,
            shard_count: 1,
            intents: Intents::default(),
            compress: false,
            large_threshold: default_large_threshold(),
            auto_reconnect: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay: Duration::from_secs(1),
            commands_per_window: Self::DEFAULT_COMMANDS_PER_WINDOW,
            command_window: Self::DEFAULT_COMMAND_WINDOW,
            properties: ConnectionProperties::default(),
            presence: None,
            on_close: None,
        }
    }

    /// Set the gateway endpoint
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set shard index and total shard count
    #[must_use]
    pub fn with_shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard_id = shard_id;
        self.shard_count = shard_count.max(1);
        self
    }

    /// Set the gateway intents
    #[must_use]
    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    /// Enable or disable automatic reconnects
    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set reconnect policy (attempt cap and linear backoff base)
    #[must_use]
    pub fn with_reconnect_policy(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_base_delay = base_delay;
        self
    }

    /// Set the outbound command budget
    #[must_use]
    pub fn with_command_budget(mut self, commands: u32, window: Duration) -> Self {
        self.commands_per_window = commands;
        self.command_window = window;
        self
    }

    /// Set the initial presence sent with Identify
    #[must_use]
    pub fn with_presence(mut self, presence: PresenceUpdatePayload) -> Self {
        self.presence = Some(presence);
        self
    }

    /// Set the terminal-close callback
    #[must_use]
    pub fn with_close_handler(mut self, handler: CloseHandler) -> Self {
        self.on_close = Some(handler);
        self
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("url", &self.url)
            .field("shard_id", &self.shard_id)
            .field("shard_count", &self.shard_count)
            .field("intents", &self.intents)
            .field("compress", &self.compress)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .finish_non_exhaustive()
    }
}

// Default value functions

fn default_url() -> String {
    "wss://gateway.ember.chat".to_string()
}

fn default_large_threshold() -> u32 {
    50
}

fn default_max_reconnect_attempts() -> u32 {
    10
}
