//! Gateway intents
//!
//! Intents select which event groups the service delivers over a session.
//! Some are privileged and must be enabled for the application upstream.

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

bitflags! {
    /// Gateway intent flags
    ///
    /// Sent as an integer in the Identify payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Intents: u64 {
        /// Guild create/update/delete and role/channel lifecycle
        const GUILDS                  = 1 << 0;
        /// Member add/update/remove and member chunk delivery (privileged)
        const GUILD_MEMBERS           = 1 << 1;
        /// Bans and moderation events
        const GUILD_MODERATION        = 1 << 2;
        /// Emoji and sticker updates
        const GUILD_EXPRESSIONS       = 1 << 3;
        /// Integration updates
        const GUILD_INTEGRATIONS      = 1 << 4;
        /// Webhook updates
        const GUILD_WEBHOOKS          = 1 << 5;
        /// Invite create/delete
        const GUILD_INVITES           = 1 << 6;
        /// Voice state updates
        const GUILD_VOICE_STATES      = 1 << 7;
        /// Presence updates (privileged)
        const GUILD_PRESENCES         = 1 << 8;
        /// Guild message create/update/delete
        const GUILD_MESSAGES          = 1 << 9;
        /// Guild message reactions
        const GUILD_MESSAGE_REACTIONS = 1 << 10;
        /// Guild typing notifications
        const GUILD_MESSAGE_TYPING    = 1 << 11;
        /// Direct message create/update/delete
        const DIRECT_MESSAGES         = 1 << 12;
        /// Direct message reactions
        const DIRECT_MESSAGE_REACTIONS = 1 << 13;
        /// Direct message typing notifications
        const DIRECT_MESSAGE_TYPING   = 1 << 14;

        /// Everything except privileged intents
        const UNPRIVILEGED = Self::GUILDS.bits()
            | Self::GUILD_MODERATION.bits()
            | Self::GUILD_EXPRESSIONS.bits()
            | Self::GUILD_INTEGRATIONS.bits()
            | Self::GUILD_WEBHOOKS.bits()
            | Self::GUILD_INVITES.bits()
            | Self::GUILD_VOICE_STATES.bits()
            | Self::GUILD_MESSAGES.bits()
            | Self::GUILD_MESSAGE_REACTIONS.bits()
            | Self::GUILD_MESSAGE_TYPING.bits()
            | Self::DIRECT_MESSAGES.bits()
            | Self::DIRECT_MESSAGE_REACTIONS.bits()
            | Self::DIRECT_MESSAGE_TYPING.bits();

        /// Privileged intents requiring upstream enablement
        const PRIVILEGED = Self::GUILD_MEMBERS.bits() | Self::GUILD_PRESENCES.bits();
    }
}

impl Intents {
    /// Check if all of the given intents are present
    #[inline]
    #[must_use]
    pub const fn has(&self, intents: Intents) -> bool {
        self.contains(intents)
    }

    /// Check if any of the given intents are missing
    #[inline]
    #[must_use]
    pub const fn missing(&self, intents: Intents) -> bool {
        !self.contains(intents)
    }

    /// Check if the set includes a privileged intent
    #[inline]
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        self.intersects(Self::PRIVILEGED)
    }
}

impl Default for Intents {
    fn default() -> Self {
        Self::UNPRIVILEGED
    }
}

impl fmt::Display for Intents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl Serialize for Intents {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de> Deserialize<'de> for Intents {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bits = u64::deserialize(deserializer)?;
        Ok(Intents::from_bits_truncate(bits))
    }
}
