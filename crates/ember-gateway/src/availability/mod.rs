//! Guild availability tracking
//!
//! After a (re)connect the Ready payload only names the session's guilds;
//! their full state arrives later as individual GUILD_CREATE dispatches.
//! The tracker records which guilds are still pending that population and
//! which the service has flagged as unavailable (outage).
//!
//! A guild id is never in both sets: whichever signal arrives later wins.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use ember_core::Snowflake;
use tokio::sync::watch;

use crate::cache::MemberCache;

/// Tracks pending and unavailable guilds across shards
pub struct GuildTracker {
    cache: Arc<dyn MemberCache>,

    /// Guilds reported at Ready but not yet populated, per shard
    pending: DashMap<u32, HashSet<Snowflake>>,

    /// Guilds the service has flagged as unavailable
    unavailable: DashSet<Snowflake>,

    /// Revision counter bumped on every effective change
    revision: watch::Sender<u64>,
}

impl GuildTracker {
    /// Create a tracker evicting through the given cache
    #[must_use]
    pub fn new(cache: Arc<dyn MemberCache>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            cache,
            pending: DashMap::new(),
            unavailable: DashSet::new(),
            revision,
        }
    }

    /// Record a guild as awaiting full-state population on a shard
    pub fn mark_pending(&self, shard_id: u32, guild_id: Snowflake) {
        let left_unavailable = self.unavailable.remove(&guild_id).is_some();
        let inserted = self.pending.entry(shard_id).or_default().insert(guild_id);
        if inserted || left_unavailable {
            tracing::trace!(shard = shard_id, guild_id = %guild_id, "guild pending");
            self.bump();
        }
    }

    /// Record a guild as fully populated on a shard
    pub fn mark_ready(&self, shard_id: u32, guild_id: Snowflake) {
        let was_pending = self
            .pending
            .get_mut(&shard_id)
            .is_some_and(|mut set| set.remove(&guild_id));
        let left_unavailable = self.unavailable.remove(&guild_id).is_some();
        if was_pending || left_unavailable {
            tracing::trace!(shard = shard_id, guild_id = %guild_id, "guild ready");
            self.bump();
        }
    }

    /// Flag a guild as unavailable and evict its cached members
    ///
    /// Idempotent: eviction fires only on the transition into the set.
    pub fn mark_unavailable(&self, guild_id: Snowflake) {
        let mut changed = false;
        for mut entry in self.pending.iter_mut() {
            changed |= entry.value_mut().remove(&guild_id);
        }
        if self.unavailable.insert(guild_id) {
            changed = true;
            tracing::debug!(guild_id = %guild_id, "guild unavailable, evicting members");
            self.cache.evict_guild(guild_id);
        }
        if changed {
            self.bump();
        }
    }

    /// Clear a guild's unavailable flag
    pub fn mark_available(&self, guild_id: Snowflake) {
        if self.unavailable.remove(&guild_id).is_some() {
            tracing::trace!(guild_id = %guild_id, "guild available");
            self.bump();
        }
    }

    /// Forget a guild entirely (the session left it)
    pub fn forget(&self, guild_id: Snowflake) {
        let mut changed = self.unavailable.remove(&guild_id).is_some();
        for mut entry in self.pending.iter_mut() {
            changed |= entry.value_mut().remove(&guild_id);
        }
        if changed {
            self.bump();
        }
    }

    /// Guilds still awaiting population on a shard
    #[must_use]
    pub fn pending(&self, shard_id: u32) -> Vec<Snowflake> {
        self.pending
            .get(&shard_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Guilds currently flagged unavailable
    #[must_use]
    pub fn unavailable(&self) -> Vec<Snowflake> {
        self.unavailable.iter().map(|id| *id).collect()
    }

    /// Check if a guild is pending population on a shard
    #[must_use]
    pub fn is_pending(&self, shard_id: u32, guild_id: Snowflake) -> bool {
        self.pending
            .get(&shard_id)
            .is_some_and(|set| set.contains(&guild_id))
    }

    /// Check if a guild is flagged unavailable
    #[must_use]
    pub fn is_unavailable(&self, guild_id: Snowflake) -> bool {
        self.unavailable.contains(&guild_id)
    }

    /// Subscribe to change notifications
    ///
    /// The receiver yields a revision counter; poll the queries after each
    /// change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

impl std::fmt::Debug for GuildTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuildTracker")
            .field("pending_shards", &self.pending.len())
            .field("unavailable", &self.unavailable.len())
            .finish()
    }
}
