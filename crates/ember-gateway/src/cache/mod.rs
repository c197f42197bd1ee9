//! Member cache seam
//!
//! Chunk delivery writes every member through to the cache regardless of
//! caller filters; availability tracking evicts a guild's members when the
//! service marks it unavailable.

use std::collections::HashMap;

use dashmap::DashMap;
use ember_core::{Member, Snowflake};

/// Write-through sink for member records
pub trait MemberCache: Send + Sync {
    /// Store or replace a member record
    fn put_member(&self, guild_id: Snowflake, user_id: Snowflake, member: &Member);

    /// Drop all cached members for a guild (guild became unavailable)
    fn evict_guild(&self, guild_id: Snowflake);
}

/// In-memory member cache keyed by guild
#[derive(Debug, Default)]
pub struct InMemoryMemberCache {
    members: DashMap<Snowflake, HashMap<Snowflake, Member>>,
}

impl InMemoryMemberCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached member
    pub fn member(&self, guild_id: Snowflake, user_id: Snowflake) -> Option<Member> {
        self.members
            .get(&guild_id)
            .and_then(|guild| guild.get(&user_id).cloned())
    }

    /// All cached members of a guild
    pub fn guild_members(&self, guild_id: Snowflake) -> Vec<Member> {
        self.members
            .get(&guild_id)
            .map(|guild| guild.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of cached members for a guild
    pub fn guild_len(&self, guild_id: Snowflake) -> usize {
        self.members.get(&guild_id).map_or(0, |guild| guild.len())
    }
}

impl MemberCache for InMemoryMemberCache {
    fn put_member(&self, guild_id: Snowflake, user_id: Snowflake, member: &Member) {
        self.members
            .entry(guild_id)
            .or_default()
            .insert(user_id, member.clone());
    }

    fn evict_guild(&self, guild_id: Snowflake) {
        if self.members.remove(&guild_id).is_some() {
            tracing::debug!(guild_id = %guild_id, "evicted guild members from cache");
        }
    }
}
