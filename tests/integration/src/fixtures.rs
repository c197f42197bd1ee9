//! Wire payload fixtures

use serde_json::{json, Value};

/// A member payload for the given user id
pub fn member_json(id: u64) -> Value {
    json!({
        "user": { "id": id.to_string(), "username": format!("user-{id}") },
        "roles": [],
        "joined_at": "2024-06-01T12:00:00Z"
    })
}

/// A GUILD_MEMBERS_CHUNK dispatch payload
pub fn chunk_json(
    guild_id: u64,
    nonce: &str,
    ids: &[u64],
    chunk_index: u32,
    chunk_count: u32,
) -> Value {
    json!({
        "guild_id": guild_id.to_string(),
        "members": ids.iter().map(|id| member_json(*id)).collect::<Vec<_>>(),
        "chunk_index": chunk_index,
        "chunk_count": chunk_count,
        "nonce": nonce
    })
}
