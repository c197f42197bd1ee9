//! Member chunk correlation
//!
//! A member request is answered by the service as a series of
//! `GUILD_MEMBERS_CHUNK` dispatches tied together by a nonce. The chunker
//! owns the nonce → pending-request map, routes inbound chunks to their
//! caller, and retires requests on the final chunk or on cancellation.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ember_core::{Intents, Member, Snowflake};
use futures_util::Stream;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;

use crate::cache::MemberCache;
use crate::error::GatewayError;
use crate::protocol::{GuildMembersChunkPayload, OpCode, RequestGuildMembersPayload};
use crate::session::Shard;

/// Nonce length on the wire
const NONCE_LEN: usize = 32;

/// Predicate applied per member before delivery to the caller
pub type MemberPredicate = Arc<dyn Fn(&Member) -> bool + Send + Sync>;

/// Which members a request targets
#[derive(Clone)]
pub enum MemberSelector {
    /// Specific members by ID
    Ids(Vec<Snowflake>),
    /// Members whose username starts with `query`, up to `limit` (0 = all)
    Query { query: String, limit: u32 },
    /// Every member, filtered locally by the predicate
    Filter(MemberPredicate),
    /// Every member
    All,
}

impl MemberSelector {
    /// Select specific members by ID
    #[must_use]
    pub fn ids(ids: impl IntoIterator<Item = Snowflake>) -> Self {
        Self::Ids(ids.into_iter().collect())
    }

    /// Select members by username prefix
    #[must_use]
    pub fn query(query: impl Into<String>, limit: u32) -> Self {
        Self::Query {
            query: query.into(),
            limit,
        }
    }

    /// Select all members, delivering only those matching the predicate
    #[must_use]
    pub fn filter(predicate: impl Fn(&Member) -> bool + Send + Sync + 'static) -> Self {
        Self::Filter(Arc::new(predicate))
    }
}

impl std::fmt::Debug for MemberSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ids(ids) => f.debug_tuple("Ids").field(ids).finish(),
            Self::Query { query, limit } => f
                .debug_struct("Query")
                .field("query", query)
                .field("limit", limit)
                .finish(),
            Self::Filter(_) => f.write_str("Filter(..)"),
            Self::All => f.write_str("All"),
        }
    }
}

struct PendingRequest {
    guild_id: Snowflake,
    filter: Option<MemberPredicate>,
    tx: mpsc::UnboundedSender<Member>,
    chunks_received: u32,
    expected: Option<u32>,
}

/// Correlates member requests with their asynchronous chunk responses
pub struct MemberChunker {
    cache: Arc<dyn MemberCache>,
    pending: Arc<DashMap<String, PendingRequest>>,
}

impl MemberChunker {
    /// Create a chunker writing members through to the given cache
    #[must_use]
    pub fn new(cache: Arc<dyn MemberCache>) -> Self {
        Self {
            cache,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Request members as a lazy stream
    ///
    /// The `GUILD_MEMBERS` intent is required and checked before any frame
    /// is sent. Dropping the stream cancels the request and removes its
    /// correlation entry.
    pub async fn request_stream(
        &self,
        shard: &Shard,
        guild_id: Snowflake,
        selector: MemberSelector,
    ) -> Result<MemberStream, GatewayError> {
        if shard.intents().missing(Intents::GUILD_MEMBERS) {
            return Err(GatewayError::MissingIntent(Intents::GUILD_MEMBERS));
        }

        let (query, limit, user_ids, filter) = match selector {
            MemberSelector::Ids(ids) => (None, None, Some(ids), None),
            MemberSelector::Query { query, limit } => (Some(query), Some(limit), None, None),
            MemberSelector::Filter(predicate) => {
                (Some(String::new()), Some(0), None, Some(predicate))
            }
            MemberSelector::All => (Some(String::new()), Some(0), None, None),
        };

        let stream = self.register(guild_id, filter);

        let command = RequestGuildMembersPayload {
            guild_id,
            query,
            limit,
            presences: shard.intents().has(Intents::GUILD_PRESENCES),
            user_ids,
            nonce: stream.nonce().to_string(),
        };

        // an error here drops the stream, whose guard removes the entry
        shard
            .send(OpCode::RequestGuildMembers, serde_json::to_value(&command)?)
            .await?;

        Ok(stream)
    }

    /// Request members and gather the whole result
    ///
    /// Suspends until the final chunk arrives; dropping the future (caller
    /// timeout or cancellation) releases the pending entry.
    pub async fn request(
        &self,
        shard: &Shard,
        guild_id: Snowflake,
        selector: MemberSelector,
    ) -> Result<Vec<Member>, GatewayError> {
        let mut stream = self.request_stream(shard, guild_id, selector).await?;
        let mut members = Vec::new();
        while let Some(member) = stream.next_member().await {
            members.push(member);
        }
        Ok(members)
    }

    /// Route one `GUILD_MEMBERS_CHUNK` payload
    ///
    /// Chunks without a matching pending request are dropped silently;
    /// other consumers of the connection may still be interested in the
    /// raw dispatch.
    pub fn handle_chunk(&self, payload: &GuildMembersChunkPayload) {
        let Some(nonce) = payload.nonce.as_deref() else {
            tracing::trace!(guild_id = %payload.guild_id, "member chunk without nonce dropped");
            return;
        };

        let retire = {
            let Some(mut request) = self.pending.get_mut(nonce) else {
                tracing::trace!(nonce, "member chunk for unknown nonce dropped");
                return;
            };

            if request.guild_id != payload.guild_id {
                tracing::warn!(
                    nonce,
                    guild_id = %payload.guild_id,
                    expected = %request.guild_id,
                    "member chunk for wrong guild dropped"
                );
                return;
            }

            for member in &payload.members {
                // members always reach the cache, the filter only gates
                // delivery to the caller
                self.cache.put_member(payload.guild_id, member.user.id, member);
                if request.filter.as_ref().is_some_and(|filter| !filter(member)) {
                    continue;
                }
                // a closed receiver means the caller is gone; the entry is
                // removed when its guard drops
                let _ = request.tx.send(member.clone());
            }

            let expected = *request.expected.get_or_insert(payload.chunk_count);
            request.chunks_received += 1;
            request.chunks_received >= expected
        };

        if retire {
            self.pending.remove(nonce);
            tracing::debug!(nonce, guild_id = %payload.guild_id, "member request complete");
        }
    }

    /// Number of requests still awaiting chunks
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Register a pending request under a fresh nonce
    fn register(&self, guild_id: Snowflake, filter: Option<MemberPredicate>) -> MemberStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = PendingRequest {
            guild_id,
            filter,
            tx,
            chunks_received: 0,
            expected: None,
        };

        loop {
            let nonce: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(NONCE_LEN)
                .map(char::from)
                .collect();

            match self.pending.entry(nonce.clone()) {
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(request);
                    return MemberStream {
                        rx,
                        guard: ChunkGuard {
                            pending: Arc::clone(&self.pending),
                            nonce,
                        },
                    };
                }
            }
        }
    }
}

impl std::fmt::Debug for MemberChunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberChunker")
            .field("pending", &self.pending.len())
            .finish()
    }
}

/// Removes the correlation entry when the caller goes away
struct ChunkGuard {
    pending: Arc<DashMap<String, PendingRequest>>,
    nonce: String,
}

impl Drop for ChunkGuard {
    fn drop(&mut self) {
        if self.pending.remove(&self.nonce).is_some() {
            tracing::debug!(nonce = %self.nonce, "member request cancelled");
        }
    }
}

/// Lazy, finite stream of members answering one request
///
/// Closes once the final chunk arrives. Dropping the stream cancels the
/// request; chunks arriving afterwards are correlation misses.
pub struct MemberStream {
    rx: mpsc::UnboundedReceiver<Member>,
    guard: ChunkGuard,
}

impl MemberStream {
    /// The correlation nonce this request was sent with
    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.guard.nonce
    }

    /// Wait for the next member; `None` once the request completed
    pub async fn next_member(&mut self) -> Option<Member> {
        self.rx.recv().await
    }

    /// Cancel the request explicitly
    pub fn cancel(self) {
        // dropping self runs the guard
    }
}

impl Stream for MemberStream {
    type Item = Member;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for MemberStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberStream")
            .field("nonce", &self.guard.nonce)
            .finish()
    }
}
