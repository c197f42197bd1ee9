//! The shard state machine
//!
//! A `Shard` is a cheap-to-clone handle to one gateway session. Exactly one
//! reader task and one heartbeat task run per connection; both funnel their
//! frames through the rate-limited outbound channel. Every torn-down
//! connection bumps a generation counter, so tasks belonging to a replaced
//! connection can never act on the session again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ember_core::{Intents, Member, Snowflake};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::availability::GuildTracker;
use crate::cache::MemberCache;
use crate::chunking::{MemberChunker, MemberSelector, MemberStream};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::events::{EventSink, EventType};
use crate::protocol::{
    classify_close_code, CloseAction, CloseCode, GatewayMessage, GuildLifecyclePayload,
    GuildMembersChunkPayload, IdentifyPayload, OpCode, PresenceUpdatePayload, ReadyPayload,
    ResumePayload, VoiceStateUpdatePayload, CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_SERVICE_RESTART,
    VERSION,
};
use crate::ratelimit::CommandLimiter;
use crate::session::ShardStatus;
use crate::transport::{self, Frame, FrameReader, FrameWriter, Transport, TransportError};

/// Handle to one gateway session
///
/// Clones share the same underlying session.
#[derive(Clone)]
pub struct Shard {
    inner: Arc<ShardInner>,
}

struct ShardInner {
    config: GatewayConfig,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn EventSink>,
    limiter: Arc<CommandLimiter>,
    chunker: Arc<MemberChunker>,
    guilds: Arc<GuildTracker>,

    /// Live connection handle; `None` while disconnected
    conn: tokio::sync::Mutex<Option<ConnHandle>>,

    /// Bumped on every connect and teardown; tasks carry the value they
    /// were spawned with and stand down once it goes stale
    generation: AtomicU64,

    status: RwLock<ShardStatus>,
    session: Mutex<SessionState>,
    heartbeat: Mutex<HeartbeatState>,

    /// Most recent abnormal close code, kept for diagnostics
    last_close: Mutex<Option<u16>>,
}

struct ConnHandle {
    outbound: mpsc::UnboundedSender<Outbound>,
    generation: u64,
}

enum Outbound {
    Frame(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    sequence: Option<u64>,
}

#[derive(Debug, Default)]
struct HeartbeatState {
    interval: Option<Duration>,
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
}

impl Shard {
    /// Create a shard with its own rate limiter, chunker, and tracker
    #[must_use]
    pub fn new(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        cache: Arc<dyn MemberCache>,
    ) -> Self {
        let limiter = Arc::new(CommandLimiter::new(
            config.commands_per_window,
            config.command_window,
        ));
        let chunker = Arc::new(MemberChunker::new(Arc::clone(&cache)));
        let guilds = Arc::new(GuildTracker::new(cache));
        Self::with_shared(config, transport, sink, limiter, chunker, guilds)
    }

    /// Create a shard sharing components with other shards
    ///
    /// A shared limiter yields one global command budget; a shared chunker
    /// and tracker give one view over all shards' guilds.
    #[must_use]
    pub fn with_shared(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn EventSink>,
        limiter: Arc<CommandLimiter>,
        chunker: Arc<MemberChunker>,
        guilds: Arc<GuildTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(ShardInner {
                config,
                transport,
                sink,
                limiter,
                chunker,
                guilds,
                conn: tokio::sync::Mutex::new(None),
                generation: AtomicU64::new(0),
                status: RwLock::new(ShardStatus::Unconnected),
                session: Mutex::new(SessionState::default()),
                heartbeat: Mutex::new(HeartbeatState::default()),
                last_close: Mutex::new(None),
            }),
        }
    }

    /// Open the gateway connection and start the handshake
    ///
    /// Returns `AlreadyConnected` if a connection exists. On transport
    /// failure the shard stays `Unconnected` and the error is returned.
    pub async fn open(&self) -> Result<(), GatewayError> {
        ShardInner::open(&self.inner).await
    }

    /// Close the connection gracefully, clearing the stored session
    pub async fn close(&self) {
        self.close_with_code(CLOSE_NORMAL, "shutting down").await;
    }

    /// Close the connection with a specific close code
    ///
    /// Graceful codes (1000/1001) clear the stored session token and
    /// sequence; any other code preserves them for a later resume.
    pub async fn close_with_code(&self, code: u16, reason: &str) {
        self.inner
            .teardown(None, Some((code, reason.to_string())))
            .await;
        self.inner.limiter.close();
        self.inner.set_status(ShardStatus::Disconnected);
    }

    /// Send an application command
    ///
    /// Rejected with `NotReady` unless the session is `Ready`.
    pub async fn send(&self, op: OpCode, data: Value) -> Result<(), GatewayError> {
        let status = self.status();
        if !status.is_ready() {
            return Err(GatewayError::NotReady(status));
        }
        self.inner.send_command(op, data).await
    }

    /// Update the client's presence
    pub async fn update_presence(
        &self,
        presence: PresenceUpdatePayload,
    ) -> Result<(), GatewayError> {
        self.send(OpCode::PresenceUpdate, serde_json::to_value(&presence)?)
            .await
    }

    /// Join, move, or leave a voice channel
    pub async fn update_voice_state(
        &self,
        voice_state: VoiceStateUpdatePayload,
    ) -> Result<(), GatewayError> {
        self.send(OpCode::VoiceStateUpdate, serde_json::to_value(&voice_state)?)
            .await
    }

    /// Request guild members, gathering the full result
    ///
    /// Suspends until the final chunk; dropping the future cancels the
    /// request and releases its correlation entry.
    pub async fn request_members(
        &self,
        guild_id: Snowflake,
        selector: MemberSelector,
    ) -> Result<Vec<Member>, GatewayError> {
        let chunker = Arc::clone(&self.inner.chunker);
        chunker.request(self, guild_id, selector).await
    }

    /// Request guild members as a lazy stream
    pub async fn request_members_stream(
        &self,
        guild_id: Snowflake,
        selector: MemberSelector,
    ) -> Result<MemberStream, GatewayError> {
        let chunker = Arc::clone(&self.inner.chunker);
        chunker.request_stream(self, guild_id, selector).await
    }

    /// Current lifecycle status
    #[must_use]
    pub fn status(&self) -> ShardStatus {
        *self.inner.status.read()
    }

    /// Heartbeat round-trip time of the latest acknowledged beat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        let heartbeat = self.inner.heartbeat.lock();
        match (heartbeat.last_sent, heartbeat.last_ack) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }

    /// This shard's index
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.inner.config.shard_id
    }

    /// Total shard count
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.inner.config.shard_count
    }

    /// Intents the session was configured with
    #[must_use]
    pub fn intents(&self) -> Intents {
        self.inner.config.intents
    }

    /// Stored resumable session token, if any
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.lock().session_id.clone()
    }

    /// Last received dispatch sequence, if any
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.inner.session.lock().sequence
    }

    /// The guild availability tracker backing this shard
    #[must_use]
    pub fn guild_tracker(&self) -> Arc<GuildTracker> {
        Arc::clone(&self.inner.guilds)
    }

    /// The member chunker backing this shard
    #[must_use]
    pub fn chunker(&self) -> Arc<MemberChunker> {
        Arc::clone(&self.inner.chunker)
    }

    /// The outbound command limiter backing this shard
    #[must_use]
    pub fn limiter(&self) -> Arc<CommandLimiter> {
        Arc::clone(&self.inner.limiter)
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("shard_id", &self.inner.config.shard_id)
            .field("status", &self.status())
            .finish()
    }
}

impl ShardInner {
    async fn open(this: &Arc<Self>) -> Result<(), GatewayError> {
        let mut conn = this.conn.lock().await;
        if conn.is_some() {
            return Err(GatewayError::AlreadyConnected);
        }
        this.set_status(ShardStatus::Connecting);

        let url = format!("{}/?v={VERSION}&encoding=json", this.config.url);
        tracing::debug!(shard = this.config.shard_id, url = %url, "opening gateway connection");

        let connection = match this.transport.connect(&url).await {
            Ok(connection) => connection,
            Err(err) => {
                this.set_status(ShardStatus::Unconnected);
                tracing::error!(
                    shard = this.config.shard_id,
                    error = %err,
                    "error connecting to the gateway"
                );
                return Err(err.into());
            }
        };

        let generation = this.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // fresh connection, fresh budget and heartbeat bookkeeping
        this.limiter.reset();
        *this.heartbeat.lock() = HeartbeatState::default();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        *conn = Some(ConnHandle {
            outbound,
            generation,
        });
        this.set_status(ShardStatus::WaitingForHello);

        tokio::spawn(Self::run_writer(
            connection.writer,
            outbound_rx,
            this.config.shard_id,
        ));
        tokio::spawn(Self::run_reader(
            Arc::clone(this),
            connection.reader,
            generation,
        ));

        Ok(())
    }

    /// Take down the current connection
    ///
    /// With `generation` set, only tears down if that connection is still
    /// the live one, so a task belonging to a replaced connection cannot
    /// kill its successor, and a reconnect cannot revive a session the
    /// user closed. Returns whether a teardown actually happened.
    async fn teardown(&self, generation: Option<u64>, close: Option<(u16, String)>) -> bool {
        let mut conn = self.conn.lock().await;
        let current = match (conn.as_ref(), generation) {
            (Some(handle), Some(generation)) => handle.generation == generation,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !current {
            return false;
        }
        let Some(handle) = conn.take() else {
            return false;
        };
        self.generation.fetch_add(1, Ordering::SeqCst);

        if let Some((code, reason)) = close {
            if code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY {
                // graceful close: the session is not coming back
                self.clear_session();
            }
            tracing::debug!(
                shard = self.config.shard_id,
                code,
                reason = %reason,
                "closing gateway connection"
            );
            let _ = handle.outbound.send(Outbound::Close { code, reason });
        }
        true
    }

    fn set_status(&self, status: ShardStatus) {
        tracing::trace!(shard = self.config.shard_id, status = %status, "status change");
        *self.status.write() = status;
    }

    fn clear_session(&self) {
        let mut session = self.session.lock();
        session.session_id = None;
        session.sequence = None;
        tracing::debug!(shard = self.config.shard_id, "cleared stored session state");
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn notify_close(&self, err: &GatewayError) {
        if let Some(handler) = &self.config.on_close {
            handler(err);
        }
    }

    async fn send_command(&self, op: OpCode, data: Value) -> Result<(), GatewayError> {
        let message = GatewayMessage::command(op, data);
        let text = message.to_json()?;
        self.send_frame(op, text).await
    }

    /// Reserve a command slot, then hand the frame to the writer task
    async fn send_frame(&self, op: OpCode, text: String) -> Result<(), GatewayError> {
        let permit = self.limiter.acquire().await?;
        let conn = self.conn.lock().await;
        let Some(handle) = conn.as_ref() else {
            return Err(GatewayError::NotConnected);
        };
        tracing::trace!(shard = self.config.shard_id, op = %op, "sending gateway command");
        handle
            .outbound
            .send(Outbound::Frame(text))
            .map_err(|_| GatewayError::NotConnected)?;
        drop(permit);
        Ok(())
    }

    async fn run_writer(
        mut writer: Box<dyn FrameWriter>,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        shard_id: u32,
    ) {
        while let Some(frame) = outbound.recv().await {
            match frame {
                Outbound::Frame(text) => {
                    if let Err(err) = writer.send_text(text).await {
                        tracing::warn!(shard = shard_id, error = %err, "failed to write frame");
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = writer.close(code, &reason).await;
                    break;
                }
            }
        }
        tracing::trace!(shard = shard_id, "writer task exiting");
    }

    async fn run_reader(this: Arc<Self>, mut reader: Box<dyn FrameReader>, generation: u64) {
        loop {
            match reader.next_frame().await {
                Ok(Frame::Text(text)) => Self::handle_frame(&this, generation, &text).await,
                Ok(Frame::Binary(data)) => match transport::inflate_frame(&data) {
                    Ok(text) => Self::handle_frame(&this, generation, &text).await,
                    Err(err) => tracing::error!(
                        shard = this.config.shard_id,
                        error = %err,
                        "failed to inflate binary frame, skipping"
                    ),
                },
                Err(err) => {
                    Self::handle_read_error(&this, generation, err).await;
                    break;
                }
            }
        }
        tracing::trace!(shard = this.config.shard_id, "reader task exiting");
    }

    async fn handle_frame(this: &Arc<Self>, generation: u64, text: &str) {
        match GatewayMessage::from_json(text) {
            Ok(message) => Self::handle_message(this, generation, message).await,
            // protocol error: drop the frame, the session continues
            Err(err) => tracing::warn!(
                shard = this.config.shard_id,
                error = %err,
                "failed to decode gateway frame, skipping"
            ),
        }
    }

    async fn handle_message(this: &Arc<Self>, generation: u64, message: GatewayMessage) {
        match message.op {
            OpCode::Hello => {
                let Some(hello) = message.as_hello() else {
                    tracing::warn!(
                        shard = this.config.shard_id,
                        "malformed Hello payload, skipping"
                    );
                    return;
                };
                let interval = Duration::from_millis(hello.heartbeat_interval);
                {
                    let mut heartbeat = this.heartbeat.lock();
                    heartbeat.interval = Some(interval);
                    heartbeat.last_sent = None;
                    heartbeat.last_ack = Some(Instant::now());
                }
                tokio::spawn(Self::run_heartbeat(Arc::clone(this), generation, interval));

                let resumable = {
                    let session = this.session.lock();
                    session.session_id.is_some() && session.sequence.is_some()
                };
                if resumable {
                    this.resume().await;
                } else {
                    this.identify().await;
                }
            }

            OpCode::Dispatch => this.handle_dispatch(message),

            OpCode::Heartbeat => {
                tracing::debug!(shard = this.config.shard_id, "heartbeat requested by server");
                Self::send_heartbeat(this, generation).await;
            }

            OpCode::HeartbeatAck => {
                this.heartbeat.lock().last_ack = Some(Instant::now());
                tracing::trace!(shard = this.config.shard_id, "heartbeat acknowledged");
            }

            OpCode::Reconnect => {
                tracing::debug!(shard = this.config.shard_id, "server requested reconnect");
                Self::force_reconnect(this, generation, "received reconnect").await;
            }

            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                tracing::debug!(
                    shard = this.config.shard_id,
                    resumable,
                    "session invalidated by server"
                );
                // a non-resumable invalidation closes gracefully, which
                // also clears the stored session
                let code = if resumable {
                    CLOSE_SERVICE_RESTART
                } else {
                    CLOSE_NORMAL
                };
                if this
                    .teardown(Some(generation), Some((code, "invalid session".to_string())))
                    .await
                {
                    this.set_status(ShardStatus::Connecting);
                    Self::spawn_reconnect(this);
                }
            }

            other => tracing::warn!(
                shard = this.config.shard_id,
                op = %other,
                "unexpected opcode from server, skipping"
            ),
        }
    }

    fn handle_dispatch(&self, message: GatewayMessage) {
        let (Some(event_type), Some(sequence)) = (message.t, message.s) else {
            tracing::warn!(
                shard = self.config.shard_id,
                "dispatch frame without event type or sequence, skipping"
            );
            return;
        };

        {
            let mut session = self.session.lock();
            if session.sequence.map_or(true, |current| sequence > current) {
                session.sequence = Some(sequence);
            }
        }

        let data = message.d.unwrap_or(Value::Null);

        match EventType::from_str(&event_type) {
            Some(EventType::Ready) => match serde_json::from_value::<ReadyPayload>(data.clone()) {
                Ok(ready) => {
                    self.session.lock().session_id = Some(ready.session_id.clone());
                    for guild in &ready.guilds {
                        self.guilds.mark_pending(self.config.shard_id, guild.id);
                    }
                    self.set_status(ShardStatus::Ready);
                    tracing::debug!(
                        shard = self.config.shard_id,
                        session_id = %ready.session_id,
                        guilds = ready.guilds.len(),
                        "ready event received"
                    );
                }
                Err(err) => tracing::error!(
                    shard = self.config.shard_id,
                    error = %err,
                    "error parsing ready event"
                ),
            },

            Some(EventType::Resumed) => {
                self.set_status(ShardStatus::Ready);
                tracing::debug!(shard = self.config.shard_id, "session resumed");
            }

            Some(EventType::GuildMembersChunk) => {
                match serde_json::from_value::<GuildMembersChunkPayload>(data.clone()) {
                    Ok(chunk) => self.chunker.handle_chunk(&chunk),
                    Err(err) => tracing::warn!(
                        shard = self.config.shard_id,
                        error = %err,
                        "error parsing member chunk event"
                    ),
                }
            }

            Some(EventType::GuildCreate) => {
                if let Ok(guild) = serde_json::from_value::<GuildLifecyclePayload>(data.clone()) {
                    self.guilds.mark_ready(self.config.shard_id, guild.id);
                }
            }

            Some(EventType::GuildDelete) => {
                if let Ok(guild) = serde_json::from_value::<GuildLifecyclePayload>(data.clone()) {
                    if guild.unavailable {
                        self.guilds.mark_unavailable(guild.id);
                    } else {
                        self.guilds.forget(guild.id);
                    }
                }
            }

            _ => {}
        }

        self.sink
            .handle(&event_type, sequence, self.config.shard_id, &data);
    }

    async fn identify(&self) {
        self.set_status(ShardStatus::Identifying);
        tracing::debug!(shard = self.config.shard_id, "sending Identify command");

        let config = &self.config;
        let payload = IdentifyPayload {
            token: config.token.clone(),
            properties: config.properties.clone(),
            compress: config.compress,
            large_threshold: config.large_threshold,
            shard: (config.shard_count > 1).then(|| [config.shard_id, config.shard_count]),
            intents: config.intents,
            presence: config.presence.clone(),
        };

        match serde_json::to_value(&payload) {
            Ok(data) => {
                if let Err(err) = self.send_command(OpCode::Identify, data).await {
                    tracing::error!(
                        shard = self.config.shard_id,
                        error = %err,
                        "error sending Identify command"
                    );
                }
            }
            Err(err) => tracing::error!(
                shard = self.config.shard_id,
                error = %err,
                "error encoding Identify command"
            ),
        }
        self.set_status(ShardStatus::WaitingForReady);
    }

    async fn resume(&self) {
        let stored = {
            let session = self.session.lock();
            session.session_id.clone().zip(session.sequence)
        };
        let Some((session_id, seq)) = stored else {
            tracing::warn!(
                shard = self.config.shard_id,
                "resume requested without a stored session, identifying instead"
            );
            self.identify().await;
            return;
        };

        self.set_status(ShardStatus::Resuming);
        tracing::debug!(
            shard = self.config.shard_id,
            session_id = %session_id,
            seq,
            "sending Resume command"
        );

        let payload = ResumePayload {
            token: self.config.token.clone(),
            session_id,
            seq,
        };
        match serde_json::to_value(&payload) {
            Ok(data) => {
                if let Err(err) = self.send_command(OpCode::Resume, data).await {
                    tracing::error!(
                        shard = self.config.shard_id,
                        error = %err,
                        "error sending Resume command"
                    );
                }
            }
            Err(err) => tracing::error!(
                shard = self.config.shard_id,
                error = %err,
                "error encoding Resume command"
            ),
        }
        self.set_status(ShardStatus::WaitingForReady);
    }

    async fn run_heartbeat(this: Arc<Self>, generation: u64, interval: Duration) {
        tracing::debug!(
            shard = this.config.shard_id,
            interval_ms = interval.as_millis() as u64,
            "starting heartbeat loop"
        );

        // first beat lands at a random point inside the interval so a mass
        // reconnect does not align every session's heartbeat
        tokio::time::sleep(interval.mul_f64(rand::random::<f64>())).await;

        loop {
            if !this.is_current(generation) {
                tracing::trace!(shard = this.config.shard_id, "heartbeat loop exiting");
                return;
            }

            let acked = {
                let heartbeat = this.heartbeat.lock();
                match (heartbeat.last_sent, heartbeat.last_ack) {
                    (Some(sent), Some(ack)) => ack >= sent,
                    (Some(_), None) => false,
                    (None, _) => true,
                }
            };
            if !acked {
                tracing::warn!(
                    shard = this.config.shard_id,
                    "heartbeat ack missed, forcing reconnect"
                );
                Self::force_reconnect(&this, generation, "heartbeat ack timeout").await;
                return;
            }

            if !Self::send_heartbeat(&this, generation).await {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Send one heartbeat; returns whether the loop should keep running
    async fn send_heartbeat(this: &Arc<Self>, generation: u64) -> bool {
        let sequence = this.session.lock().sequence;
        let message = GatewayMessage::heartbeat(sequence);
        let text = match message.to_json() {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(
                    shard = this.config.shard_id,
                    error = %err,
                    "error encoding heartbeat"
                );
                return true;
            }
        };

        tracing::trace!(shard = this.config.shard_id, seq = ?sequence, "sending heartbeat");
        match this.send_frame(OpCode::Heartbeat, text).await {
            Ok(()) => {
                this.heartbeat.lock().last_sent = Some(Instant::now());
                true
            }
            // the connection is already gone; its teardown path owns recovery
            Err(GatewayError::NotConnected | GatewayError::RateLimiterClosed) => false,
            Err(err) => {
                tracing::error!(
                    shard = this.config.shard_id,
                    error = %err,
                    "failed to send heartbeat, forcing reconnect"
                );
                Self::force_reconnect(this, generation, "heartbeat send failure").await;
                false
            }
        }
    }

    async fn force_reconnect(this: &Arc<Self>, generation: u64, reason: &str) {
        if this
            .teardown(
                Some(generation),
                Some((CLOSE_SERVICE_RESTART, reason.to_string())),
            )
            .await
        {
            this.set_status(ShardStatus::Connecting);
            Self::spawn_reconnect(this);
        }
    }

    fn spawn_reconnect(this: &Arc<Self>) {
        tokio::spawn(Self::reconnect(Arc::clone(this)));
    }

    /// Bounded reconnect loop with linear backoff (`attempt * base_delay`)
    async fn reconnect(this: Arc<Self>) {
        let base_delay = this.config.reconnect_base_delay;
        let mut attempt: u32 = 0;
        loop {
            if attempt >= this.config.max_reconnect_attempts {
                let last_close = *this.last_close.lock();
                let err = GatewayError::ReconnectFailed {
                    attempts: attempt,
                    last_close,
                };
                tracing::error!(shard = this.config.shard_id, error = %err, "giving up on reconnect");
                this.set_status(ShardStatus::Disconnected);
                this.notify_close(&err);
                return;
            }

            tokio::time::sleep(base_delay * attempt).await;
            tracing::debug!(shard = this.config.shard_id, attempt, "reconnecting gateway");

            match Self::open(&this).await {
                Ok(()) | Err(GatewayError::AlreadyConnected) => return,
                Err(err) => {
                    tracing::error!(
                        shard = this.config.shard_id,
                        attempt,
                        error = %err,
                        "failed to reconnect gateway"
                    );
                    attempt += 1;
                }
            }
        }
    }

    async fn handle_read_error(this: &Arc<Self>, generation: u64, err: TransportError) {
        let close_code = match &err {
            TransportError::Closed { code, .. } => *code,
            _ => None,
        };
        if let Some(code) = close_code {
            *this.last_close.lock() = Some(code);
        }

        if !this.teardown(Some(generation), None).await {
            // the user closed or replaced this connection; nothing to do
            tracing::trace!(shard = this.config.shard_id, "stale connection ended");
            return;
        }

        if close_code.and_then(CloseCode::from_u16) == Some(CloseCode::DisallowedIntents) {
            tracing::error!(
                shard = this.config.shard_id,
                intents = %this.config.intents,
                "privileged gateway intents are not enabled for this application"
            );
        }

        match close_code.map_or(CloseAction::Resume, classify_close_code) {
            CloseAction::Fatal => {
                let code = close_code.unwrap_or_default();
                let gateway_err = if code == CloseCode::AuthenticationFailed.as_u16() {
                    GatewayError::AuthenticationFailed { code }
                } else {
                    GatewayError::FatalClose {
                        code,
                        reason: err.to_string(),
                    }
                };
                tracing::error!(
                    shard = this.config.shard_id,
                    error = %gateway_err,
                    "gateway closed with a fatal code"
                );
                this.set_status(ShardStatus::Disconnected);
                this.notify_close(&gateway_err);
            }
            action => {
                if action == CloseAction::Reidentify {
                    // the session is invalid upstream; clear before any
                    // reconnect attempt so we identify instead of resuming
                    this.clear_session();
                }
                tracing::warn!(
                    shard = this.config.shard_id,
                    code = ?close_code,
                    error = %err,
                    reconnect = this.config.auto_reconnect,
                    "gateway connection lost"
                );
                if this.config.auto_reconnect {
                    this.set_status(ShardStatus::Connecting);
                    Self::spawn_reconnect(this);
                } else {
                    this.set_status(ShardStatus::Disconnected);
                    this.notify_close(&GatewayError::Transport(err));
                }
            }
        }
    }
}
