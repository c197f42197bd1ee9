//! Test helpers for gateway integration tests
//!
//! `TestTransport` accepts connections from a shard under test; each accept
//! yields a `ServerHandle` the test drives like the remote service.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ember_gateway::{
    DuplexConnection, EventSink, Frame, FrameReader, FrameWriter, Shard, ShardStatus, Transport,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

/// Deadline for any single expectation in a test
const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// In-process transport; every `connect` hands the test a `ServerHandle`
pub struct TestTransport {
    accepts: mpsc::UnboundedSender<ServerHandle>,
}

/// Create a transport and the stream of server handles it accepts
pub fn test_transport() -> (Arc<TestTransport>, mpsc::UnboundedReceiver<ServerHandle>) {
    let (accepts, accepted) = mpsc::unbounded_channel();
    (Arc::new(TestTransport { accepts }), accepted)
}

#[async_trait]
impl Transport for TestTransport {
    async fn connect(&self, _url: &str) -> Result<DuplexConnection, TransportError> {
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();

        let handle = ServerHandle {
            to_client,
            from_client,
        };
        self.accepts
            .send(handle)
            .map_err(|_| TransportError::Connect("test harness dropped".to_string()))?;

        Ok(DuplexConnection {
            reader: Box::new(TestReader { rx: from_server }),
            writer: Box::new(TestWriter { tx: to_server }),
        })
    }
}

/// Frame observed on the client-to-server direction
#[derive(Debug)]
pub enum ClientFrame {
    Text(String),
    Close { code: u16, reason: String },
}

struct TestReader {
    rx: mpsc::UnboundedReceiver<Result<Frame, TransportError>>,
}

#[async_trait]
impl FrameReader for TestReader {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        match self.rx.recv().await {
            Some(frame) => frame,
            None => Err(TransportError::Closed {
                code: None,
                reason: "server dropped".to_string(),
            }),
        }
    }
}

struct TestWriter {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl FrameWriter for TestWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(ClientFrame::Text(text))
            .map_err(|_| TransportError::Io("server gone".to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let _ = self.tx.send(ClientFrame::Close {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// The service's side of one accepted connection
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl ServerHandle {
    /// Push a JSON frame to the client
    pub fn send_json(&self, value: &Value) {
        let _ = self.to_client.send(Ok(Frame::Text(value.to_string())));
    }

    /// Push a raw text frame, valid JSON or not
    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(Frame::Text(text.to_string())));
    }

    /// Push a zlib-compressed binary frame
    pub fn send_zlib(&self, value: &Value) {
        use std::io::Write;
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(value.to_string().as_bytes())
            .expect("zlib write failed");
        let compressed = encoder.finish().expect("zlib finish failed");
        let _ = self.to_client.send(Ok(Frame::Binary(compressed)));
    }

    /// Send the Hello frame (op 10)
    pub fn hello(&self, heartbeat_interval_ms: u64) {
        self.send_json(&json!({
            "op": 10,
            "d": { "heartbeat_interval": heartbeat_interval_ms }
        }));
    }

    /// Send a Dispatch frame (op 0)
    pub fn dispatch(&self, event_type: &str, sequence: u64, data: Value) {
        self.send_json(&json!({ "op": 0, "t": event_type, "s": sequence, "d": data }));
    }

    /// Send a Heartbeat ACK (op 11)
    pub fn heartbeat_ack(&self) {
        self.send_json(&json!({ "op": 11 }));
    }

    /// Send a READY dispatch with the given unavailable guilds
    pub fn ready(&self, sequence: u64, session_id: &str, guild_ids: &[u64]) {
        let guilds: Vec<Value> = guild_ids
            .iter()
            .map(|id| json!({ "id": id.to_string(), "unavailable": true }))
            .collect();
        self.dispatch(
            "READY",
            sequence,
            json!({
                "v": 10,
                "user": { "id": "1", "username": "bot" },
                "session_id": session_id,
                "guilds": guilds
            }),
        );
    }

    /// Terminate the connection with a close code, as the service would
    pub fn close_with(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Err(TransportError::Closed {
            code: Some(code),
            reason: reason.to_string(),
        }));
    }

    /// Receive the next client frame
    pub async fn next_client_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(EXPECT_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client hung up")
    }

    /// Receive a frame with the given opcode
    ///
    /// Heartbeats arriving in between are acknowledged and skipped, so a
    /// test never zombies its own session by ignoring them.
    pub async fn expect_op(&mut self, op: u64) -> Value {
        loop {
            let frame = match self.next_client_frame().await {
                ClientFrame::Text(text) => {
                    serde_json::from_str::<Value>(&text).expect("client sent invalid JSON")
                }
                ClientFrame::Close { code, .. } => {
                    panic!("expected op {op}, client closed with {code}")
                }
            };
            let got = frame["op"].as_u64().expect("frame without op");
            if got == 1 && op != 1 {
                self.heartbeat_ack();
                continue;
            }
            assert_eq!(got, op, "unexpected client frame: {frame}");
            return frame;
        }
    }

    /// Receive a close frame, skipping (without acknowledging) heartbeats
    pub async fn expect_close(&mut self) -> (u16, String) {
        loop {
            match self.next_client_frame().await {
                ClientFrame::Close { code, reason } => return (code, reason),
                ClientFrame::Text(text) => {
                    let frame: Value =
                        serde_json::from_str(&text).expect("client sent invalid JSON");
                    assert_eq!(
                        frame["op"].as_u64(),
                        Some(1),
                        "expected close or heartbeat, got: {frame}"
                    );
                }
            }
        }
    }
}

/// Wait for the next accepted connection
pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerHandle>) -> ServerHandle {
    tokio::time::timeout(EXPECT_TIMEOUT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("transport dropped")
}

/// Poll until the shard reaches the given status
pub async fn wait_for_status(shard: &Shard, status: ShardStatus) {
    wait_until(|| shard.status() == status).await;
}

/// Poll a condition until it holds
pub async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(EXPECT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// One event as seen by the sink
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event_type: String,
    pub sequence: u64,
    pub shard_id: u32,
    pub payload: Value,
}

/// Sink collecting every forwarded dispatch
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingSink {
    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Event type names in delivery order
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn handle(&self, event_type: &str, sequence: u64, shard_id: u32, payload: &Value) {
        self.events.lock().push(RecordedEvent {
            event_type: event_type.to_string(),
            sequence,
            shard_id,
            payload: payload.clone(),
        });
    }
}
