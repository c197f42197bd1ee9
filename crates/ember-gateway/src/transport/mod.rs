//! Connection transport
//!
//! The session layer consumes a duplex frame connection through the traits
//! here; `WebSocketTransport` is the production implementation. Tests plug
//! in an in-process transport.

mod websocket;

pub use websocket::WebSocketTransport;

use std::io::Read;

use async_trait::async_trait;
use thiserror::Error;

/// A single frame off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 JSON payload
    Text(String),
    /// zlib-compressed payload
    Binary(Vec<u8>),
}

/// Transport-level failures
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("failed to connect: {0}")]
    Connect(String),

    /// The peer closed the connection; abnormal closes carry a code
    #[error("connection closed (code: {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    /// Read or write failure on an established connection
    #[error("transport error: {0}")]
    Io(String),
}

/// Dials a gateway endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a duplex connection to the given URL
    async fn connect(&self, url: &str) -> Result<DuplexConnection, TransportError>;
}

/// Read half of a connection; exactly one reader runs per connection
#[async_trait]
pub trait FrameReader: Send {
    /// Wait for the next frame
    ///
    /// Returns `TransportError::Closed` when the peer sends a close frame,
    /// carrying the close code for the reconnect policy.
    async fn next_frame(&mut self) -> Result<Frame, TransportError>;
}

/// Write half of a connection
#[async_trait]
pub trait FrameWriter: Send {
    /// Send a text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame with the given code and reason
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// An opened duplex connection, split into its two halves
pub struct DuplexConnection {
    pub reader: Box<dyn FrameReader>,
    pub writer: Box<dyn FrameWriter>,
}

/// Inflate one zlib-compressed binary frame into its JSON text
pub fn inflate_frame(data: &[u8]) -> std::io::Result<String> {
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut text = String::new();
    decoder.read_to_string(&mut text)?;
    Ok(text)
}
