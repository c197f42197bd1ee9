//! WebSocket transport backed by tokio-tungstenite

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{DuplexConnection, Frame, FrameReader, FrameWriter, Transport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport dialing real gateway endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<DuplexConnection, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (sink, stream) = stream.split();

        Ok(DuplexConnection {
            reader: Box::new(WebSocketReader { stream }),
            writer: Box::new(WebSocketWriter { sink }),
        })
    }
}

struct WebSocketReader {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl FrameReader for WebSocketReader {
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        loop {
            let message = match self.stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Err(map_ws_error(err)),
                None => {
                    return Err(TransportError::Closed {
                        code: None,
                        reason: "connection closed".to_string(),
                    })
                }
            };

            match message {
                Message::Text(text) => return Ok(Frame::Text(text)),
                Message::Binary(data) => return Ok(Frame::Binary(data)),
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return Err(TransportError::Closed { code, reason });
                }
                // control frames are handled by the protocol layer below us
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}

struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameWriter for WebSocketWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: WsCloseCode::from(code),
            reason: reason.to_string().into(),
        };
        match self.sink.send(Message::Close(Some(frame))).await {
            // a close race with the peer is not an error
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(err) => Err(map_ws_error(err)),
        }
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed {
            code: None,
            reason: "connection closed".to_string(),
        },
        other => TransportError::Io(other.to_string()),
    }
}
