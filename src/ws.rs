//! Device socket.
//!
//! Wraps `tokio-tungstenite` so the rest of the crate sees two halves, a
//! [`WsWriter`] for text/heartbeat frames and a [`WsReader`] yielding
//! [`WsMessage`]s, with every failure already mapped to
//! [`RpcError::Transport`]. Both halves can sit in one `tokio::select!`.

// Rust guideline compliant 2026-02

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::constants::RPC_PATH;
use crate::error::RpcError;

type DeviceStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the device closes without one.
const NO_STATUS_CODE: u16 = 1005;

/// Inbound socket frame.
#[derive(Debug)]
pub enum WsMessage {
    /// JSON-RPC text.
    Text(String),
    /// Binary payload (the device never sends these).
    Binary(Vec<u8>),
    /// Ping; answer with [`WsWriter::send_pong`].
    Ping(Vec<u8>),
    /// Reply to our heartbeat.
    Pong(Vec<u8>),
    /// Device closed the socket.
    Close {
        /// Close code, 1005 when the device sent none.
        code: u16,
        /// Close reason, often empty.
        reason: String,
    },
}

fn send_failed(what: &str, e: &tokio_tungstenite::tungstenite::Error) -> RpcError {
    RpcError::Transport(format!("{what} failed: {e}"))
}

/// Outbound half.
#[derive(Debug)]
pub struct WsWriter {
    sink: SplitSink<DeviceStream, Message>,
    closed: bool,
}

impl WsWriter {
    /// Send one encoded request.
    pub async fn send_text(&mut self, text: &str) -> Result<(), RpcError> {
        self.sink
            .send(Message::Text(text.to_owned()))
            .await
            .map_err(|e| send_failed("send", &e))
    }

    /// Heartbeat ping with an empty payload.
    pub async fn send_ping(&mut self) -> Result<(), RpcError> {
        self.sink
            .send(Message::Ping(Vec::new()))
            .await
            .map_err(|e| send_failed("heartbeat", &e))
    }

    /// Echo a device ping.
    pub async fn send_pong(&mut self, payload: Vec<u8>) -> Result<(), RpcError> {
        self.sink
            .send(Message::Pong(payload))
            .await
            .map_err(|e| send_failed("pong", &e))
    }

    /// Close the socket. A second call is a no-op.
    pub async fn close(&mut self) -> Result<(), RpcError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.sink.close().await.map_err(|e| send_failed("close", &e))
    }

    /// Whether [`Self::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Inbound half.
#[derive(Debug)]
pub struct WsReader {
    stream: SplitStream<DeviceStream>,
}

impl WsReader {
    /// Next frame, or `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Option<Result<WsMessage, RpcError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(RpcError::Transport(format!("read failed: {e}")))),
            };
            let frame = match message {
                Message::Text(text) => WsMessage::Text(text),
                Message::Binary(data) => WsMessage::Binary(data),
                Message::Ping(data) => WsMessage::Ping(data),
                Message::Pong(data) => WsMessage::Pong(data),
                Message::Close(frame) => match frame {
                    Some(frame) => WsMessage::Close {
                        code: frame.code.into(),
                        reason: frame.reason.into_owned(),
                    },
                    None => WsMessage::Close {
                        code: NO_STATUS_CODE,
                        reason: String::new(),
                    },
                },
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

/// Open a socket to `url` and split it.
///
/// # Errors
///
/// [`RpcError::Transport`] if the URL is malformed, the TCP connect fails or
/// the upgrade is refused.
pub async fn connect(url: &str) -> Result<(WsWriter, WsReader), RpcError> {
    let request = url
        .into_client_request()
        .map_err(|e| RpcError::Transport(format!("invalid device URL {url}: {e}")))?;

    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| RpcError::Transport(format!("connect to {url} failed: {e}")))?;

    let (sink, stream) = stream.split();
    Ok((WsWriter { sink, closed: false }, WsReader { stream }))
}

/// Device RPC URL, `ws://host:port/rpc`.
#[must_use]
pub fn rpc_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}{RPC_PATH}")
}
