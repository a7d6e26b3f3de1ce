//! One physical connection, from open to close.
//!
//! # Lifecycle
//!
//! ```text
//! connect ws://host:port/rpc ──► Connecting
//!        │
//!        ├─ credentials? ──► Authenticating ──► digest handshake
//!        │
//!        ▼
//!   Connected + on_connected()
//!        │
//!        ├─ no credentials: send Shelly.GetStatus (reply arrives as a push)
//!        ▼
//!   read loop ◄── select! { socket, outbound queue, heartbeat, shutdown }
//! ```
//!
//! Each heartbeat ping must be followed by some inbound frame within half a
//! heartbeat interval, otherwise the link is treated as dead and the session
//! ends with a transport error.
//!
//! # Frame routing
//!
//! 1. `id` matches a pending call → resolve it, nothing else.
//! 2. Known push method → `on_update` unchanged.
//! 3. Bare `result` with no pending id → `on_update` as `NotifyStatus`.
//!    This is how the initial status fetch (and the authenticated re-send
//!    of the auth probe) reaches observers.
//! 4. Anything else, including malformed JSON → logged and dropped.

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::auth::{self, AuthNegotiator};
use crate::codec::{self, FrameBody, Request};
use crate::config::ClientConfig;
use crate::constants::{
    AUTH_REQUIRED_CODE, CLOSE_TIMEOUT, METHOD_GET_STATUS, NOTIFY_STATUS, PUSH_METHODS,
};
use crate::correlator::RequestCorrelator;
use crate::error::RpcError;
use crate::observer::DeviceObserver;
use crate::state::{ConnectionState, SharedConnectionState};
use crate::ws::{self, WsMessage, WsReader, WsWriter};

/// Sender half of the live session's outbound queue.
///
/// Empty whenever no session is ready for traffic.
#[derive(Debug, Default)]
pub(crate) struct OutboundSlot {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

impl OutboundSlot {
    fn install(&self, tx: mpsc::UnboundedSender<String>) {
        *self.tx.lock().expect("OutboundSlot mutex poisoned") = Some(tx);
    }

    pub(crate) fn clear(&self) {
        self.tx.lock().expect("OutboundSlot mutex poisoned").take();
    }

    pub(crate) fn sender(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.tx.lock().expect("OutboundSlot mutex poisoned").clone()
    }
}

/// Everything a session shares with its supervisor.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) correlator: Arc<RequestCorrelator>,
    pub(crate) state: Arc<SharedConnectionState>,
    pub(crate) observer: Arc<dyn DeviceObserver>,
    pub(crate) outbound: Arc<OutboundSlot>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("endpoint", &self.config.endpoint)
            .finish_non_exhaustive()
    }
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The device sent a close frame.
    ClosedByPeer {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The stream ended without a close frame.
    StreamEnded,
    /// The client was stopped.
    Shutdown,
}

impl std::fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClosedByPeer { code, reason } => write!(f, "closed by device ({code}) {reason}"),
            Self::StreamEnded => write!(f, "stream ended"),
            Self::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// A single connection attempt.
#[derive(Debug)]
pub(crate) struct TransportSession {
    ctx: SessionContext,
    shutdown: CancellationToken,
}

impl TransportSession {
    pub(crate) fn new(ctx: SessionContext, shutdown: CancellationToken) -> Self {
        Self { ctx, shutdown }
    }

    /// Run the session to completion.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Transport`] on connect failure, handshake failure
    /// or any socket error.
    pub(crate) async fn run(self) -> Result<SessionEnd, RpcError> {
        let url = self.ctx.config.endpoint.url();
        log::debug!("[Session] Connecting to {}", url);

        let (mut writer, mut reader) = tokio::select! {
            () = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            result = ws::connect(&url) => result?,
        };
        log::info!("[Session] Connected to Shelly at {}", url);
        self.ctx.state.set(ConnectionState::Connecting).await;

        let result = self.drive(&mut writer, &mut reader).await;

        self.ctx.outbound.clear();
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::debug!("[Session] Close after session end: {}", e),
            Err(_elapsed) => log::debug!("[Session] Close did not complete, dropping socket"),
        }
        result
    }

    async fn drive(
        &self,
        writer: &mut WsWriter,
        reader: &mut WsReader,
    ) -> Result<SessionEnd, RpcError> {
        let config = &self.ctx.config;
        let credentials = config.endpoint.credentials();

        let passthrough = match &credentials {
            Some(creds) => {
                self.ctx.state.set(ConnectionState::Authenticating).await;
                let mut negotiator =
                    AuthNegotiator::new(creds, &config.endpoint.host, &config.client_id);
                tokio::select! {
                    () = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
                    result = auth::negotiate(
                        &mut negotiator,
                        &self.ctx.correlator,
                        writer,
                        reader,
                        config.timing.challenge_timeout,
                    ) => result?,
                }
            }
            None => None,
        };

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
        self.ctx.outbound.install(outbound_tx);
        self.ctx.state.set(ConnectionState::Connected).await;
        self.ctx.observer.on_connected();

        if credentials.is_none() {
            let id = self.ctx.correlator.next_id();
            let request = Request::new(id, &config.client_id, METHOD_GET_STATUS).encode();
            writer.send_text(&request).await?;
            log::debug!("[Session] Initial status fetch sent (id={})", id);
        }

        if let Some(raw) = passthrough {
            dispatch_text(&raw, &self.ctx.correlator, self.ctx.observer.as_ref());
        }

        let period = config.timing.heartbeat_interval;
        let pong_wait = period / 2;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Set when a ping goes out, cleared by any inbound frame.
        let mut pong_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => {
                    log::info!("[Session] Shutdown requested, closing connection");
                    return Ok(SessionEnd::Shutdown);
                }

                msg = reader.recv() => {
                    if matches!(msg, Some(Ok(_))) {
                        pong_deadline = None;
                    }
                    match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            dispatch_text(&text, &self.ctx.correlator, self.ctx.observer.as_ref());
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            writer.send_pong(data).await?;
                        }
                        Some(Ok(WsMessage::Pong(_))) => {
                            log::trace!("[Session] Heartbeat acknowledged");
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            log::debug!("[Session] Ignoring {}-byte binary frame", data.len());
                        }
                        Some(Ok(WsMessage::Close { code, reason })) => {
                            log::info!("[Session] Connection closed by device ({})", code);
                            return Ok(SessionEnd::ClosedByPeer { code, reason });
                        }
                        Some(Err(e)) => {
                            log::error!("[Session] WebSocket error: {}", e);
                            return Err(e);
                        }
                        None => {
                            log::debug!("[Session] WebSocket stream ended");
                            return Ok(SessionEnd::StreamEnded);
                        }
                    }
                }

                Some(request) = outbound_rx.recv() => {
                    log::trace!("[Session] Sending {}", codec::preview(&request));
                    writer.send_text(&request).await?;
                }

                () = tokio::time::sleep_until(pong_deadline.unwrap_or_else(Instant::now)),
                    if pong_deadline.is_some() =>
                {
                    log::warn!(
                        "[Session] No pong within {}ms, dropping dead connection",
                        pong_wait.as_millis()
                    );
                    return Err(RpcError::Transport("heartbeat timed out".to_string()));
                }

                _ = heartbeat.tick() => {
                    writer.send_ping().await?;
                    if pong_deadline.is_none() {
                        pong_deadline = Some(Instant::now() + pong_wait);
                    }
                    let swept = self.ctx.correlator.expire_overdue();
                    if swept > 0 {
                        log::debug!("[Session] Expired {} abandoned request(s)", swept);
                    }
                }
            }
        }
    }
}

/// Decode one text frame and route it.
pub(crate) fn dispatch_text(
    text: &str,
    correlator: &RequestCorrelator,
    observer: &dyn DeviceObserver,
) {
    let frame = match codec::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!("[Session] Discarding frame ({}): {}", e, codec::preview(text));
            return;
        }
    };
    log::debug!("[Session] WS message: {}", codec::preview(text));

    if let Some(id) = frame.id {
        if correlator.contains(id) {
            correlator.resolve(id, frame.into_outcome());
            return;
        }
    }

    match frame.body {
        FrameBody::Notification { method, params } if PUSH_METHODS.contains(&method.as_str()) => {
            observer.on_update(json!({ "method": method, "params": params }));
        }
        FrameBody::Notification { method, .. } => {
            log::debug!("[Session] Ignoring unsolicited method {}", method);
        }
        FrameBody::Result(result) => {
            observer.on_update(json!({ "method": NOTIFY_STATUS, "params": result }));
        }
        FrameBody::Error { code, message } if code == AUTH_REQUIRED_CODE => {
            log::warn!(
                "[Auth] Device rejected request with 401 ({}); check username and password",
                message
            );
        }
        FrameBody::Error { code, message } => {
            log::warn!("[Session] Unmatched error response {}: {}", code, message);
        }
        FrameBody::Unrecognized(_) => {
            log::trace!("[Session] Unhandled message: {}", codec::preview(text));
        }
    }
}
