//! Supervised, self-healing device connection.
//!
//! [`ShellyClient`] owns a background task that runs one
//! [`TransportSession`] after another, pausing a fixed interval between
//! attempts. Callers use [`ShellyClient::call`] for request/response traffic;
//! push notifications and connect/disconnect transitions go to the
//! [`DeviceObserver`] given at construction.
//!
//! # Architecture
//!
//! ```text
//!   ShellyClient::call()                 supervisor task
//!         │                                    │
//!         │ register(id) ─► RequestCorrelator  │ loop {
//!         │ encode ─► outbound queue ────────► │   TransportSession::run()
//!         │                                    │   ─► Disconnected (+ on_disconnected)
//!         │ ◄── resolve(id) ────── read loop   │   fail pending, sleep
//!         ▼                                    │ }
//!     Result<Value, RpcError>                  ▼
//! ```

// Rust guideline compliant 2026-02

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::Request;
use crate::config::ClientConfig;
use crate::correlator::RequestCorrelator;
use crate::error::RpcError;
use crate::observer::DeviceObserver;
use crate::session::{OutboundSlot, SessionContext, TransportSession};
use crate::state::{ConnectionState, SharedConnectionState};

/// Background task handle plus its shutdown signal.
#[derive(Debug)]
struct Worker {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

/// Self-healing RPC client for one device.
pub struct ShellyClient {
    ctx: SessionContext,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for ShellyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellyClient")
            .field("endpoint", &self.ctx.config.endpoint)
            .finish_non_exhaustive()
    }
}

impl ShellyClient {
    /// Create a client. Nothing happens on the network until [`Self::start`].
    pub fn new(config: ClientConfig, observer: Arc<dyn DeviceObserver>) -> Self {
        Self {
            ctx: SessionContext {
                config: Arc::new(config),
                correlator: Arc::new(RequestCorrelator::new()),
                state: SharedConnectionState::new(),
                observer,
                outbound: Arc::new(OutboundSlot::default()),
            },
            worker: Mutex::new(None),
        }
    }

    /// Configuration the client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.ctx.state.get().await
    }

    /// Whether calls are currently accepted.
    pub async fn is_connected(&self) -> bool {
        self.ctx.state.is_connected().await
    }

    /// Start the supervised connection loop.
    ///
    /// Must be called from within a tokio runtime. A no-op if the loop is
    /// already running.
    pub fn start(&self) {
        let mut worker = self.worker.lock().expect("ShellyClient worker mutex poisoned");
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            log::warn!("[Shelly] start() called while already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(supervise(self.ctx.clone(), shutdown.clone()));
        *worker = Some(Worker { handle, shutdown });
    }

    /// Stop the loop, close the socket and fail all pending calls.
    ///
    /// Returns once the background task has exited. Idempotent.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .expect("ShellyClient worker mutex poisoned")
            .take();

        if let Some(worker) = worker {
            worker.shutdown.cancel();
            if let Err(e) = worker.handle.await {
                log::error!("[Shelly] Supervisor task ended abnormally: {}", e);
            }
        }

        self.ctx.outbound.clear();
        let failed = self.ctx.correlator.fail_all(&RpcError::Stopped);
        if failed > 0 {
            log::debug!("[Shelly] Failed {} pending call(s) on stop", failed);
        }
        let previous = self.ctx.state.replace(ConnectionState::Disconnected).await;
        if previous == ConnectionState::Connected {
            self.ctx.observer.on_disconnected();
        }
    }

    /// Invoke `method` on the device and await its result.
    ///
    /// Fails immediately with [`RpcError::NotConnected`] unless the
    /// connection has completed its handshake. Otherwise waits up to the
    /// configured call timeout.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        if !self.ctx.state.is_connected().await {
            return Err(RpcError::NotConnected);
        }
        let Some(outbound) = self.ctx.outbound.sender() else {
            return Err(RpcError::NotConnected);
        };

        let correlator = &self.ctx.correlator;
        let id = correlator.next_id();
        let request = Request::new(id, &self.ctx.config.client_id, method)
            .with_params(params.as_ref())
            .encode();

        let pending = correlator.register(id, method, self.ctx.config.timing.call_timeout);
        if outbound.send(request).is_err() {
            correlator.cancel(id);
            return Err(RpcError::NotConnected);
        }
        log::debug!("[Shelly] Sent {} (id={})", method, id);

        correlator.wait(pending).await
    }
}

impl Drop for ShellyClient {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.shutdown.cancel();
            }
        }
    }
}

/// Connection loop: run sessions until shutdown, pausing between attempts.
async fn supervise(ctx: SessionContext, shutdown: CancellationToken) {
    let reconnect = ctx.config.timing.reconnect_interval;
    log::info!("[Shelly] Supervising connection to {}", ctx.config.endpoint.url());

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // Spawned so a panic inside the session (or an observer callback)
        // surfaces as a JoinError instead of killing this loop.
        let session = TransportSession::new(ctx.clone(), shutdown.clone());
        match tokio::spawn(session.run()).await {
            Ok(Ok(end)) => log::info!("[Shelly] Session ended: {}", end),
            Ok(Err(e)) => log::warn!(
                "[Shelly] WebSocket connection error: {} (retry in {}s)",
                e,
                reconnect.as_secs()
            ),
            Err(e) => log::error!("[Shelly] Unexpected WebSocket error: {}", e),
        }

        ctx.outbound.clear();
        let previous = ctx.state.replace(ConnectionState::Disconnected).await;
        let failed = ctx.correlator.fail_all(&RpcError::Stopped);
        if failed > 0 {
            log::debug!("[Shelly] Failed {} pending call(s) after disconnect", failed);
        }
        if previous == ConnectionState::Connected {
            ctx.observer.on_disconnected();
        }

        tokio::select! {
            () = shutdown.cancelled() => break,
            () = tokio::time::sleep(reconnect) => {}
        }
    }

    log::info!("[Shelly] Supervisor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Endpoint, Timing};
    use crate::observer::ChannelObserver;
    use std::time::Duration;

    fn unreachable_config() -> ClientConfig {
        ClientConfig::new(Endpoint::new("127.0.0.1", 1)).with_timing(Timing {
            reconnect_interval: Duration::from_millis(20),
            ..Timing::default()
        })
    }

    #[tokio::test]
    async fn test_call_before_start_is_not_connected() {
        let (observer, _events) = ChannelObserver::channel();
        let client = ShellyClient::new(unreachable_config(), Arc::new(observer));
        assert_eq!(
            client.call("Shelly.GetStatus", None).await,
            Err(RpcError::NotConnected)
        );
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_unreachable_device_never_reports_disconnect() {
        let (observer, mut events) = ChannelObserver::channel();
        let client = ShellyClient::new(unreachable_config(), Arc::new(observer));

        client.start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!client.is_connected().await);
        assert_eq!(
            client.call("Shelly.Reboot", None).await,
            Err(RpcError::NotConnected)
        );
        client.stop().await;

        // Never connected, so neither notification fires.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (observer, _events) = ChannelObserver::channel();
        let client = ShellyClient::new(unreachable_config(), Arc::new(observer));
        client.stop().await;
        client.start();
        client.stop().await;
        client.stop().await;
        assert_eq!(client.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_single_worker() {
        let (observer, _events) = ChannelObserver::channel();
        let client = ShellyClient::new(unreachable_config(), Arc::new(observer));
        client.start();
        client.start();
        assert!(client.worker.lock().unwrap().is_some());
        client.stop().await;
        assert!(client.worker.lock().unwrap().is_none());
    }
}
