//! Collaborator notifications.
//!
//! The client reports three things to the outside world: push payloads,
//! "connected" and "disconnected". Collaborators implement
//! [`DeviceObserver`], or use [`ChannelObserver`] to receive the same
//! notifications as [`DeviceEvent`]s on an mpsc channel.
//!
//! Callbacks run on the connection task. They must return quickly and must
//! not block; hand heavy work off to another task.

// Rust guideline compliant 2026-02

use serde_json::Value;
use tokio::sync::mpsc;

/// Receiver of device notifications.
pub trait DeviceObserver: Send + Sync + 'static {
    /// A push notification (or the initial status fetch) arrived.
    ///
    /// The payload always has the shape `{"method": .., "params": ..}`.
    fn on_update(&self, payload: Value);

    /// The connection completed its handshake and accepts calls.
    fn on_connected(&self) {}

    /// A previously connected session ended.
    fn on_disconnected(&self) {}
}

/// Notification delivered by [`ChannelObserver`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Push payload.
    Update(Value),
    /// Handshake completed.
    Connected,
    /// Connection lost or client stopped.
    Disconnected,
}

/// [`DeviceObserver`] that forwards notifications to an unbounded channel.
///
/// Events are dropped silently once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DeviceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn emit(&self, event: DeviceEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[Shelly] Event receiver dropped");
        }
    }
}

impl DeviceObserver for ChannelObserver {
    fn on_update(&self, payload: Value) {
        self.emit(DeviceEvent::Update(payload));
    }

    fn on_connected(&self) {
        self.emit(DeviceEvent::Connected);
    }

    fn on_disconnected(&self) {
        self.emit(DeviceEvent::Disconnected);
    }
}
