//! Connection state shared between the supervisor, the session and callers.

// Rust guideline compliant 2026-02

use std::sync::Arc;

use tokio::sync::RwLock;

/// Lifecycle of the client's single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No open socket.
    #[default]
    Disconnected,
    /// Socket open, handshake not started or not finished.
    Connecting,
    /// Digest handshake in progress.
    Authenticating,
    /// Handshake complete; calls are accepted.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Thread-safe connection state.
#[derive(Debug, Default)]
pub struct SharedConnectionState {
    state: RwLock<ConnectionState>,
}

impl SharedConnectionState {
    /// Create new shared state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get the current state.
    pub async fn get(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Set the state.
    pub async fn set(&self, new_state: ConnectionState) {
        let mut guard = self.state.write().await;
        if *guard != new_state {
            log::debug!("[Shelly] State {} -> {}", *guard, new_state);
        }
        *guard = new_state;
    }

    /// Set the state, returning the previous one.
    pub async fn replace(&self, new_state: ConnectionState) -> ConnectionState {
        let mut guard = self.state.write().await;
        std::mem::replace(&mut *guard, new_state)
    }

    /// Check if connected.
    pub async fn is_connected(&self) -> bool {
        matches!(*self.state.read().await, ConnectionState::Connected)
    }
}
