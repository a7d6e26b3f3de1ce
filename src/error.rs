//! Error taxonomy for device RPC.
//!
//! Only [`RpcError::Transport`] tears a connection down; every other variant
//! is local to a single call or a single frame.

// Rust guideline compliant 2026-02

use std::time::Duration;

/// Errors surfaced by the client core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// Socket or network failure. The supervisor reconnects.
    Transport(String),
    /// Frame could not be decoded. Logged and dropped.
    Protocol(String),
    /// The device answered a call with an error object.
    Rpc {
        /// Device error code (e.g. 401, -103).
        code: i64,
        /// Device error message.
        message: String,
    },
    /// No response arrived before the call deadline.
    Timeout {
        /// Method that was called.
        method: String,
        /// How long the caller waited.
        after: Duration,
    },
    /// Call attempted while the client is not connected.
    NotConnected,
    /// The connection dropped or the client stopped while the call was pending.
    Stopped,
}

impl RpcError {
    /// Whether the error indicates the connection itself is unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "Transport error: {msg}"),
            Self::Protocol(msg) => write!(f, "Protocol error: {msg}"),
            Self::Rpc { code, message } => write!(f, "RPC error {code}: {message}"),
            Self::Timeout { method, after } => {
                write!(f, "RPC call {method} timed out after {}ms", after.as_millis())
            }
            Self::NotConnected => write!(f, "WebSocket not connected"),
            Self::Stopped => write!(f, "Connection closed before a response arrived"),
        }
    }
}

impl std::error::Error for RpcError {}
