//! Protocol and timing constants for shelly-ws.
//!
//! This module centralizes all magic numbers and identifiers used on the
//! wire. Constants are grouped by domain with documentation explaining
//! their purpose.
//!
//! # Categories
//!
//! - **Timing**: Reconnect, heartbeat and RPC timeouts
//! - **Protocol**: Method names, paths and digest parameters

use std::time::Duration;

// ============================================================================
// Timing
// ============================================================================

/// Delay between the end of one connection attempt and the next.
///
/// Applied after both failed connects and lost connections. There is no
/// attempt limit; the supervisor retries until stopped.
pub const RECONNECT_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between WebSocket ping frames on an open connection.
///
/// Transport-level liveness only. Independent of RPC traffic. The session
/// gives up on the link when no frame arrives within half this interval
/// after a ping.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a `call()` waits for its correlated response.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the auth handshake waits for the reply to its probe request.
pub const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on writing the close frame when a session ends.
///
/// A dead peer can leave the socket unwritable.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on the one-shot reachability probe (connect and reply each).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Protocol
// ============================================================================

/// Default device port.
pub const DEFAULT_PORT: u16 = 80;

/// Path of the RPC WebSocket endpoint on the device.
pub const RPC_PATH: &str = "/rpc";

/// Default `src` field stamped on every outbound request.
pub const DEFAULT_CLIENT_ID: &str = "shelly-ws";

/// `src` used by the reachability probe.
pub const PROBE_CLIENT_ID: &str = "shelly-ws-probe";

/// Method used for the initial state fetch and as the auth probe.
pub const METHOD_GET_STATUS: &str = "Shelly.GetStatus";

/// Method used by the reachability probe.
pub const METHOD_GET_DEVICE_INFO: &str = "Shelly.GetDeviceInfo";

/// Push notification carrying a partial status update.
pub const NOTIFY_STATUS: &str = "NotifyStatus";

/// Push notification carrying a full status snapshot.
pub const NOTIFY_FULL_STATUS: &str = "NotifyFullStatus";

/// Push notification carrying discrete events (button presses, etc.).
pub const NOTIFY_EVENT: &str = "NotifyEvent";

/// Push methods forwarded to observers as-is.
pub const PUSH_METHODS: [&str; 3] = [NOTIFY_STATUS, NOTIFY_FULL_STATUS, NOTIFY_EVENT];

/// Error code the device returns when a request needs authentication.
pub const AUTH_REQUIRED_CODE: i64 = 401;

/// Digest algorithm identifier sent in the `auth` block.
pub const DIGEST_ALGORITHM: &str = "SHA-256";

/// Fixed nonce count used for every digest.
pub const DIGEST_NONCE_COUNT: &str = "00000001";

/// Fixed method/URI pair hashed into HA2.
///
/// The device does not bind the digest to the request being authorized.
pub const DIGEST_HA2_INPUT: &str = "dummy_method:dummy_uri";

/// Number of hex characters kept from the hashed timestamp for the cnonce.
pub const CNONCE_LEN: usize = 8;
