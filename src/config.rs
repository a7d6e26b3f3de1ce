//! Client configuration.
//!
//! An [`Endpoint`] names the device and its optional credentials. A
//! [`ClientConfig`] adds the `src` identifier and the [`Timing`] knobs.
//! Values come from the caller (usually CLI arguments) with environment
//! variable overrides applied on top.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CALL_TIMEOUT, CHALLENGE_TIMEOUT, DEFAULT_CLIENT_ID, DEFAULT_PORT, HEARTBEAT_INTERVAL,
    RECONNECT_INTERVAL,
};

/// Username/password pair used for digest authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Device username (Shelly devices use `admin`).
    pub username: String,
    /// Device password.
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Network location of a device plus optional credentials.
///
/// Immutable for the lifetime of a client.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// TCP port of the device web server.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Optional username.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional password - never serialized.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Endpoint {
    /// Endpoint without credentials.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }

    /// Attach credentials. Empty strings are treated as absent.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = non_empty(username.into());
        self.password = non_empty(password.into());
        self
    }

    /// Credentials, if both username and password are configured.
    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// WebSocket RPC URL for this endpoint.
    pub fn url(&self) -> String {
        crate::ws::rpc_url(&self.host, self.port)
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Timing knobs. Defaults come from [`crate::constants`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Pause between connection attempts.
    pub reconnect_interval: Duration,
    /// Interval between WebSocket pings.
    pub heartbeat_interval: Duration,
    /// Deadline for a single `call()`.
    pub call_timeout: Duration,
    /// Deadline for the reply to the auth probe.
    pub challenge_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            reconnect_interval: RECONNECT_INTERVAL,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            call_timeout: CALL_TIMEOUT,
            challenge_timeout: CHALLENGE_TIMEOUT,
        }
    }
}

/// Full client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Device to connect to.
    pub endpoint: Endpoint,
    /// Value of the `src` field on outbound requests.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Timing knobs.
    #[serde(default)]
    pub timing: Timing,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

impl ClientConfig {
    /// Configuration with default client id and timing.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            client_id: default_client_id(),
            timing: Timing::default(),
        }
    }

    /// Replace the timing knobs.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    /// Apply `SHELLY_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognized keys: `SHELLY_HOST`, `SHELLY_PORT`, `SHELLY_USERNAME`,
    /// `SHELLY_PASSWORD`, `SHELLY_CLIENT_ID`. Unparseable ports are ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SHELLY_HOST") {
            self.endpoint.host = host;
        }

        if let Some(port) = lookup("SHELLY_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.endpoint.port = port;
            } else {
                log::warn!("[Shelly] Ignoring invalid SHELLY_PORT: {}", port);
            }
        }

        if let Some(username) = lookup("SHELLY_USERNAME") {
            self.endpoint.username = non_empty(username);
        }

        if let Some(password) = lookup("SHELLY_PASSWORD") {
            self.endpoint.password = non_empty(password);
        }

        if let Some(client_id) = lookup("SHELLY_CLIENT_ID") {
            if !client_id.is_empty() {
                self.client_id = client_id;
            }
        }
    }
}
