//! shelly-ws - self-healing WebSocket RPC client for Shelly Gen3 dimmers.
//!
//! Keeps one WebSocket open to a device's `/rpc` endpoint, answers its
//! digest-auth challenge, correlates request ids with responses and hands
//! push notifications to an observer. When the link drops it comes back on
//! its own.
//!
//! # Architecture
//!
//! - **ShellyClient** - supervisor; owns the reconnect loop and exposes `call`
//! - **TransportSession** - one socket from open to close; routes frames
//! - **RequestCorrelator** - pending call table keyed by request id
//! - **AuthNegotiator** - SHA-256 digest handshake on 401 challenges
//! - **Codec** - JSON-RPC frame encoding and classification
//!
//! # Modules
//!
//! - [`supervisor`] - [`ShellyClient`] and its connection loop
//! - [`config`] - endpoint, credentials and timing
//! - [`observer`] - [`DeviceObserver`] callbacks
//! - [`probe`] - one-shot reachability check

pub mod auth;
pub mod codec;
pub mod config;
pub mod constants;
pub mod correlator;
pub mod error;
pub mod observer;
pub mod probe;
pub mod state;
pub mod supervisor;
pub mod ws;

mod session;

// Re-export commonly used types
pub use config::{ClientConfig, Credentials, Endpoint, Timing};
pub use error::RpcError;
pub use observer::{ChannelObserver, DeviceEvent, DeviceObserver};
pub use probe::{probe_device, ProbeOutcome};
pub use session::SessionEnd;
pub use state::ConnectionState;
pub use supervisor::ShellyClient;
