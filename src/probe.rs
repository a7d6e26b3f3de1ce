//! One-shot reachability check.
//!
//! Used before a device is registered: open a socket, ask for
//! `Shelly.GetDeviceInfo` and report the device id, or that the device
//! wants credentials. No retries, no supervision.

// Rust guideline compliant 2026-02

use anyhow::{bail, Context, Result};
use serde_json::Value;
use tokio::time::Instant;

use crate::codec::{self, FrameBody, Request};
use crate::config::Endpoint;
use crate::constants::{METHOD_GET_DEVICE_INFO, PROBE_CLIENT_ID, PROBE_TIMEOUT};
use crate::ws::{self, WsMessage};

const PROBE_ID: u64 = 1;

/// Result of a successful probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The device answered.
    Reachable {
        /// Device id from the reply, or the host when the reply has none.
        device_id: String,
    },
    /// The device answered with a 401 challenge.
    AuthRequired,
}

/// Probe `endpoint` once.
///
/// Both the connect and the reply are bounded by [`PROBE_TIMEOUT`].
///
/// # Errors
///
/// Fails if the device cannot be reached, times out, closes the socket or
/// answers with a non-auth error.
pub async fn probe_device(endpoint: &Endpoint) -> Result<ProbeOutcome> {
    let url = endpoint.url();
    log::debug!("[Probe] Connecting to {}", url);

    let (mut writer, mut reader) = tokio::time::timeout(PROBE_TIMEOUT, ws::connect(&url))
        .await
        .with_context(|| format!("Timed out connecting to {url}"))??;

    let request = Request::new(PROBE_ID, PROBE_CLIENT_ID, METHOD_GET_DEVICE_INFO).encode();
    writer.send_text(&request).await?;

    let deadline = Instant::now() + PROBE_TIMEOUT;
    let outcome = loop {
        let msg = tokio::time::timeout_at(deadline, reader.recv())
            .await
            .context("Timed out waiting for device info")?;

        let text = match msg {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Ping(data))) => {
                writer.send_pong(data).await?;
                continue;
            }
            Some(Ok(WsMessage::Close { code, .. })) => bail!("Device closed connection ({code})"),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
            None => bail!("Connection ended before device replied"),
        };

        let frame = codec::decode(&text)?;
        if frame.is_auth_challenge() {
            log::info!("[Probe] {} requires authentication", endpoint.host);
            break ProbeOutcome::AuthRequired;
        }
        if frame.id != Some(PROBE_ID) {
            log::trace!("[Probe] Skipping unrelated frame: {}", codec::preview(&text));
            continue;
        }
        match frame.body {
            FrameBody::Error { code, message } => bail!("Device error {code}: {message}"),
            FrameBody::Result(result) => break reachable(&result, &endpoint.host),
            _ => bail!("Unexpected reply: {}", codec::preview(&text)),
        }
    };

    if let Err(e) = writer.close().await {
        log::debug!("[Probe] Close failed: {:#}", e);
    }
    Ok(outcome)
}

fn reachable(result: &Value, host: &str) -> ProbeOutcome {
    let device_id = result
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or(host)
        .to_string();
    ProbeOutcome::Reachable { device_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reachable_uses_device_id() {
        let result = json!({"id": "shellydimmerg3-aabbcc", "gen": 3});
        assert_eq!(
            reachable(&result, "10.0.0.5"),
            ProbeOutcome::Reachable {
                device_id: "shellydimmerg3-aabbcc".to_string()
            }
        );
    }

    #[test]
    fn test_reachable_falls_back_to_host() {
        assert_eq!(
            reachable(&json!({"gen": 3}), "10.0.0.5"),
            ProbeOutcome::Reachable {
                device_id: "10.0.0.5".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_error() {
        let endpoint = Endpoint::new("127.0.0.1", 1);
        assert!(probe_device(&endpoint).await.is_err());
    }
}
