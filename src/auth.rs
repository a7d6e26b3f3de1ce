//! Digest challenge/response authentication.
//!
//! Gen2+ Shelly devices reject unauthenticated requests with error code 401
//! whose message carries the realm and nonce. The client answers by
//! re-sending the request with an `auth` block holding a SHA-256 digest.
//!
//! # Handshake
//!
//! ```text
//! client                                   device
//!   │ ── Shelly.GetStatus (no auth) ──────────►│
//!   │ ◄── {"error":{"code":401,"message":..}} ─│   (wait ≤ 5s)
//!   │ ── Shelly.GetStatus + auth{...} ────────►│
//!   │                                          │   reply handled by read loop
//! ```
//!
//! If the first reply is anything other than a 401, the device does not
//! require auth and the reply is passed back to the session for normal
//! dispatch.
//!
//! # Digest
//!
//! ```text
//! HA1      = H(username:realm:password)
//! HA2      = H("dummy_method:dummy_uri")
//! cnonce   = H(timestamp)[..8]
//! response = H(HA1:nonce:00000001:cnonce:auth:HA2)
//! ```
//!
//! The second reply is not validated here; a wrong password shows up later
//! as an unmatched 401 in the read loop.

// Rust guideline compliant 2026-02

use std::time::Duration;

use chrono::{DateTime, Utc};
use data_encoding::HEXLOWER;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::codec::{self, Frame, FrameBody, Request};
use crate::config::Credentials;
use crate::constants::{
    CNONCE_LEN, DIGEST_ALGORITHM, DIGEST_HA2_INPUT, DIGEST_NONCE_COUNT, METHOD_GET_STATUS,
};
use crate::error::RpcError;
use crate::ws::{WsMessage, WsReader, WsWriter};

/// Realm and nonce extracted from a 401 error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Authentication realm (usually the device id).
    pub realm: String,
    /// Server nonce.
    pub nonce: String,
}

impl AuthChallenge {
    /// Parse the message field of a 401 error.
    ///
    /// Tries a JSON object first (`{"realm": .., "nonce": ..}`), then falls
    /// back to `realm:nonce`. A missing realm defaults to `default_realm`
    /// (the device host); a missing nonce defaults to empty.
    pub fn parse(message: &str, default_realm: &str) -> Self {
        let (realm, nonce) = match serde_json::from_str::<Value>(message) {
            Ok(Value::Object(obj)) => (
                obj.get("realm").and_then(scalar_to_string),
                obj.get("nonce").and_then(scalar_to_string),
            ),
            _ => {
                let parts: Vec<&str> = message.split(':').collect();
                if parts.len() >= 2 {
                    (Some(parts[0].to_string()), Some(parts[1].to_string()))
                } else {
                    (None, None)
                }
            }
        };

        Self {
            realm: realm.unwrap_or_else(|| default_realm.to_string()),
            nonce: nonce.unwrap_or_default(),
        }
    }
}

// Devices send the nonce as a number.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The `auth` object attached to the authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBlock {
    /// Realm echoed from the challenge.
    pub realm: String,
    /// Username.
    pub username: String,
    /// Nonce echoed from the challenge.
    pub nonce: String,
    /// Client nonce.
    pub cnonce: String,
    /// Final digest.
    pub response: String,
    /// Always `SHA-256`.
    pub algorithm: String,
}

impl AuthBlock {
    /// Compute the auth block for `challenge` using a client nonce derived
    /// from `now`.
    pub fn compute(credentials: &Credentials, challenge: &AuthChallenge, now: DateTime<Utc>) -> Self {
        let cnonce = client_nonce(now);
        let response = digest_response(credentials, &challenge.realm, &challenge.nonce, &cnonce);
        Self {
            realm: challenge.realm.clone(),
            username: credentials.username.clone(),
            nonce: challenge.nonce.clone(),
            cnonce,
            response,
            algorithm: DIGEST_ALGORITHM.to_string(),
        }
    }

    /// JSON form for the wire.
    ///
    /// Numeric nonces are sent back as numbers, matching what the device
    /// issued.
    pub fn to_value(&self) -> Value {
        let nonce = self
            .nonce
            .parse::<u64>()
            .map_or_else(|_| json!(self.nonce), |n| json!(n));
        json!({
            "realm": self.realm,
            "username": self.username,
            "nonce": nonce,
            "cnonce": self.cnonce,
            "response": self.response,
            "algorithm": self.algorithm,
        })
    }
}

fn sha256_hex(input: &str) -> String {
    HEXLOWER.encode(&Sha256::digest(input.as_bytes()))
}

/// Client nonce: first 8 hex chars of `H(<unix seconds>.<micros>)`.
pub fn client_nonce(now: DateTime<Utc>) -> String {
    let stamp = format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros());
    let mut hex = sha256_hex(&stamp);
    hex.truncate(CNONCE_LEN);
    hex
}

/// Final digest response for the given challenge parameters.
pub fn digest_response(credentials: &Credentials, realm: &str, nonce: &str, cnonce: &str) -> String {
    let ha1 = sha256_hex(&format!(
        "{}:{}:{}",
        credentials.username, realm, credentials.password
    ));
    let ha2 = sha256_hex(DIGEST_HA2_INPUT);
    sha256_hex(&format!(
        "{ha1}:{nonce}:{DIGEST_NONCE_COUNT}:{cnonce}:auth:{ha2}"
    ))
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing sent yet.
    Idle,
    /// Probe sent, waiting for the challenge.
    ChallengeSent,
    /// Authenticated request sent, or auth turned out to be unnecessary.
    Authenticated,
    /// The exchange failed at the transport level.
    Failed,
}

/// What to do with the reply to the probe.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStep {
    /// Device issued a challenge; send this authenticated request.
    Respond {
        /// Parsed challenge.
        challenge: AuthChallenge,
        /// Encoded authenticated request.
        request: String,
    },
    /// Device answered without a challenge; dispatch this frame normally.
    NotRequired(String),
}

/// Drives the digest handshake for one connection.
#[derive(Debug)]
pub struct AuthNegotiator<'a> {
    credentials: &'a Credentials,
    host: &'a str,
    client_id: &'a str,
    state: AuthState,
}

impl<'a> AuthNegotiator<'a> {
    /// New negotiator in the `Idle` state.
    pub fn new(credentials: &'a Credentials, host: &'a str, client_id: &'a str) -> Self {
        Self {
            credentials,
            host,
            client_id,
            state: AuthState::Idle,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Encode the unauthenticated probe and move to `ChallengeSent`.
    pub fn probe(&mut self, id: u64) -> String {
        self.state = AuthState::ChallengeSent;
        Request::new(id, self.client_id, METHOD_GET_STATUS).encode()
    }

    /// Handle the reply to the probe.
    ///
    /// `next_id` is the id for the authenticated re-send; `now` seeds the
    /// client nonce.
    pub fn on_reply(&mut self, reply: &str, next_id: u64, now: DateTime<Utc>) -> AuthStep {
        self.state = AuthState::Authenticated;

        let frame = codec::decode(reply).ok().filter(Frame::is_auth_challenge);
        let Some(Frame {
            body: FrameBody::Error { message, .. },
            ..
        }) = frame
        else {
            return AuthStep::NotRequired(reply.to_string());
        };

        let challenge = AuthChallenge::parse(&message, self.host);
        let auth = AuthBlock::compute(self.credentials, &challenge, now);
        let request = Request::new(next_id, self.client_id, METHOD_GET_STATUS)
            .with_auth(&auth)
            .encode();

        AuthStep::Respond { challenge, request }
    }

    /// Mark the exchange as failed.
    pub fn fail(&mut self) {
        self.state = AuthState::Failed;
    }
}

/// Run the handshake over an open socket.
///
/// Returns the probe reply when the device did not ask for auth, so the
/// caller can dispatch it.
///
/// # Errors
///
/// Returns [`RpcError::Transport`] if sending fails, the socket closes, or
/// no reply arrives within `challenge_timeout`.
pub async fn negotiate(
    negotiator: &mut AuthNegotiator<'_>,
    correlator: &crate::correlator::RequestCorrelator,
    writer: &mut WsWriter,
    reader: &mut WsReader,
    challenge_timeout: Duration,
) -> Result<Option<String>, RpcError> {
    let result = run_exchange(negotiator, correlator, writer, reader, challenge_timeout).await;
    if result.is_err() {
        negotiator.fail();
    }
    result
}

async fn run_exchange(
    negotiator: &mut AuthNegotiator<'_>,
    correlator: &crate::correlator::RequestCorrelator,
    writer: &mut WsWriter,
    reader: &mut WsReader,
    challenge_timeout: Duration,
) -> Result<Option<String>, RpcError> {
    let probe = negotiator.probe(correlator.next_id());
    writer
        .send_text(&probe)
        .await?;
    log::debug!("[Auth] Probe sent, waiting for challenge");

    let reply = tokio::time::timeout(challenge_timeout, next_text(writer, reader))
        .await
        .map_err(|_elapsed| {
            RpcError::Transport(format!(
                "no reply to auth probe within {}s",
                challenge_timeout.as_secs()
            ))
        })??;

    match negotiator.on_reply(&reply, correlator.next_id(), Utc::now()) {
        AuthStep::Respond { challenge, request } => {
            log::debug!("[Auth] Challenge received (realm={})", challenge.realm);
            writer
                .send_text(&request)
                .await?;
            log::debug!("[Auth] Authentication payload sent");
            Ok(None)
        }
        AuthStep::NotRequired(raw) => {
            log::debug!("[Auth] Device did not request authentication");
            Ok(Some(raw))
        }
    }
}

/// Wait for the next text frame, answering pings along the way.
async fn next_text(writer: &mut WsWriter, reader: &mut WsReader) -> Result<String, RpcError> {
    loop {
        match reader.recv().await {
            Some(Ok(WsMessage::Text(text))) => return Ok(text),
            Some(Ok(WsMessage::Ping(data))) => {
                if let Err(e) = writer.send_pong(data).await {
                    log::debug!("[Auth] Pong during handshake failed: {}", e);
                }
            }
            Some(Ok(WsMessage::Pong(_) | WsMessage::Binary(_))) => {}
            Some(Ok(WsMessage::Close { code, reason })) => {
                return Err(RpcError::Transport(format!(
                    "closed during auth (code {code}): {reason}"
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(RpcError::Transport("stream ended during auth".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn creds() -> Credentials {
        Credentials {
            username: "admin".to_string(),
            password: "secret".to_string(),
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 500_000_000).unwrap()
    }

    #[test]
    fn test_client_nonce_known_vector() {
        // sha256("1700000000.500000")[..8]
        assert_eq!(client_nonce(fixed_time()), "22d9e134");
    }

    #[test]
    fn test_digest_known_vector() {
        // HA1 = sha256("admin:shellydimmer-abc:secret")
        //     = 1afe2a4c2b8d4f3117c3454bf9f1b46d0bca8a7ac8b20dbe1f67c8c990be894a
        // HA2 = sha256("dummy_method:dummy_uri")
        //     = 6370ec69915103833b5222b368555393393f098bfbfbb59f47e0590af135f062
        let response = digest_response(&creds(), "shellydimmer-abc", "1700000000", "22d9e134");
        assert_eq!(
            response,
            "36e15ffcf5250ae86bf592efbe93b7a8696fca33d5a22814ae770fd5d6069550"
        );
    }

    #[test]
    fn test_auth_block_is_deterministic() {
        let challenge = AuthChallenge {
            realm: "shellydimmer-abc".to_string(),
            nonce: "1700000000".to_string(),
        };
        let a = AuthBlock::compute(&creds(), &challenge, fixed_time());
        let b = AuthBlock::compute(&creds(), &challenge, fixed_time());
        assert_eq!(a, b);
        assert_eq!(a.cnonce, "22d9e134");
        assert_eq!(
            a.response,
            "36e15ffcf5250ae86bf592efbe93b7a8696fca33d5a22814ae770fd5d6069550"
        );
        assert_eq!(a.algorithm, "SHA-256");
    }

    #[test]
    fn test_parse_colon_challenge() {
        let challenge = AuthChallenge::parse("myrealm:abc123", "192.168.1.40");
        assert_eq!(challenge.realm, "myrealm");
        assert_eq!(challenge.nonce, "abc123");
    }

    #[test]
    fn test_parse_json_challenge() {
        let challenge = AuthChallenge::parse(
            r#"{"auth_type":"digest","nonce":1700000000,"nc":1,"realm":"shellydimmerg3-abc","algorithm":"SHA-256"}"#,
            "192.168.1.40",
        );
        assert_eq!(challenge.realm, "shellydimmerg3-abc");
        assert_eq!(challenge.nonce, "1700000000");
    }

    #[test]
    fn test_parse_json_without_realm_defaults_to_host() {
        let challenge = AuthChallenge::parse(r#"{"nonce":"n1"}"#, "192.168.1.40");
        assert_eq!(challenge.realm, "192.168.1.40");
        assert_eq!(challenge.nonce, "n1");
    }

    #[test]
    fn test_parse_unstructured_defaults() {
        let challenge = AuthChallenge::parse("Unauthorized", "dimmer.local");
        assert_eq!(challenge.realm, "dimmer.local");
        assert_eq!(challenge.nonce, "");
    }

    #[test]
    fn test_numeric_nonce_sent_as_number() {
        let challenge = AuthChallenge {
            realm: "r".into(),
            nonce: "1700000000".into(),
        };
        let block = AuthBlock::compute(&creds(), &challenge, fixed_time());
        assert_eq!(block.to_value()["nonce"], json!(1_700_000_000_u64));

        let challenge = AuthChallenge {
            realm: "r".into(),
            nonce: "abc123".into(),
        };
        let block = AuthBlock::compute(&creds(), &challenge, fixed_time());
        assert_eq!(block.to_value()["nonce"], json!("abc123"));
    }

    #[test]
    fn test_negotiator_responds_to_401() {
        let creds = creds();
        let mut negotiator = AuthNegotiator::new(&creds, "192.168.1.40", "shelly-ws");
        assert_eq!(negotiator.state(), AuthState::Idle);

        let probe: Value = serde_json::from_str(&negotiator.probe(1)).unwrap();
        assert_eq!(probe["method"], "Shelly.GetStatus");
        assert!(probe.get("auth").is_none());
        assert_eq!(negotiator.state(), AuthState::ChallengeSent);

        let step = negotiator.on_reply(
            r#"{"id":1,"error":{"code":401,"message":"myrealm:abc123"}}"#,
            2,
            fixed_time(),
        );
        assert_eq!(negotiator.state(), AuthState::Authenticated);

        let AuthStep::Respond { challenge, request } = step else {
            panic!("expected Respond, got {step:?}");
        };
        assert_eq!(challenge.realm, "myrealm");
        assert_eq!(challenge.nonce, "abc123");

        let request: Value = serde_json::from_str(&request).unwrap();
        assert_eq!(request["id"], 2);
        assert_eq!(request["method"], "Shelly.GetStatus");
        assert_eq!(request["auth"]["realm"], "myrealm");
        assert_eq!(request["auth"]["nonce"], "abc123");
        assert_eq!(request["auth"]["username"], "admin");
        assert_eq!(request["auth"]["cnonce"], "22d9e134");
        assert_eq!(request["auth"]["algorithm"], "SHA-256");
        assert_eq!(
            request["auth"]["response"],
            digest_response(&creds, "myrealm", "abc123", "22d9e134")
        );
    }

    #[test]
    fn test_negotiator_passes_through_non_401() {
        let creds = creds();
        let mut negotiator = AuthNegotiator::new(&creds, "dimmer", "shelly-ws");
        negotiator.probe(1);

        let reply = r#"{"id":1,"result":{"sys":{"uptime":12}}}"#;
        let step = negotiator.on_reply(reply, 2, fixed_time());
        assert_eq!(step, AuthStep::NotRequired(reply.to_string()));
        assert_eq!(negotiator.state(), AuthState::Authenticated);
    }

    #[test]
    fn test_negotiator_passes_through_other_errors() {
        let creds = creds();
        let mut negotiator = AuthNegotiator::new(&creds, "dimmer", "shelly-ws");
        negotiator.probe(1);

        let reply = r#"{"id":1,"error":{"code":-114,"message":"busy"}}"#;
        assert!(matches!(
            negotiator.on_reply(reply, 2, fixed_time()),
            AuthStep::NotRequired(_)
        ));
    }

    #[test]
    fn test_negotiator_fail() {
        let creds = creds();
        let mut negotiator = AuthNegotiator::new(&creds, "dimmer", "shelly-ws");
        negotiator.probe(1);
        negotiator.fail();
        assert_eq!(negotiator.state(), AuthState::Failed);
    }
}
