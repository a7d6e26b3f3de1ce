//! Wire codec for the device RPC protocol.
//!
//! Outbound requests:
//!
//! ```text
//! {"id": 7, "src": "shelly-ws", "method": "Light.Set", "params": {...}, "auth": {...}}
//! ```
//!
//! `params` is omitted when absent or empty; `auth` only appears on the
//! authenticated re-send during the handshake.
//!
//! Inbound frames are one of:
//!
//! ```text
//! {"id": 7, "result": ...}                                  response
//! {"id": 7, "error": {"code": 401, "message": "..."}}       error response
//! {"method": "NotifyStatus", "params": {...}}               push
//! ```

// Rust guideline compliant 2026-02

use serde_json::{json, Map, Value};

use crate::auth::AuthBlock;
use crate::error::RpcError;

/// An outbound RPC request.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    /// Correlation id.
    pub id: u64,
    /// Client identifier (`src`).
    pub src: &'a str,
    /// RPC method name.
    pub method: &'a str,
    /// Optional parameters object.
    pub params: Option<&'a Value>,
    /// Optional digest authentication block.
    pub auth: Option<&'a AuthBlock>,
}

impl<'a> Request<'a> {
    /// Request without params or auth.
    pub fn new(id: u64, src: &'a str, method: &'a str) -> Self {
        Self {
            id,
            src,
            method,
            params: None,
            auth: None,
        }
    }

    /// Attach parameters.
    #[must_use]
    pub fn with_params(mut self, params: Option<&'a Value>) -> Self {
        self.params = params;
        self
    }

    /// Attach an auth block.
    #[must_use]
    pub fn with_auth(mut self, auth: &'a AuthBlock) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Encode to the JSON text sent on the wire.
    pub fn encode(&self) -> String {
        let mut obj = Map::new();
        obj.insert("id".into(), json!(self.id));
        obj.insert("src".into(), json!(self.src));
        obj.insert("method".into(), json!(self.method));
        if let Some(params) = self.params.filter(|p| !is_empty_params(p)) {
            obj.insert("params".into(), params.clone());
        }
        if let Some(auth) = self.auth {
            obj.insert("auth".into(), auth.to_value());
        }
        Value::Object(obj).to_string()
    }
}

fn is_empty_params(params: &Value) -> bool {
    match params {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Correlation id, if the frame carried a non-negative integer `id`.
    pub id: Option<u64>,
    /// What the frame carries.
    pub body: FrameBody,
}

/// Payload of an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameBody {
    /// Successful response.
    Result(Value),
    /// Error response.
    Error {
        /// Device error code.
        code: i64,
        /// Device error message (for 401, the realm/nonce challenge).
        message: String,
    },
    /// Push notification (or any frame naming a method without a result).
    Notification {
        /// Method name, e.g. `NotifyStatus`.
        method: String,
        /// Method parameters (`null` when absent).
        params: Value,
    },
    /// Valid JSON object matching none of the known shapes.
    Unrecognized(Value),
}

impl Frame {
    /// Convert into the outcome delivered to a waiting caller.
    ///
    /// A notification that happens to carry a pending id resolves the call
    /// with the whole `{method, params}` object.
    pub fn into_outcome(self) -> Result<Value, RpcError> {
        match self.body {
            FrameBody::Result(result) => Ok(result),
            FrameBody::Error { code, message } => Err(RpcError::Rpc { code, message }),
            FrameBody::Notification { method, params } => {
                Ok(json!({ "method": method, "params": params }))
            }
            FrameBody::Unrecognized(value) => Ok(value),
        }
    }

    /// Whether this is a 401 authentication challenge.
    pub fn is_auth_challenge(&self) -> bool {
        matches!(
            self.body,
            FrameBody::Error { code, .. } if code == crate::constants::AUTH_REQUIRED_CODE
        )
    }
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns [`RpcError::Protocol`] if the text is not a JSON object.
pub fn decode(text: &str) -> Result<Frame, RpcError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| RpcError::Protocol(format!("invalid JSON: {e}")))?;
    let Value::Object(mut obj) = value else {
        return Err(RpcError::Protocol("frame is not a JSON object".to_string()));
    };

    let id = obj.get("id").and_then(Value::as_u64);

    let body = if let Some(error) = obj.remove("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = match error.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "RPC error".to_string(),
        };
        FrameBody::Error { code, message }
    } else if let Some(result) = obj.remove("result") {
        FrameBody::Result(result)
    } else if let Some(method) = obj.get("method").and_then(Value::as_str).map(str::to_owned) {
        let params = obj.remove("params").unwrap_or(Value::Null);
        FrameBody::Notification { method, params }
    } else {
        FrameBody::Unrecognized(Value::Object(obj))
    };

    Ok(Frame { id, body })
}

/// Truncate a frame for logging.
pub(crate) fn preview(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_without_params() {
        let text = Request::new(1, "shelly-ws", "Shelly.GetStatus").encode();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            parsed,
            json!({"id": 1, "src": "shelly-ws", "method": "Shelly.GetStatus"})
        );
    }

    #[test]
    fn test_encode_omits_empty_params() {
        let empty = json!({});
        let text = Request::new(2, "shelly-ws", "Shelly.Reboot")
            .with_params(Some(&empty))
            .encode();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert!(parsed.get("params").is_none());
        assert!(parsed.get("auth").is_none());
    }

    #[test]
    fn test_encode_with_params() {
        let params = json!({"id": 0, "on": true, "brightness": 40});
        let text = Request::new(3, "shelly-ws", "Light.Set")
            .with_params(Some(&params))
            .encode();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["params"]["brightness"], 40);
        assert_eq!(parsed["method"], "Light.Set");
    }

    #[test]
    fn test_decode_result() {
        let frame = decode(r#"{"id":4,"src":"shellydimmerg3","dst":"shelly-ws","result":{"was_on":false}}"#)
            .unwrap();
        assert_eq!(frame.id, Some(4));
        assert_eq!(frame.body, FrameBody::Result(json!({"was_on": false})));
    }

    #[test]
    fn test_decode_error() {
        let frame = decode(r#"{"id":5,"error":{"code":-103,"message":"Invalid argument"}}"#).unwrap();
        assert_eq!(frame.id, Some(5));
        assert_eq!(
            frame.into_outcome(),
            Err(RpcError::Rpc {
                code: -103,
                message: "Invalid argument".to_string()
            })
        );
    }

    #[test]
    fn test_decode_auth_challenge() {
        let frame = decode(r#"{"id":1,"error":{"code":401,"message":"myrealm:abc123"}}"#).unwrap();
        assert!(frame.is_auth_challenge());
    }

    #[test]
    fn test_decode_push() {
        let frame = decode(r#"{"method":"NotifyStatus","params":{"light:0":{"apower":4.2}}}"#).unwrap();
        assert_eq!(frame.id, None);
        match frame.body {
            FrameBody::Notification { method, params } => {
                assert_eq!(method, "NotifyStatus");
                assert_eq!(params["light:0"]["apower"], 4.2);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_malformed_is_protocol_error() {
        assert!(matches!(decode("{not json"), Err(RpcError::Protocol(_))));
        assert!(matches!(decode("[1,2,3]"), Err(RpcError::Protocol(_))));
    }

    #[test]
    fn test_decode_non_integer_id_is_ignored() {
        let frame = decode(r#"{"id":"abc","result":1}"#).unwrap();
        assert_eq!(frame.id, None);
    }

    #[test]
    fn test_notification_outcome_is_whole_message() {
        let frame = decode(r#"{"id":9,"method":"NotifyEvent","params":{"events":[]}}"#).unwrap();
        assert_eq!(
            frame.into_outcome().unwrap(),
            json!({"method": "NotifyEvent", "params": {"events": []}})
        );
    }

    #[test]
    fn test_preview_respects_char_boundary() {
        let text = "ä".repeat(150);
        let cut = preview(&text);
        assert!(cut.len() <= 200);
        assert!(text.starts_with(cut));
    }
}
