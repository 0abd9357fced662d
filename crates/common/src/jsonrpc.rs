//! JSON-RPC 2.0 envelope types.
//!
//! Both sides of the controller speak JSON-RPC 2.0: clients send `customRequest`
//! commands over the signaling socket, and the controller drives each media server
//! over its own JSON-RPC control channel. Only the envelope is modelled here; method
//! parameters stay as [`serde_json::Value`] and are interpreted by the caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Id {
    Number(i64),
    String(String),
}

impl From<i64> for Id {
    fn from(value: i64) -> Self {
        Id::Number(value)
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or_else(|_| Id::String(value.to_string()), Id::Number)
    }
}

/// A request or, when `id` is absent, a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Build a request that expects a response.
    #[must_use]
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    /// Build a notification (no response expected).
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: Some(params),
        }
    }

    /// Whether this message is a notification.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Error member of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// A response to a request.
///
/// `id` is serialized as `null` when the request id could not be determined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Successful response.
    #[must_use]
    pub fn success(id: Option<Id>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn error(id: Option<Id>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the result value or the error object.
    ///
    /// A response carrying neither member yields `Value::Null`.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Failure to classify an incoming frame.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid JSON-RPC envelope: {0}")]
    Envelope(String),
}

/// Any frame received on a JSON-RPC channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Parse a text frame, telling requests (they carry `method`) from responses.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text)?;
        let Some(object) = value.as_object() else {
            return Err(ParseError::Envelope("frame is not an object".to_string()));
        };

        if object.contains_key("method") {
            Ok(Message::Request(serde_json::from_value(value)?))
        } else if object.contains_key("result") || object.contains_key("error") {
            Ok(Message::Response(serde_json::from_value(value)?))
        } else {
            Err(ParseError::Envelope(
                "frame has neither method nor result/error".to_string(),
            ))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    #[allow(clippy::panic)]
    fn test_parse_request_with_numeric_id() {
        let msg = Message::parse(
            r#"{"jsonrpc":"2.0","id":7,"method":"customRequest","params":{"id":"play"}}"#,
        )
        .unwrap();

        match msg {
            Message::Request(req) => {
                assert_eq!(req.id, Some(Id::Number(7)));
                assert_eq!(req.method, "customRequest");
                assert_eq!(req.params, Some(json!({"id": "play"})));
                assert!(!req.is_notification());
            }
            Message::Response(_) => panic!("expected request"),
        }
    }

    #[test]
    fn test_parse_event_notification() {
        let msg = Message::parse(r#"{"jsonrpc":"2.0","method":"onEvent","params":{}}"#).unwrap();
        assert!(matches!(msg, Message::Request(ref r) if r.is_notification()));
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_parse_error_response() {
        let msg = Message::parse(
            r#"{"jsonrpc":"2.0","id":"abc","error":{"code":40101,"message":"Object not found"}}"#,
        )
        .unwrap();

        let Message::Response(resp) = msg else {
            panic!("expected response");
        };
        assert_eq!(resp.id, Some(Id::String("abc".to_string())));
        let err = resp.into_result().unwrap_err();
        assert_eq!(err.code, 40101);
        assert_eq!(err.message, "Object not found");
    }

    #[test]
    fn test_parse_rejects_non_object_and_garbage() {
        assert!(matches!(
            Message::parse("[1,2,3]"),
            Err(ParseError::Envelope(_))
        ));
        assert!(matches!(Message::parse("{not json"), Err(ParseError::Json(_))));
        assert!(matches!(
            Message::parse(r#"{"jsonrpc":"2.0","id":1}"#),
            Err(ParseError::Envelope(_))
        ));
    }

    #[test]
    fn test_error_response_serializes_null_id() {
        let resp = Response::error(None, ErrorObject::new(PARSE_ERROR, "Parse error"));
        let value = serde_json::to_value(&resp).unwrap();

        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["error"]["code"], json!(-32700));
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_notification_omits_id() {
        let note = Request::notification("iceCandidate", json!({"candidate": {}}));
        let value = serde_json::to_value(&note).unwrap();

        assert!(value.get("id").is_none());
        assert_eq!(value["method"], "iceCandidate");
    }

    #[test]
    fn test_response_without_members_is_null_result() {
        let resp: Response = serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .unwrap();
        assert_eq!(resp.into_result().unwrap(), Value::Null);
    }
}
