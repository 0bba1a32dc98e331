//! wslink protocol frames.
//!
//! Every frame is a JSON text message tagged with `"wslink": "1.0"`. Requests
//! carry a method name and positional arguments; replies reuse the request id.
//! Publications look like replies but their id is `publish:<topic>:<n>`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::rpc::{RemoteError, Result, RpcError};

/// Protocol version written into every frame.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Method used for the connection handshake.
pub const HELLO_METHOD: &str = "wslink.hello";

/// Request id used for the handshake.
pub const HELLO_ID: &str = "system:c0:0";

const PUBLISH_PREFIX: &str = "publish:";

/// Outbound request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Protocol version.
    pub wslink: String,
    /// Request id, echoed back in the reply.
    pub id: String,
    /// Registered method name on the backend.
    pub method: String,
    /// Positional arguments.
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments (always empty for this client).
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl RequestFrame {
    /// Create a request with positional arguments.
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            wslink: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            args,
            kwargs: Map::new(),
        }
    }

    /// Build the handshake request.
    pub fn hello(secret: &str, application: &str) -> Self {
        let args = vec![serde_json::json!({ "secret": secret, "application": application })];
        Self::new(HELLO_ID, HELLO_METHOD, args)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Request id for the `seq`-th call issued by `client_id`.
pub fn request_id(client_id: &str, seq: u64) -> String {
    format!("rpc:{}:{}", client_id, seq)
}

/// Error object of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    /// Error code.
    #[serde(default)]
    pub code: i64,
    /// Error message.
    #[serde(default)]
    pub message: String,
    /// Optional details (`exception`, `trace`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Inbound reply or publication as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Protocol version.
    #[serde(default)]
    pub wslink: String,
    /// Id of the request this answers, or a publication id.
    pub id: String,
    /// Result on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl ResponseFrame {
    /// Successful reply.
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            wslink: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Failed reply.
    pub fn failure(id: impl Into<String>, code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            wslink: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            result: None,
            error: Some(WireError { code, message: message.into(), data }),
        }
    }

    /// Publication on `topic`.
    pub fn publication(topic: &str, seq: u64, payload: Value) -> Self {
        Self::success(format!("{}{}:{}", PUBLISH_PREFIX, topic, seq), payload)
    }

    /// Serialize to a text frame.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Reply to one of our requests.
    Response {
        /// Request id.
        id: String,
        /// Decoded outcome.
        outcome: std::result::Result<Value, RemoteError>,
    },
    /// Message pushed on a topic.
    Publication {
        /// Topic name.
        topic: String,
        /// Published value.
        payload: Value,
    },
}

impl Frame {
    /// Parse and classify an inbound text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("id").is_none() {
            return Err(RpcError::Protocol("Frame is missing an id".to_string()));
        }
        if value.get("method").is_some() {
            return Err(RpcError::Protocol(
                "Unexpected request frame from backend".to_string(),
            ));
        }

        let frame: ResponseFrame = serde_json::from_value(value)?;

        if let Some(rest) = frame.id.strip_prefix(PUBLISH_PREFIX) {
            let topic = match rest.rsplit_once(':') {
                Some((topic, _seq)) => topic,
                None => rest,
            };
            if topic.is_empty() {
                return Err(RpcError::Protocol(format!("Invalid publication id '{}'", frame.id)));
            }
            return Ok(Self::Publication {
                topic: topic.to_string(),
                payload: frame.result.unwrap_or(Value::Null),
            });
        }

        let outcome = match frame.error {
            Some(error) => Err(RemoteError::from_wire(error.code, error.message, error.data.as_ref())),
            None => Ok(frame.result.unwrap_or(Value::Null)),
        };
        Ok(Self::Response { id: frame.id, outcome })
    }
}

/// Handshake reply payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloResult {
    /// Client id assigned by the backend.
    #[serde(rename = "clientID")]
    pub client_id: String,
}
