//! Error types for backend sessions.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// Errors that can occur while talking to the backend.
///
/// `Clone` so a single failed load can be reported to every caller sharing it.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    /// The session could not be established, was established twice, or dropped.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend answered a call with an error.
    #[error("Remote call error: {0}")]
    Remote(RemoteError),

    /// No reply arrived within the configured call timeout.
    #[error("Call to '{method}' timed out after {after:?}")]
    Timeout {
        /// Method that was called.
        method: String,
        /// The timeout that expired.
        after: Duration,
    },

    /// The transport failed to send or receive a frame.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame did not follow the wslink protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl RpcError {
    /// Whether this error came back from the backend rather than the client side.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }

    /// Human readable text for the output log.
    ///
    /// Remote errors show the backend exception and trace when they were sent,
    /// everything else falls back to `Display`.
    pub fn log_message(&self) -> String {
        match self {
            Self::Remote(remote) => remote.log_message(),
            other => other.to_string(),
        }
    }
}

/// Failure payload of a remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Error code reported by the backend.
    pub code: i64,
    /// Short message reported by the backend.
    pub message: String,
    /// Exception text, if the backend attached one.
    pub exception: Option<String>,
    /// Stack trace, if the backend attached one.
    pub trace: Option<String>,
}

impl RemoteError {
    /// Build a remote error from the wire `error` object.
    pub fn from_wire(code: i64, message: String, data: Option<&Value>) -> Self {
        let field = |name: &str| {
            data.and_then(|d| d.get(name))
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        Self { code, message, exception: field("exception"), trace: field("trace") }
    }

    /// `exception\ntrace` when the backend sent details, otherwise the message.
    pub fn log_message(&self) -> String {
        match (&self.exception, &self.trace) {
            (Some(exception), Some(trace)) => format!("{}\n{}", exception, trace),
            (Some(exception), None) => exception.clone(),
            _ => self.message.clone(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)
    }
}
