//! Backend session over the wslink protocol.
//!
//! The [`Session`] owns the single connection to the analysis backend. It
//! retries the handshake a bounded number of times, queues calls issued before
//! the handshake completes and releases them in issuance order once ready.

pub mod error;
pub mod messages;
pub mod session;
pub mod subscription;
pub mod transport;

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use futures::{Sink, Stream};
use serde::{Deserialize, Serialize};

pub use error::{RemoteError, Result, RpcError};
pub use session::{CallHandle, Session, SubscriptionHandle};
pub use subscription::Subscription;

/// Default number of handshake attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Default delay between handshake attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// `connect` has not been called yet.
    Disconnected,
    /// Handshake attempts are in progress.
    Connecting,
    /// The handshake completed; calls are dispatched.
    Ready,
    /// Terminal: retries were exhausted, or the connection dropped or was closed.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where the backend listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Application id sent with the handshake.
    pub application: String,
    /// Shared secret expected by the backend.
    pub secret: String,
}

impl Endpoint {
    /// WebSocket URL of the backend session.
    pub fn url(&self) -> String {
        format!("ws://{}:{}/ws", self.host, self.port)
    }
}

/// Handshake retry policy. There is no backoff: the backend is local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total handshake attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before every attempt after the first.
    pub interval: Duration,
    /// Upper bound on a single handshake attempt.
    pub handshake_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything a [`Session`] needs besides its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Backend endpoint.
    pub endpoint: Endpoint,
    /// Handshake retry policy.
    pub retry: RetryPolicy,
    /// Client-side limit on a single call, measured from issuance.
    pub call_timeout: Option<Duration>,
}

/// Outgoing half of a connection: text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RpcError> + Send>>;

/// Incoming half of a connection: text frames until the peer closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established transport connection, split into its two halves.
pub struct Connection {
    /// Frames to the backend.
    pub sink: FrameSink,
    /// Frames from the backend.
    pub stream: FrameStream,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

/// Opens transport connections to the backend.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection. Each call is one transport-level attempt.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection>;
}
