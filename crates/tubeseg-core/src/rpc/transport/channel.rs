//! In-process transport built from channels.
//!
//! Every successful connection attempt hands a [`ChannelPeer`] to whoever holds
//! the peer receiver, which then plays the backend: it reads request frames and
//! writes reply frames. Used to embed a backend in-process and by the tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::{FutureExt, SinkExt, StreamExt};
use futures::channel::mpsc as frame_mpsc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::rpc::messages::{HELLO_METHOD, RequestFrame, ResponseFrame};
use crate::rpc::{Connection, Connector, Endpoint, Result, RpcError};

#[derive(Debug)]
struct Shared {
    peers: mpsc::UnboundedSender<ChannelPeer>,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
}

/// Connector that pairs the session with an in-process peer.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    shared: Arc<Shared>,
}

impl ChannelConnector {
    /// Create a connector and the receiver on which peers are handed out.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelPeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let shared = Shared { peers, refusals: AtomicUsize::new(0), attempts: AtomicUsize::new(0) };
        (Self { shared: Arc::new(shared) }, peer_rx)
    }

    /// Refuse the next `count` connection attempts.
    #[must_use]
    pub fn with_refusals(self, count: usize) -> Self {
        self.shared.refusals.store(count, Ordering::SeqCst);
        self
    }

    /// Refuse every connection attempt.
    #[must_use]
    pub fn refusing_all(self) -> Self {
        self.with_refusals(usize::MAX)
    }

    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ChannelConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .shared
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RpcError::Transport("Connection refused".to_string()));
        }

        let (request_tx, request_rx) = frame_mpsc::unbounded::<String>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();

        let peer = ChannelPeer { endpoint: endpoint.clone(), requests: request_rx, replies: reply_tx };
        self.shared
            .peers
            .send(peer)
            .map_err(|_| RpcError::Transport("No peer is listening".to_string()))?;

        let sink = request_tx
            .sink_map_err(|e| RpcError::Transport(format!("Peer went away: {}", e)));
        let stream = UnboundedReceiverStream::new(reply_rx).map(Ok::<String, RpcError>);

        Ok(Connection { sink: Box::pin(sink), stream: Box::pin(stream) })
    }
}

/// The backend side of one channel connection.
#[derive(Debug)]
pub struct ChannelPeer {
    /// Endpoint the session asked for.
    pub endpoint: Endpoint,
    requests: frame_mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<String>,
}

impl ChannelPeer {
    /// Next request frame, or `None` once the session hung up.
    pub async fn next_request(&mut self) -> Option<RequestFrame> {
        let text = self.requests.next().await?;
        serde_json::from_str(&text).ok()
    }

    /// Request frames already written, without waiting.
    pub fn drain_requests(&mut self) -> Vec<RequestFrame> {
        let mut frames = Vec::new();
        while let Some(Some(text)) = self.requests.next().now_or_never() {
            if let Ok(frame) = serde_json::from_str(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.replies.send(text.into()).is_ok()
    }

    /// Send a reply frame.
    pub fn reply(&self, frame: &ResponseFrame) -> bool {
        frame.to_text().map(|text| self.send_text(text)).unwrap_or(false)
    }

    /// Answer `request` with `result`.
    pub fn respond(&self, request: &RequestFrame, result: Value) -> bool {
        self.reply(&ResponseFrame::success(&request.id, result))
    }

    /// Answer `request` with an error carrying an exception and trace.
    pub fn fail(&self, request: &RequestFrame, exception: &str, trace: &str) -> bool {
        let data = json!({ "exception": exception, "trace": trace });
        self.reply(&ResponseFrame::failure(&request.id, -32000, exception, Some(data)))
    }

    /// Publish `payload` on `topic`.
    pub fn publish(&self, topic: &str, seq: u64, payload: Value) -> bool {
        self.reply(&ResponseFrame::publication(topic, seq, payload))
    }

    /// Wait for the handshake and accept it, assigning `client_id`.
    pub async fn accept_hello(&mut self, client_id: &str) -> Option<RequestFrame> {
        let hello = self.next_request().await?;
        if hello.method != HELLO_METHOD {
            return None;
        }
        self.respond(&hello, json!({ "clientID": client_id }));
        Some(hello)
    }

    /// Wait for the handshake and reject it.
    pub async fn reject_hello(&mut self, reason: &str) -> Option<RequestFrame> {
        let hello = self.next_request().await?;
        self.reply(&ResponseFrame::failure(&hello.id, 403, reason, None));
        Some(hello)
    }
}
