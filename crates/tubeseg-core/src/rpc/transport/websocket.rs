//! WebSocket transport for the wslink backend.

use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use crate::rpc::{Connection, Connector, Endpoint, Result, RpcError};

/// Connects to `ws://host:port/ws` with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Connection> {
        let url = endpoint.url();
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RpcError::Transport(format!("Failed to connect to {}: {}", url, e)))?;
        debug!(url = %url, "WebSocket connected");

        let (ws_sink, ws_stream) = ws_stream.split();

        let sink = ws_sink
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into()))))
            .sink_map_err(|e| RpcError::Transport(format!("Failed to send frame: {}", e)));

        let stream = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    // Ping/pong are answered by tungstenite; binary attachments are unused.
                    Ok(_) => None,
                    Err(e) => Some(Err(RpcError::Transport(format!("Failed to read frame: {}", e)))),
                })
            });

        Ok(Connection { sink: Box::pin(sink), stream: Box::pin(stream) })
    }
}
