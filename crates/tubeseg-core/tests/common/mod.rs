//! Shared helpers for the TubeSeg Core integration tests.
//!
//! The backend is played by a [`ChannelPeer`] the test drives by hand, so every
//! test decides exactly when each reply arrives.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tubeseg_core::rpc::messages::RequestFrame;
use tubeseg_core::rpc::transport::{ChannelConnector, ChannelPeer};
use tubeseg_core::{Endpoint, ImageSource, RetryPolicy, SegmentationEditor, Session, SessionConfig, TubeApi};

/// Session settings with a fast retry loop.
pub fn test_config(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        endpoint: Endpoint {
            host: "127.0.0.1".to_string(),
            port: 9000,
            application: "tubetk".to_string(),
            secret: "wslink-secret".to_string(),
        },
        retry: RetryPolicy {
            max_attempts,
            interval: Duration::from_millis(5),
            handshake_timeout: Duration::from_secs(2),
        },
        call_timeout: Some(Duration::from_secs(5)),
    }
}

/// A ready session and the peer standing in for the backend.
pub async fn connected() -> (Session, ChannelPeer) {
    let (connector, mut peers) = ChannelConnector::new();
    let session = Session::new(test_config(3), connector);
    let server = tokio::spawn(async move {
        let mut peer = peers.recv().await.expect("session never connected");
        peer.accept_hello("c0").await.expect("no handshake");
        peer
    });
    session.connect().await.expect("handshake failed");
    (session, server.await.unwrap())
}

/// A ready session wrapped in an editor.
pub async fn editor() -> (Arc<SegmentationEditor>, ChannelPeer) {
    let (session, peer) = connected().await;
    (Arc::new(SegmentationEditor::new(TubeApi::new(&session))), peer)
}

/// Read the next request and check its method.
pub async fn expect(peer: &mut ChannelPeer, method: &str) -> RequestFrame {
    let request = tokio::time::timeout(Duration::from_secs(2), peer.next_request())
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {method}"))
        .expect("session hung up");
    assert_eq!(request.method, method, "unexpected request {request:?}");
    request
}

/// Answer the next request, which must be `method`, with `result`.
pub async fn answer(peer: &mut ChannelPeer, method: &str, result: Value) -> RequestFrame {
    let request = expect(peer, method).await;
    peer.respond(&request, result);
    request
}

pub fn source(id: &str) -> ImageSource {
    ImageSource::new(id, format!("/data/{id}.mha"))
}

/// Segment reply carrying a tube with `points` points.
pub fn tube_reply(uid: i64, points: usize) -> Value {
    let coords: Vec<[f64; 3]> = (0..points).map(|i| [i as f64, 0.0, 0.0]).collect();
    json!({ "uid": uid, "points": coords, "radii": vec![1.0; points] })
}

/// Select `id` and answer its load with `image`.
pub async fn select_loaded(editor: &Arc<SegmentationEditor>, peer: &mut ChannelPeer, id: &str, image: i64) {
    let selecting = tokio::spawn({
        let editor = Arc::clone(editor);
        let source = source(id);
        async move { editor.select_image(Some(source)).await }
    });
    answer(peer, TubeApi::LOAD_FILE, json!(image)).await;
    selecting.await.unwrap().expect("select failed");
}

/// Segment on the active image and play the reply.
pub async fn segment_added(
    editor: &Arc<SegmentationEditor>,
    peer: &mut ChannelPeer,
    uid: i64,
) -> tubeseg_core::SegmentOutcome {
    let segmenting = tokio::spawn({
        let editor = Arc::clone(editor);
        async move { editor.segment_at([1, 2, 3]).await }
    });
    answer(peer, TubeApi::SEGMENT, tube_reply(uid, 3)).await;
    segmenting.await.unwrap().expect("segment failed")
}
