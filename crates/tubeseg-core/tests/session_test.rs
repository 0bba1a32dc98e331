//! Session lifecycle over the channel transport and a real WebSocket.

mod common;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tubeseg_core::rpc::messages::{HELLO_METHOD, RequestFrame, ResponseFrame};
use tubeseg_core::rpc::transport::{ChannelConnector, WebSocketConnector};
use tubeseg_core::{Endpoint, ImageId, RpcError, Session, SessionConfig, SessionState, TubeApi};

#[tokio::test]
async fn test_queued_capability_calls_keep_issuance_order() {
    let (connector, mut peers) = ChannelConnector::new();
    let session = Session::new(common::test_config(3), connector);
    let api = TubeApi::new(&session);

    let load = tokio::spawn(api.load_file("/data/a.mha"));
    let save = tokio::spawn(api.save_tubes(ImageId(1), "/tmp/a.tre"));
    let unload = tokio::spawn(api.unload_image(ImageId(1)));

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    let mut peer = peers.recv().await.unwrap();
    let hello = peer.next_request().await.unwrap();
    assert!(peer.drain_requests().is_empty());
    assert_eq!(session.state(), SessionState::Connecting);
    peer.respond(&hello, json!({ "clientID": "c3" }));
    connecting.await.unwrap().unwrap();

    let first = common::answer(&mut peer, TubeApi::LOAD_FILE, json!(1)).await;
    let second = common::answer(&mut peer, TubeApi::SAVE_TUBES, json!(null)).await;
    let third = common::answer(&mut peer, TubeApi::UNLOAD_IMAGE, json!(null)).await;
    assert_eq!([first.id, second.id, third.id], ["rpc:c3:1", "rpc:c3:2", "rpc:c3:3"]);

    assert_eq!(load.await.unwrap().unwrap(), ImageId(1));
    save.await.unwrap().unwrap();
    unload.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_retry_bound_is_exact() {
    for bound in [1, 3, 10] {
        let (connector, _peers) = ChannelConnector::new();
        let connector = connector.refusing_all();
        let session = Session::new(common::test_config(bound), connector.clone());

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, RpcError::Connection(_)));
        assert_eq!(connector.attempts(), bound as usize);
        assert_eq!(session.state(), SessionState::Failed);
    }
}

#[tokio::test]
async fn test_second_connect_makes_no_attempt() {
    let (connector, _peers) = ChannelConnector::new();
    let session = Session::new(common::test_config(2), connector.clone().refusing_all());
    session.connect().await.unwrap_err();
    let attempts = connector.attempts();

    assert!(matches!(session.connect().await, Err(RpcError::Connection(_))));
    assert_eq!(connector.attempts(), attempts);
}

#[tokio::test]
async fn test_state_transitions_are_observable() {
    let (connector, mut peers) = ChannelConnector::new();
    let session = Session::new(common::test_config(2), connector);
    let mut states = session.watch_state();
    assert_eq!(*states.borrow_and_update(), SessionState::Disconnected);

    let connecting = tokio::spawn({
        let session = session.clone();
        async move { session.connect().await }
    });
    states.wait_for(|s| *s == SessionState::Connecting).await.unwrap();

    let mut peer = peers.recv().await.unwrap();
    peer.accept_hello("c0").await.unwrap();
    connecting.await.unwrap().unwrap();
    states.wait_for(|s| *s == SessionState::Ready).await.unwrap();

    drop(peer);
    states.wait_for(|s| *s == SessionState::Failed).await.unwrap();
}

fn websocket_config(port: u16) -> SessionConfig {
    let mut config = common::test_config(3);
    config.endpoint = Endpoint {
        host: "127.0.0.1".to_string(),
        port,
        application: "tubetk".to_string(),
        secret: "wslink-secret".to_string(),
    };
    config
}

/// Minimal wslink backend: accepts one client, knows `app.load_file`.
async fn serve_one_client(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let request: RequestFrame = serde_json::from_str(&text).unwrap();
        let reply = match request.method.as_str() {
            HELLO_METHOD => {
                assert_eq!(request.args[0]["application"], "tubetk");
                ResponseFrame::success(&request.id, json!({ "clientID": "ws1" }))
            }
            TubeApi::LOAD_FILE => ResponseFrame::success(&request.id, json!(1)),
            _ => ResponseFrame::failure(&request.id, -32601, "Unknown method", None),
        };
        if ws.send(Message::Text(reply.to_text().unwrap().into())).await.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn test_websocket_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve_one_client(listener));

    let session = Session::new(websocket_config(port), WebSocketConnector::new());
    session.connect().await.unwrap();
    let api = TubeApi::new(&session);

    assert_eq!(api.load_file("/data/a.mha").await.unwrap(), ImageId(1));

    match session.call("app.unknown", vec![]).await {
        Err(RpcError::Remote(remote)) => assert_eq!(remote.code, -32601),
        other => panic!("Expected remote error, got {:?}", other),
    }

    session.close();
    session.watch_state().wait_for(|s| *s == SessionState::Failed).await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_websocket_server_going_away_fails_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let Some(Ok(Message::Text(text))) = ws.next().await else {
            panic!("expected handshake");
        };
        let hello: RequestFrame = serde_json::from_str(&text).unwrap();
        let reply = ResponseFrame::success(&hello.id, json!({ "clientID": "ws2" }));
        ws.send(Message::Text(reply.to_text().unwrap().into())).await.unwrap();
        ws.close(None).await.ok();
    });

    let session = Session::new(websocket_config(port), WebSocketConnector::new());
    session.connect().await.unwrap();
    server.await.unwrap();

    session.watch_state().wait_for(|s| *s == SessionState::Failed).await.unwrap();
    assert!(matches!(session.call("app.load_file", vec![]).await, Err(RpcError::Connection(_))));
}
