use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parlance_client::channel::{
    ChannelLink, ConnectionState, RealtimeChannel, Transport, TransportConnection, WsTransport,
};
use parlance_client::error::ClientError;
use parlance_common::protocol::events::{
    ClientEvent, MessageEvent, PresenceEvent, SendMessagePayload, WireFrame,
};
use parlance_common::types::{AuthToken, MessageType};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;

const TOKEN: &str = "good-token";
const PEER: Uuid = Uuid::from_u128(2);

async fn upgrade(ws: WebSocketUpgrade, headers: HeaderMap) -> Response {
    let expected = format!("Bearer {TOKEN}");
    if headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some(expected.as_str()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(serve_socket)
}

/// Greets with a presence event and a junk frame, then echoes every
/// `send_message` back as `message_sent`.
async fn serve_socket(mut socket: WebSocket) {
    let hello = json!({ "event": "user_online", "data": { "userId": PEER, "username": "peer" } });
    if socket.send(WsMessage::Text(hello.to_string().into())).await.is_err() {
        return;
    }
    let _ = socket.send(WsMessage::Text("definitely not json".into())).await;
    let _ = socket
        .send(WsMessage::Text(json!({ "event": "mystery", "data": {} }).to_string().into()))
        .await;

    while let Some(Ok(message)) = socket.recv().await {
        match message {
            WsMessage::Text(text) => {
                let Ok(frame) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                if frame["event"] != "send_message" {
                    continue;
                }
                let data = &frame["data"];
                let echo = json!({
                    "event": "message_sent",
                    "data": {
                        "id": Uuid::new_v4(),
                        "conversationId": Uuid::from_u128(0xc0),
                        "sender": { "id": Uuid::from_u128(1), "username": "me" },
                        "receiver": { "id": data["receiverId"], "username": "peer" },
                        "content": data["content"],
                        "messageType": data["messageType"],
                        "createdAt": "2026-03-01T12:00:00Z",
                        "updatedAt": "2026-03-01T12:00:00Z"
                    }
                });
                if socket.send(WsMessage::Text(echo.to_string().into())).await.is_err() {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
}

async fn start() -> (Url, JoinHandle<()>) {
    let app = Router::new().route("/", get(upgrade));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("listener should bind");
    let addr = listener.local_addr().expect("listener should expose local address");
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("ws server should run");
    });
    (Url::parse(&format!("ws://{addr}/")).expect("ws url should parse"), task)
}

fn payload(content: &str) -> SendMessagePayload {
    SendMessagePayload {
        receiver_id: PEER,
        content: content.into(),
        message_type: MessageType::Text,
        metadata: None,
    }
}

async fn next_frame(connection: &mut impl TransportConnection) -> WireFrame {
    timeout(Duration::from_secs(2), connection.recv())
        .await
        .expect("frame should arrive")
        .expect("session should stay open")
        .expect("frame should decode")
}

#[tokio::test]
async fn ws_transport_carries_named_json_frames() {
    let (url, server) = start().await;
    let transport = WsTransport::new(url);

    let mut connection = transport.open(&AuthToken::new(TOKEN)).await.expect("handshake");

    // The junk text frame is skipped; the unknown event still decodes as a frame.
    let hello = next_frame(&mut connection).await;
    assert_eq!(hello.event, "user_online");
    assert_eq!(next_frame(&mut connection).await.event, "mystery");

    let frame = ClientEvent::SendMessage(payload("ping")).to_frame().expect("encode");
    connection.send(frame).await.expect("send should succeed");

    let echo = next_frame(&mut connection).await;
    assert_eq!(echo.event, "message_sent");
    assert_eq!(echo.data["content"], "ping");

    connection.close().await;
    server.abort();
}

#[tokio::test]
async fn ws_transport_rejected_credential_is_transport_error() {
    let (url, server) = start().await;
    let transport = WsTransport::new(url);

    let err = transport.open(&AuthToken::new("wrong")).await.err().expect("handshake refused");

    assert!(matches!(err, ClientError::Transport(_)), "got {err:?}");
    server.abort();
}

#[tokio::test]
async fn realtime_channel_round_trip_over_websocket() {
    let (url, server) = start().await;
    let channel = RealtimeChannel::new(WsTransport::new(url));
    let mut presence = channel.subscribe_presence();
    let mut messages = channel.subscribe_messages();

    channel.connect(&AuthToken::new(TOKEN)).await.expect("connect should succeed");
    assert_eq!(channel.state(), ConnectionState::Connected);

    let online = timeout(Duration::from_secs(2), presence.recv()).await.unwrap().unwrap();
    assert!(matches!(online, PresenceEvent::Online(ref p) if p.user_id == PEER));

    channel.send_message(payload("hola")).expect("channel is connected");
    let echo = timeout(Duration::from_secs(2), messages.recv()).await.unwrap().unwrap();
    assert!(matches!(echo, MessageEvent::Sent(ref m) if m.content == "hola"));

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(channel.send_message(payload("late")), Err(ClientError::NotConnected));
    server.abort();
}

#[tokio::test]
async fn realtime_channel_reports_refused_handshake() {
    let (url, server) = start().await;
    let channel = RealtimeChannel::new(WsTransport::new(url));
    let mut errors = channel.subscribe_errors();

    channel.connect(&AuthToken::new("wrong")).await.expect_err("handshake refused");

    assert_eq!(channel.state(), ConnectionState::Disconnected);
    let error = timeout(Duration::from_secs(2), errors.recv()).await.unwrap().unwrap();
    assert!(error.message().contains("websocket connect failed"));
    server.abort();
}
