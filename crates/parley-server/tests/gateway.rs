//! End-to-end tests driving the WebSocket gateway with a real client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_core::SessionId;
use parley_server::handlers::{Connector, default_dictionary};
use parley_server::{ParleyServer, RouteDictionary, RouteTable};
use parley_settings::ParleySettings;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a server on an ephemeral port and return its WS URL.
async fn boot_server() -> (String, Arc<ParleyServer>) {
    let mut settings = ParleySettings::default();
    settings.server.host = "127.0.0.1".into();
    settings.server.port = 0;

    let mut routes = RouteTable::builder();
    routes.register_component("connector", &Connector).unwrap();
    let dictionary = RouteDictionary::from_map(default_dictionary()).unwrap();

    let server = Arc::new(ParleyServer::from_settings(
        &settings,
        routes.build(),
        dictionary,
    ));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Read the next text message as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Connect and complete the handshake. Returns the handshake reply.
async fn connect_ready(url: &str) -> (WsStream, Value) {
    let mut ws = connect(url).await;
    send_json(
        &mut ws,
        json!({
            "type": "handshake",
            "sys": {"platform": "mac", "libVersion": "0.3.5", "clientVersion": "2.1"},
            "user": {"age": 30}
        }),
    )
    .await;
    let reply = read_json(&mut ws).await;
    (ws, reply)
}

/// Send a request and read frames until its response arrives.
async fn call(ws: &mut WsStream, id: u64, route: Value, body: Value) -> Value {
    send_json(ws, json!({"type": "request", "id": id, "route": route, "body": body})).await;
    loop {
        let frame = read_json(ws).await;
        if frame["type"] == "response" && frame["id"] == id {
            return frame;
        }
    }
}

/// Poll until `check` passes or the timeout elapses.
async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn handshake_reply_carries_heartbeat_and_dictionary() {
    let (url, server) = boot_server().await;
    let (_ws, reply) = connect_ready(&url).await;

    assert_eq!(reply["type"], "handshake");
    assert_eq!(reply["code"], 200);
    assert_eq!(reply["sys"]["heartbeat"], 30);
    assert_eq!(reply["sys"]["dict"]["connector.getsessiondata"], 1);
    assert_eq!(reply["sys"]["dict"]["onMembers"], 5);
    assert!(reply["sys"]["session"].is_string());

    eventually(|| server.dispatcher().sessions().active_count() == 1).await;
}

#[tokio::test]
async fn request_before_handshake_is_refused() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    send_json(&mut ws, json!({"id": 1, "route": "connector.getsessiondata"})).await;

    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "response");
    assert_eq!(frame["success"], false);
    assert_eq!(frame["error"]["kind"], "ValidationError");

    // The server closes the connection afterwards.
    let next = timeout(TIMEOUT, ws.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    assert!(server.dispatcher().sessions().is_empty());
}

#[tokio::test]
async fn handshake_data_is_visible_to_handlers() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    let resp = call(&mut ws, 1, json!("connector.gethandshakedata"), json!({})).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["body"]["sys"]["platform"], "mac");
    assert_eq!(resp["body"]["sys"]["clientVersion"], "2.1");
    assert_eq!(resp["body"]["user"]["age"], 30);
}

// ── Session data ────────────────────────────────────────────────────

#[tokio::test]
async fn set_then_get_session_data() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    let resp = call(&mut ws, 1, json!("connector.setsessiondata"), json!({"key1": 10})).await;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["body"], json!({"Code": 200, "Msg": "success"}));

    let resp = call(&mut ws, 2, json!("connector.getsessiondata"), json!({})).await;
    assert_eq!(resp["body"], json!({"Data": {"key1": 10}}));
}

#[tokio::test]
async fn numeric_route_uses_dictionary() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    let resp = call(&mut ws, 1, json!(2), json!({"Data": {"level": 3}})).await;
    assert_eq!(resp["success"], true);
    let resp = call(&mut ws, 2, json!(1), json!({})).await;
    assert_eq!(resp["body"]["Data"]["level"], 3);
}

#[tokio::test]
async fn unknown_route_code_is_route_not_found() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    let resp = call(&mut ws, 1, json!(999), json!({})).await;
    assert_eq!(resp["error"]["kind"], "RouteNotFound");
}

#[tokio::test]
async fn notify_gets_no_response_but_applies() {
    let (url, server) = boot_server().await;
    let (mut ws, reply) = connect_ready(&url).await;
    let session_id = SessionId::from(reply["sys"]["session"].as_str().unwrap());
    send_json(
        &mut ws,
        json!({"type": "notify", "route": "connector.notifysessiondata", "body": {"k": true}}),
    )
    .await;

    let sessions = server.dispatcher().sessions().clone();
    eventually(|| {
        sessions
            .get_data(&session_id)
            .is_ok_and(|data| data.contains_key("k"))
    })
    .await;

    // The next frame is the reply to this request, not a notify response.
    send_json(&mut ws, json!({"id": 5, "route": "connector.getsessiondata"})).await;
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["id"], 5);
    assert_eq!(frame["body"]["Data"]["k"], true);
}

#[tokio::test]
async fn pipelined_requests_are_answered_in_order() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    for i in 0..10u64 {
        send_json(
            &mut ws,
            json!({"id": i * 2 + 1, "route": "connector.setsessiondata", "body": {"step": i}}),
        )
        .await;
        send_json(&mut ws, json!({"id": i * 2 + 2, "route": "connector.getsessiondata"})).await;
    }

    for i in 0..10u64 {
        let set = read_json(&mut ws).await;
        assert_eq!(set["id"], i * 2 + 1);
        assert_eq!(set["success"], true);
        let get = read_json(&mut ws).await;
        assert_eq!(get["id"], i * 2 + 2);
        assert_eq!(get["body"]["Data"]["step"], i);
    }
}

// ── Errors ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_route_is_route_not_found() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    let resp = call(&mut ws, 1, json!("connector.unknown"), json!({})).await;
    assert_eq!(resp["success"], false);
    assert_eq!(resp["error"]["kind"], "RouteNotFound");
    assert_eq!(resp["error"]["code"], "PIT-404");
}

#[tokio::test]
async fn handler_error_message_is_verbatim() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    let resp = call(&mut ws, 1, json!("connector.geterror"), json!({})).await;
    assert_eq!(resp["error"]["kind"], "HandlerError");
    assert_eq!(resp["error"]["message"], "GetError is returning a custom error");
}

#[tokio::test]
async fn invalid_frame_is_validation_error_and_connection_survives() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    ws.send(Message::text("not json at all")).await.unwrap();
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["error"]["kind"], "ValidationError");
    assert_eq!(frame["error"]["code"], "PIT-400");

    let resp = call(&mut ws, 2, json!("connector.getsessiondata"), json!({})).await;
    assert_eq!(resp["success"], true);
}

#[tokio::test]
async fn non_utf8_binary_frame_is_validation_error_and_connection_survives() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    ws.send(Message::binary(vec![0xff, 0xfe, 0x00])).await.unwrap();
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["success"], false);
    assert_eq!(frame["error"]["kind"], "ValidationError");
    assert_eq!(frame["error"]["code"], "PIT-400");

    let resp = call(&mut ws, 2, json!("connector.getsessiondata"), json!({})).await;
    assert_eq!(resp["success"], true);
}

#[tokio::test]
async fn non_utf8_binary_handshake_is_refused_with_error_frame() {
    let (url, server) = boot_server().await;
    let mut ws = connect(&url).await;
    ws.send(Message::binary(vec![0xc3, 0x28])).await.unwrap();

    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "response");
    assert_eq!(frame["error"]["kind"], "ValidationError");
    assert_eq!(frame["error"]["code"], "PIT-400");

    let next = timeout(TIMEOUT, ws.next()).await.unwrap();
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    assert!(server.dispatcher().sessions().is_empty());
}

#[tokio::test]
async fn set_data_rejects_non_object() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    let resp = call(&mut ws, 1, json!("connector.setsessiondata"), json!("nope")).await;
    assert_eq!(resp["error"]["kind"], "ValidationError");
    assert_eq!(resp["error"]["code"], "CN-000");
    assert_eq!(resp["error"]["metadata"]["failed"], "set data");
}

// ── Push ────────────────────────────────────────────────────────────

#[tokio::test]
async fn send_push_delivers_push_and_reply() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    send_json(&mut ws, json!({"id": 1, "route": "connector.sendpush"})).await;

    let mut push = None;
    let mut response = None;
    while push.is_none() || response.is_none() {
        let frame = read_json(&mut ws).await;
        match frame["type"].as_str() {
            Some("push") => push = Some(frame),
            Some("response") => response = Some(frame),
            other => panic!("unexpected frame type {other:?}"),
        }
    }
    let push = push.unwrap();
    assert_eq!(push["route"], "some.push.route");
    assert_eq!(push["body"], json!({"key1": 10, "key2": true}));
    assert_eq!(response.unwrap()["body"], json!({"Code": 200, "Msg": "Ok"}));
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn clients_have_independent_sessions() {
    let (url, server) = boot_server().await;
    let (mut a, reply_a) = connect_ready(&url).await;
    let (mut b, reply_b) = connect_ready(&url).await;
    assert_ne!(reply_a["sys"]["session"], reply_b["sys"]["session"]);

    let _ = call(&mut a, 1, json!("connector.setsessiondata"), json!({"who": "a"})).await;
    let resp = call(&mut b, 1, json!("connector.getsessiondata"), json!({})).await;
    assert_eq!(resp["body"]["Data"], json!({}));

    eventually(|| server.gateway().connections() == 2).await;
}

#[tokio::test]
async fn disconnect_removes_session() {
    let (url, server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;
    eventually(|| server.dispatcher().sessions().len() == 1).await;

    ws.close(None).await.unwrap();
    eventually(|| server.dispatcher().sessions().is_empty()).await;
    eventually(|| server.gateway().connections() == 0).await;
}

#[tokio::test]
async fn shutdown_closes_connections() {
    let (url, server) = boot_server().await;
    let (mut ws, _) = connect_ready(&url).await;

    let report = server
        .shutdown_gracefully(Vec::new(), Some(Duration::from_secs(2)))
        .await;
    assert_eq!(report.sessions_closed, 1);
    assert!(server.dispatcher().sessions().is_empty());

    // Drain until the server-side close arrives.
    loop {
        match timeout(TIMEOUT, ws.next()).await.unwrap() {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
            Some(Ok(_)) => {}
        }
    }
}
