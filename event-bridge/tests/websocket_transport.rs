//! Integration tests for `WebSocketTransport` against a mock hub server.
//!
//! The server implements just enough of the bridge endpoints
//! (negotiate, connect, start, abort) to exercise the handshake, the frame
//! pump and the abort on close.


use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use event_bridge::{
    BridgeConfig, ConnectionError, ConnectionIdentity, ConnectionState, SubscriptionDescriptor,
    SubscriptionError, SubscriptionSession,
};
use futures::{SinkExt, StreamExt};
use mock_bridge::{init_tracing, wait_until, Received, RecordingHandler};
use serde_json::{json, Value};
use warp::ws::{Message, WebSocket};
use warp::Filter;

const TOKEN: &str = "token/abc+1";

#[derive(Clone, Default)]
struct HubLog {
    connect_queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
    invoked: Arc<Mutex<Vec<String>>>,
    aborted: Arc<AtomicBool>,
}

async fn run_hub(socket: WebSocket, log: HubLog) {
    let (mut tx, mut rx) = socket.split();

    // Keep-alive before the init frame is skipped by the client
    let _ = tx.send(Message::text("{}")).await;
    let _ = tx.send(Message::text(r#"{"C":"s-0,1","S":1,"M":[]}"#)).await;

    while let Some(Ok(message)) = rx.next().await {
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };

        let frame: Value = serde_json::from_str(text).expect("invalid invocation frame");
        let method = frame["M"].as_str().unwrap_or_default().to_string();
        log.invoked.lock().unwrap().push(method.clone());

        let ack = json!({ "I": frame["I"], "R": true });
        let _ = tx.send(Message::text(ack.to_string())).await;

        if method == "CreateSubscription" {
            let push = json!({
                "C": "d-1",
                "M": [{
                    "H": "Outbound",
                    "M": "OnBusinessEventReceived",
                    "A": [{ "temperature": 72.0, "id": 42, "label": "ok" }]
                }]
            });
            let _ = tx.send(Message::text(push.to_string())).await;
        }
    }
}

fn start_hub(log: HubLog, start_reply: &'static str) -> SocketAddr {
    let negotiate = warp::path!("eventbridge" / "negotiate")
        .and(warp::get())
        .map(|| {
            warp::reply::json(&json!({
                "Url": "/eventbridge",
                "ConnectionToken": TOKEN,
                "ConnectionId": "c-1",
                "ProtocolVersion": "1.5",
                "TryWebSockets": true
            }))
        });

    let connect_log = log.clone();
    let connect = warp::path!("eventbridge" / "connect")
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .map(move |ws: warp::ws::Ws, query: HashMap<String, String>| {
            connect_log.connect_queries.lock().unwrap().push(query);
            let log = connect_log.clone();
            ws.on_upgrade(move |socket| run_hub(socket, log))
        });

    let start = warp::path!("eventbridge" / "start")
        .and(warp::get())
        .map(move || warp::reply::json(&json!({ "Response": start_reply })));

    let abort_log = log;
    let abort = warp::path!("eventbridge" / "abort")
        .and(warp::post())
        .map(move || {
            abort_log.aborted.store(true, Ordering::SeqCst);
            warp::reply()
        });

    let routes = negotiate.or(connect).or(start).or(abort);
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    addr
}

fn session(
    addr: SocketAddr,
    handler: Arc<RecordingHandler>,
    config: BridgeConfig,
) -> SubscriptionSession {
    init_tracing();
    SubscriptionSession::for_bridge(
        &format!("http://{}/eventbridge/", addr),
        ConnectionIdentity::new("token-123", "app-456"),
        SubscriptionDescriptor::new("Rust event gateway", "true"),
        handler,
        config.with_connect_timeout(Duration::from_secs(5)),
    )
    .expect("valid bridge URL")
}

#[tokio::test]
async fn test_websocket_subscription_lifecycle() {
    let log = HubLog::default();
    let addr = start_hub(log.clone(), "started");
    let handler = RecordingHandler::new();
    let session = session(addr, handler.clone(), BridgeConfig::default());

    session.start_receiving().await.expect("start failed");
    assert_eq!(session.state(), ConnectionState::Connected);

    assert!(wait_until(|| handler.count() == 1).await);
    assert_eq!(
        handler.received(),
        vec![Received::BusinessEvent(
            json!({ "temperature": 72.0, "id": 42, "label": "ok" })
        )]
    );

    session.stop_receiving().await.expect("stop failed");
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(
        log.invoked.lock().unwrap().clone(),
        vec!["CreateSubscription", "StopSubscription"]
    );
    assert!(wait_until(|| log.aborted.load(Ordering::SeqCst)).await);

    let query = log.connect_queries.lock().unwrap()[0].clone();
    assert_eq!(query["transport"], "webSockets");
    assert_eq!(query["clientProtocol"], "1.5");
    assert_eq!(query["connectionToken"], TOKEN);
    assert_eq!(query["connectionData"], r#"[{"name":"outbound"}]"#);
}

#[tokio::test]
async fn test_abort_can_be_disabled() {
    let log = HubLog::default();
    let addr = start_hub(log.clone(), "started");
    let session = session(
        addr,
        RecordingHandler::new(),
        BridgeConfig::default().with_abort_on_close(false),
    );

    session.start_receiving().await.unwrap();
    session.stop_receiving().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!log.aborted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_unexpected_start_reply_fails_handshake() {
    let log = HubLog::default();
    let addr = start_hub(log.clone(), "pending");
    let session = session(addr, RecordingHandler::new(), BridgeConfig::default());

    let error = session.start_receiving().await.unwrap_err();
    assert!(matches!(
        error,
        SubscriptionError::Connection(ConnectionError::Handshake(_))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(log.invoked.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_negotiate_failure() {
    init_tracing();
    // Nothing listens under this path
    let addr = start_hub(HubLog::default(), "started");
    let session = SubscriptionSession::for_bridge(
        &format!("http://{}/elsewhere/", addr),
        ConnectionIdentity::new("t", "a"),
        SubscriptionDescriptor::new("d", "true"),
        RecordingHandler::new(),
        BridgeConfig::default(),
    )
    .unwrap();

    let error = session.start_receiving().await.unwrap_err();
    assert!(matches!(
        error,
        SubscriptionError::Connection(ConnectionError::Negotiate(_))
    ));
    assert_eq!(session.state(), ConnectionState::Disconnected);
}
