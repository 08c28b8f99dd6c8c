//! Integration tests for the relay server.
//!
//! These tests run `RelayServer` on a real TCP port and talk to it with
//! `tokio-tungstenite` clients and raw HTTP/1.1 requests.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use relay_core::{Identity, RoutingMode, ANONYMOUS_PREFIX};
use relayd::config::RelayConfig;
use relayd::hub::{spawn_hub, HubHandle};
use relayd::server::{RelayServer, ServerError};
use relayd::store::{MemoryStore, MessageStore};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any single frame or condition
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Interval between polls
const POLL_INTERVAL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server context that manages server lifecycle.
struct TestServer {
    addr: SocketAddr,
    hub: HubHandle,
    cancel_token: CancellationToken,
    task: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    async fn spawn(mode: RoutingMode, with_store: bool) -> Self {
        let config = RelayConfig {
            mode,
            ..RelayConfig::default()
        };
        let store: Option<Arc<dyn MessageStore>> = if with_store {
            Some(Arc::new(MemoryStore::new()))
        } else {
            None
        };

        let hub = spawn_hub(config.mode, config.command_buffer);
        let cancel_token = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().unwrap();

        let server = RelayServer::new(&config, hub.clone(), store, cancel_token.clone());
        let task = tokio::spawn(server.serve(listener));

        TestServer {
            addr,
            hub,
            cancel_token,
            task,
        }
    }

    /// Connects a named client and waits until it holds its identity.
    async fn connect(&self, username: &str) -> Ws {
        let identity = Identity::new(username);
        let previous = self.hub.lookup(identity.clone()).await;

        let url = format!("ws://{}/ws?username={username}", self.addr);
        let (ws, _response) = connect_async(url).await.expect("websocket connect");

        let start = tokio::time::Instant::now();
        loop {
            let current = self.hub.lookup(identity.clone()).await;
            if current.is_some() && current != previous {
                return ws;
            }
            assert!(start.elapsed() < WAIT_TIMEOUT, "{username} never registered");
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Connects with a raw query string and waits for one more member.
    async fn connect_with_query(&self, query: &str) -> Ws {
        let before = self.hub.members().await.len();

        let url = format!("ws://{}/ws{query}", self.addr);
        let (ws, _response) = connect_async(url).await.expect("websocket connect");

        let start = tokio::time::Instant::now();
        while self.hub.members().await.len() <= before {
            assert!(start.elapsed() < WAIT_TIMEOUT, "connection never registered");
            sleep(POLL_INTERVAL).await;
        }
        ws
    }

    /// Sends a raw HTTP/1.1 request and returns (status, headers, body).
    async fn http(&self, method: &str, path: &str) -> (u16, String, String) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: {}\r\nOrigin: http://example.test\r\n\
             Content-Length: 0\r\nConnection: close\r\n\r\n",
            self.addr
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut raw = String::new();
        timeout(WAIT_TIMEOUT, stream.read_to_string(&mut raw))
            .await
            .expect("http response timed out")
            .unwrap();

        let (head, body) = raw.split_once("\r\n\r\n").expect("http response");
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status code");
        (status, head.to_ascii_lowercase(), body.to_string())
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        let result = timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(result.is_ok());
    }
}

async fn send(ws: &mut Ws, json: &str) {
    ws.send(Message::Text(json.to_string())).await.unwrap();
}

/// Next text frame, parsed as JSON. Control frames are skipped.
async fn recv_json(ws: &mut Ws) -> Value {
    loop {
        let frame = timeout(WAIT_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// Waits for the server's close frame (or the stream ending).
async fn expect_close(ws: &mut Ws) {
    loop {
        match timeout(WAIT_TIMEOUT, ws.next()).await.expect("no close frame") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(_)) => continue,
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let next = timeout(Duration::from_millis(100), ws.next()).await;
    assert!(next.is_err(), "expected no frame, got {next:?}");
}

// ============================================================================
// Direct Mode
// ============================================================================

#[tokio::test]
async fn test_direct_message_end_to_end() {
    let server = TestServer::spawn(RoutingMode::Direct, true).await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send(
        &mut alice,
        r#"{"sender":"mallory","recipient":"bob","content":"hi bob","extra":1}"#,
    )
    .await;

    let msg = recv_json(&mut bob).await;
    assert_eq!(msg["sender"], "alice");
    assert_eq!(msg["recipient"], "bob");
    assert_eq!(msg["content"], "hi bob");
    assert!(msg["timestamp"].is_string());

    assert_silent(&mut alice).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_undecodable_frame_keeps_connection() {
    let server = TestServer::spawn(RoutingMode::Direct, false).await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send(&mut alice, "this is not json").await;
    send(&mut alice, r#"{"recipient":"bob","content":"after garbage"}"#).await;

    let msg = recv_json(&mut bob).await;
    assert_eq!(msg["content"], "after garbage");
    assert!(msg.get("timestamp").is_none());

    server.shutdown().await;
}

#[tokio::test]
async fn test_missing_username_gets_anonymous_identity() {
    let server = TestServer::spawn(RoutingMode::Direct, false).await;
    let _anon = server.connect_with_query("").await;
    let _blank = server.connect_with_query("?username=%20%20").await;

    let members = server.hub.members().await;
    assert_eq!(members.len(), 2);
    assert!(members
        .iter()
        .all(|m| m.identity.as_str().starts_with(ANONYMOUS_PREFIX)));

    server.shutdown().await;
}

#[tokio::test]
async fn test_second_login_closes_first() {
    let server = TestServer::spawn(RoutingMode::Direct, false).await;
    let mut first = server.connect("alice").await;
    let mut second = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    expect_close(&mut first).await;

    send(&mut bob, r#"{"recipient":"alice","content":"which one?"}"#).await;
    assert_eq!(recv_json(&mut second).await["content"], "which one?");

    server.shutdown().await;
}

// ============================================================================
// Broadcast Mode
// ============================================================================

#[tokio::test]
async fn test_broadcast_room() {
    let server = TestServer::spawn(RoutingMode::Broadcast, false).await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    assert_eq!(recv_json(&mut alice).await["content"], "bob joined");

    let mut carol = server.connect("carol").await;
    assert_eq!(recv_json(&mut alice).await["content"], "carol joined");
    assert_eq!(recv_json(&mut bob).await["content"], "carol joined");

    send(&mut alice, r#"{"content":"hello room"}"#).await;
    assert_eq!(recv_json(&mut bob).await["content"], "hello room");
    assert_eq!(recv_json(&mut carol).await["content"], "hello room");
    assert_silent(&mut alice).await;

    bob.close(None).await.unwrap();
    assert_eq!(recv_json(&mut alice).await["content"], "bob left");

    server.shutdown().await;
}

// ============================================================================
// Query Surface
// ============================================================================

#[tokio::test]
async fn test_history_and_chats() {
    let server = TestServer::spawn(RoutingMode::Direct, true).await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;

    send(&mut alice, r#"{"recipient":"bob","content":"one"}"#).await;
    recv_json(&mut bob).await;
    send(&mut bob, r#"{"recipient":"alice","content":"two"}"#).await;
    recv_json(&mut alice).await;
    send(&mut alice, r#"{"recipient":"carol","content":"offline"}"#).await;

    // Persistence is asynchronous; poll until all three are visible
    let start = tokio::time::Instant::now();
    let history = loop {
        let (status, _, body) = server.http("GET", "/history?username=alice&receiver=bob").await;
        assert_eq!(status, 200);
        let history: Vec<Value> = serde_json::from_str(&body).unwrap();
        let (_, _, chats) = server.http("GET", "/chats?username=alice").await;
        let chats: Vec<Value> = serde_json::from_str(&chats).unwrap();
        if history.len() == 2 && chats.len() == 2 {
            break history;
        }
        assert!(start.elapsed() < WAIT_TIMEOUT, "history never caught up");
        sleep(POLL_INTERVAL).await;
    };

    assert_eq!(history[0]["content"], "one");
    assert_eq!(history[0]["sender"], "alice");
    assert_eq!(history[1]["content"], "two");
    assert!(history.iter().all(|m| m["id"].is_i64()));

    // The browser client uses POST
    let (status, _, body) = server.http("POST", "/chats?username=alice").await;
    assert_eq!(status, 200);
    let chats: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        chats,
        serde_json::json!([{ "username": "bob" }, { "username": "carol" }])
    );

    server.shutdown().await;
}

#[tokio::test]
async fn test_query_errors() {
    let server = TestServer::spawn(RoutingMode::Direct, true).await;

    let (status, _, body) = server.http("GET", "/history?username=alice").await;
    assert_eq!(status, 400);
    assert!(body.contains("receiver"));

    let (status, _, _) = server.http("GET", "/chats?username=%20").await;
    assert_eq!(status, 400);

    server.shutdown().await;

    let no_store = TestServer::spawn(RoutingMode::Direct, false).await;
    let (status, _, _) = no_store.http("GET", "/history?username=a&receiver=b").await;
    assert_eq!(status, 503);
    let (status, _, _) = no_store.http("POST", "/chats?username=a").await;
    assert_eq!(status, 503);
    no_store.shutdown().await;
}

#[tokio::test]
async fn test_health_and_cors() {
    let server = TestServer::spawn(RoutingMode::Broadcast, false).await;
    let _alice = server.connect("alice").await;

    let (status, head, body) = server.http("GET", "/health").await;
    assert_eq!(status, 200);
    assert!(head.contains("access-control-allow-origin: *"));

    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["mode"], "broadcast");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["persistence"], false);

    server.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let server = TestServer::spawn(RoutingMode::Direct, true).await;
    let mut alice = server.connect("alice").await;
    let mut bob = server.connect("bob").await;
    let hub = server.hub.clone();

    server.cancel_token.cancel();
    expect_close(&mut alice).await;
    expect_close(&mut bob).await;
    drop(alice);
    drop(bob);

    let result = timeout(Duration::from_secs(10), server.task)
        .await
        .expect("server did not stop")
        .unwrap();
    assert!(result.is_ok());
    assert!(!hub.is_running());
}
