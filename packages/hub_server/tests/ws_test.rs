use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use channel_hub::{DispatcherConfig, ShardedDispatcher};
use hub_server::metrics::ServerMetrics;
use hub_server::presence::PresenceTracker;
use hub_server::{AppState, build_router};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    http: reqwest::Client,
    _dispatcher: ShardedDispatcher,
}

impl TestServer {
    async fn start() -> Self {
        let presence = Arc::new(PresenceTracker::new());
        let mut dispatcher =
            ShardedDispatcher::new(2, DispatcherConfig::default(), presence.clone());
        let state = AppState {
            dispatcher: dispatcher.start(),
            presence,
            metrics: Arc::new(ServerMetrics::new()),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(state)).await.unwrap();
        });

        Self {
            addr,
            http: reqwest::Client::new(),
            _dispatcher: dispatcher,
        }
    }

    async fn subscribe(&self, path: &str) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        socket
    }

    async fn publish(&self, channel: &str, body: Value) -> reqwest::StatusCode {
        self.http
            .post(format!("http://{}/api/channels/{}/messages", self.addr, channel))
            .json(&body)
            .send()
            .await
            .unwrap()
            .status()
    }

    async fn get(&self, path: &str) -> Value {
        self.http
            .get(format!("http://{}{}", self.addr, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    /// Poll until `channel` has `count` subscribers. The upgrade finishes
    /// before the client is registered.
    async fn wait_for_subscribers(&self, channel: &str, count: u64) {
        for _ in 0..100 {
            let channels = self.get("/api/channels").await;
            let current = channels
                .as_array()
                .unwrap()
                .iter()
                .find(|c| c["name"] == channel)
                .and_then(|c| c["subscribers"].as_u64())
                .unwrap_or(0);
            if current == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("channel {} never reached {} subscribers", channel, count);
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_frame(socket: &mut Socket) -> Value {
    let deadline = Duration::from_secs(5);
    loop {
        let message = tokio::time::timeout(deadline, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn assert_silent(socket: &mut Socket) {
    let quiet = tokio::time::timeout(Duration::from_millis(200), socket.next()).await;
    assert!(quiet.is_err(), "unexpected frame: {:?}", quiet);
}

#[tokio::test]
async fn test_publish_reaches_only_its_channel() {
    let server = TestServer::start().await;
    let mut orders_a = server.subscribe("/ws/orders").await;
    let mut orders_b = server.subscribe("/ws/orders").await;
    let mut reports = server.subscribe("/ws/reports").await;
    server.wait_for_subscribers("orders", 2).await;
    server.wait_for_subscribers("reports", 1).await;

    let status = server
        .publish(
            "orders",
            json!({"operation": "created", "kind": "json", "payload": {"id": 42}}),
        )
        .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);

    for socket in [&mut orders_a, &mut orders_b] {
        let frame = next_frame(socket).await;
        assert_eq!(frame["channel"], "orders");
        assert_eq!(frame["operation"], "created");
        assert_eq!(frame["data"]["id"], 42);
    }
    assert_silent(&mut reports).await;
}

#[tokio::test]
async fn test_heartbeat_presence_on_gateway() {
    let server = TestServer::start().await;
    let mut gateway = server.subscribe("/ws/gateway").await;
    server.wait_for_subscribers("gateway", 1).await;

    let mut heartbeat = server.subscribe("/ws/heartbeat?key=K1").await;
    let online = next_frame(&mut gateway).await;
    assert_eq!(online["operation"], "online");
    assert_eq!(online["kind"], "presence");
    assert_eq!(online["data"], json!({"key": "K1", "online": true}));

    let presence = server.get("/api/presence").await;
    assert_eq!(presence["online"], json!(["K1"]));

    heartbeat.close(None).await.unwrap();
    let offline = next_frame(&mut gateway).await;
    assert_eq!(offline["operation"], "offline");
    assert_eq!(offline["data"], json!({"key": "K1", "online": false}));

    let presence = server.get("/api/presence").await;
    assert_eq!(presence["online"], json!([]));
}

#[tokio::test]
async fn test_unsupported_kind_delivers_nothing() {
    let server = TestServer::start().await;
    let mut orders = server.subscribe("/ws/orders").await;
    server.wait_for_subscribers("orders", 1).await;

    let status = server
        .publish("orders", json!({"operation": "created", "kind": "xml", "payload": "<o/>"}))
        .await;
    assert_eq!(status, reqwest::StatusCode::ACCEPTED);
    assert_silent(&mut orders).await;

    let metrics = server.get("/metrics").await;
    assert_eq!(metrics["dispatcher"]["messages_rejected"], 1);

    // a well-formed publish still goes through
    server
        .publish("orders", json!({"operation": "created", "kind": "text", "payload": "o-1"}))
        .await;
    let frame = next_frame(&mut orders).await;
    assert_eq!(frame["data"], "o-1");
}

#[tokio::test]
async fn test_closed_socket_is_unregistered() {
    let server = TestServer::start().await;
    let mut orders = server.subscribe("/ws/orders").await;
    server.wait_for_subscribers("orders", 1).await;

    orders.close(None).await.unwrap();
    server.wait_for_subscribers("orders", 0).await;
}
