//! End-to-end protocol tests over a real TCP listener.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    missing_docs
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use greenhouse_core::{NodeManager, SensorEngine};
use greenhouse_server::{
    ClientRegistry, ConnectionSettings, Dispatcher, FileUserService, ServerConfig, bind,
    local_addr, serve,
};
use greenhouse_types::SensorUpdate;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const INTERVAL_MS: u64 = 30;

struct TestServer {
    addr: SocketAddr,
    engine: Arc<SensorEngine>,
    _shutdown: watch::Sender<bool>,
}

async fn launch(max_line_bytes: usize) -> TestServer {
    let nodes = Arc::new(NodeManager::new(INTERVAL_MS));
    let registry = Arc::new(ClientRegistry::new());
    let (update_tx, mut update_rx) = mpsc::channel::<SensorUpdate>(1_024);
    let engine = Arc::new(SensorEngine::new(Arc::clone(&nodes), update_tx));

    let forward = Arc::clone(&registry);
    tokio::spawn(async move {
        while let Some(update) = update_rx.recv().await {
            forward.broadcast_sensor_update(&update).await;
        }
    });

    let dispatcher = Arc::new(Dispatcher::new(
        nodes,
        Arc::clone(&engine),
        registry,
        Arc::new(FileUserService::in_memory()),
        "it-house",
    ));

    let config = ServerConfig {
        host: String::from("127.0.0.1"),
        port: 0,
        connection: ConnectionSettings {
            max_line_bytes,
            ..ConnectionSettings::default()
        },
    };
    let listener = bind(&config).await.unwrap();
    let addr = local_addr(&listener).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(serve(listener, dispatcher, config.connection, shutdown_rx));

    TestServer {
        addr,
        engine,
        _shutdown: shutdown_tx,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    pending: Vec<u8>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, writer) = stream.into_split();
        let mut client = Self {
            reader: BufReader::new(read),
            writer,
            pending: Vec::new(),
        };
        let greeting = client.recv().await;
        assert_eq!(greeting["type"], "welcome");
        assert!(greeting.get("id").is_none());
        client
    }

    async fn handshake(addr: SocketAddr) -> Self {
        let mut client = Self::connect(addr).await;
        let reply = client
            .request(json!({"type": "hello", "id": "h", "clientId": "it", "user": "tester"}))
            .await;
        assert_eq!(reply["type"], "welcome");
        assert_eq!(reply["id"], "h");
        client
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    async fn request(&mut self, message: Value) -> Value {
        self.send_raw(&message.to_string()).await;
        self.recv().await
    }

    async fn recv(&mut self) -> Value {
        self.recv_within(Duration::from_secs(3))
            .await
            .expect("no line from server")
    }

    async fn recv_within(&mut self, wait: Duration) -> Option<Value> {
        // A timed-out read_until keeps partial bytes in `pending`.
        match timeout(wait, self.reader.read_until(b'\n', &mut self.pending)).await {
            Ok(Ok(n)) if n > 0 => {
                let line = std::mem::take(&mut self.pending);
                Some(serde_json::from_slice(&line).unwrap())
            }
            _ => None,
        }
    }

    /// Read and discard lines until none arrives within `quiet`. Gives up
    /// after a bounded number of lines.
    async fn drain(&mut self, quiet: Duration) {
        for _ in 0..50 {
            if self.recv_within(quiet).await.is_none() {
                return;
            }
        }
    }

    /// Next line whose `type` matches, skipping pushes of other kinds.
    async fn recv_type(&mut self, kind: &str, wait: Duration) -> Option<Value> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let left = deadline.saturating_duration_since(tokio::time::Instant::now());
            let value = self.recv_within(left).await?;
            if value["type"] == kind {
                return Some(value);
            }
        }
    }
}

#[tokio::test]
async fn create_node_then_stream_sensor_updates() {
    let server = launch(65_536).await;
    let mut client = Client::handshake(server.addr).await;

    let ack = client
        .request(json!({"type": "subscribe", "id": "s0", "events": ["node_change"], "nodes": ["*"]}))
        .await;
    assert_eq!(ack["type"], "ack");

    let ack = client
        .request(json!({
            "type": "create_node",
            "id": "c1",
            "node": {"name": "N1", "sensors": ["temperature"], "actuators": ["fan"]}
        }))
        .await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["id"], "c1");
    let node_id = ack["nodeId"].as_str().unwrap().to_owned();
    assert!(server.engine.is_scheduled(&node_id.as_str().into()));

    let change = client.recv().await;
    assert_eq!(change["type"], "node_change");
    assert_eq!(change["op"], "added");
    assert_eq!(change["nodeId"], node_id.as_str());

    let ack = client
        .request(json!({"type": "subscribe", "id": "s1", "events": ["sensor_update"], "nodes": [node_id]}))
        .await;
    assert_eq!(ack["id"], "s1");

    let update = client
        .recv_type("sensor_update", Duration::from_millis(INTERVAL_MS * 2 + 500))
        .await
        .expect("no sensor update");
    assert_eq!(update["nodeId"], node_id.as_str());
    assert!(update["data"]["temperature"].is_number());
    assert!(update["timestamp"].as_i64().unwrap() > 0);
    assert!(update.get("id").is_none());
}

#[tokio::test]
async fn invalid_json_keeps_connection_usable() {
    let server = launch(65_536).await;
    let mut client = Client::handshake(server.addr).await;

    client.send_raw("{not json").await;
    let error = client.recv().await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_JSON");

    let pong = client.request(json!({"type": "ping", "id": 42})).await;
    assert_eq!(pong["type"], "pong");
    assert_eq!(pong["id"], 42);
}

#[tokio::test]
async fn handshake_is_required() {
    let server = launch(65_536).await;
    let mut client = Client::connect(server.addr).await;
    let reply = client.request(json!({"type": "get_topology", "id": "t"})).await;
    assert_eq!(reply["code"], "HANDSHAKE_REQUIRED");
    assert_eq!(reply["id"], "t");
}

#[tokio::test]
async fn over_long_line_is_rejected_once() {
    let server = launch(64).await;
    let mut client = Client::handshake(server.addr).await;
    client.send_raw(&"x".repeat(200)).await;
    let error = client.recv().await;
    assert_eq!(error["code"], "LINE_TOO_LONG");
    let pong = client.request(json!({"type": "ping", "id": "p"})).await;
    assert_eq!(pong["type"], "pong");
}

#[tokio::test]
async fn node_filter_and_wildcard_subscriptions() {
    let server = launch(65_536).await;
    let mut owner = Client::handshake(server.addr).await;
    let mut watcher = Client::handshake(server.addr).await;
    let mut everything = Client::handshake(server.addr).await;

    owner
        .request(json!({"type": "create_node", "id": 1, "node": {"id": "node-1"}}))
        .await;
    owner
        .request(json!({"type": "create_node", "id": 2, "node": {"id": "node-2"}}))
        .await;

    watcher
        .request(json!({"type": "subscribe", "id": "w", "events": ["sensor_update"], "nodes": ["node-2"]}))
        .await;
    everything
        .request(json!({"type": "subscribe", "id": "e", "events": ["node_change"], "nodes": ["*"]}))
        .await;

    for _ in 0..5 {
        let update = watcher
            .recv_type("sensor_update", Duration::from_secs(1))
            .await
            .expect("watcher got no update");
        assert_eq!(update["nodeId"], "node-2");
    }

    let ack = owner
        .request(json!({"type": "update_node", "id": 3, "nodeId": "node-1", "patch": {"name": "Renamed"}}))
        .await;
    assert_eq!(ack["type"], "ack");
    let change = everything
        .recv_type("node_change", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(change["op"], "updated");
    assert_eq!(change["node"]["name"], "Renamed");

    watcher
        .request(json!({"type": "unsubscribe", "id": "u", "events": ["sensor_update"], "nodes": ["node-2"]}))
        .await;
    // Drain anything queued before the unsubscribe was applied.
    watcher.drain(Duration::from_millis(INTERVAL_MS * 3)).await;
    assert!(
        watcher
            .recv_within(Duration::from_millis(INTERVAL_MS * 5))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn delete_stops_updates_and_announces_removal() {
    let server = launch(65_536).await;
    let mut client = Client::handshake(server.addr).await;
    client
        .request(json!({"type": "create_node", "id": "c", "node": {"id": "gone"}}))
        .await;
    client
        .request(json!({"type": "subscribe", "id": "s", "nodes": ["gone"]}))
        .await;
    assert!(
        client
            .recv_type("sensor_update", Duration::from_secs(1))
            .await
            .is_some()
    );

    client.send_raw(&json!({"type": "delete_node", "id": "d", "nodeId": "gone"}).to_string()).await;
    let ack = client.recv_type("ack", Duration::from_secs(1)).await.unwrap();
    assert_eq!(ack["id"], "d");
    let removal = client
        .recv_type("node_change", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(removal["op"], "removed");
    assert!(!server.engine.is_scheduled(&"gone".into()));
    client.drain(Duration::from_millis(INTERVAL_MS * 3)).await;

    assert!(
        client
            .recv_type("sensor_update", Duration::from_millis(INTERVAL_MS * 5))
            .await
            .is_none()
    );

    let topology = client.request(json!({"type": "get_topology", "id": "t"})).await;
    assert_eq!(topology["nodes"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn set_sampling_reschedules_single_ticker() {
    let server = launch(65_536).await;
    let mut client = Client::handshake(server.addr).await;
    client
        .request(json!({"type": "create_node", "id": "c", "node": {"id": "n"}}))
        .await;
    let ack = client
        .request(json!({"type": "set_sampling", "id": "s", "nodeId": "n", "intervalMs": 5}))
        .await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(server.engine.scheduled_count(), 1);

    let ack = client
        .request(json!({"type": "set_sampling", "id": "s2", "nodeId": "missing", "intervalMs": 5}))
        .await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(server.engine.scheduled_count(), 1);
}
