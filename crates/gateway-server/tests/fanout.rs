//! End-to-end tests: real axum server, real WebSocket clients.

use futures_util::{SinkExt, StreamExt};
use gateway_core::{EchoPolicy, Hub, HubHandle};
use gateway_server::config::Config;
use gateway_server::handlers::{serve, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Gateway {
    addr: SocketAddr,
    hub: HubHandle,
}

impl Gateway {
    async fn start(config: Config) -> Self {
        let (hub, _task) = Hub::spawn(config.hub_config());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(AppState::new(config, hub.clone()));
        tokio::spawn(serve(listener, state));
        Self { addr, hub }
    }

    async fn with_echo(echo: EchoPolicy) -> Self {
        let mut config = Config::default();
        config.hub.echo = echo;
        Self::start(config).await
    }

    fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn connect(&self) -> Client {
        let (client, _) = connect_async(self.url()).await.unwrap();
        client
    }

    /// Connect `n` clients and wait until the hub has registered all of them.
    async fn connect_many(&self, n: usize) -> Vec<Client> {
        let mut clients = Vec::with_capacity(n);
        for _ in 0..n {
            clients.push(self.connect().await);
        }
        self.wait_for_members(n).await;
        clients
    }

    async fn wait_for_members(&self, n: usize) {
        tokio::time::timeout(WAIT, async {
            while self.hub.stats().await.unwrap().members != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("hub never reached {n} members"));
    }
}

async fn next_message(client: &mut Client) -> Message {
    loop {
        let message = tokio::time::timeout(WAIT, client.next())
            .await
            .expect("timed out waiting for a message")
            .expect("stream ended")
            .expect("websocket error");
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

async fn next_text(client: &mut Client) -> String {
    match next_message(client).await {
        Message::Text(text) => text,
        other => panic!("expected text, got {other:?}"),
    }
}

async fn assert_silent(client: &mut Client) {
    let next = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(next.is_err(), "unexpected message: {next:?}");
}

#[tokio::test]
async fn test_broadcast_then_disconnect() {
    let gateway = Gateway::with_echo(EchoPolicy::ExcludeSender).await;
    let mut clients = gateway.connect_many(3).await;
    let mut c = clients.pop().unwrap();
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    a.send(Message::Text("hello".into())).await.unwrap();

    assert_eq!(next_text(&mut b).await, "hello");
    assert_eq!(next_text(&mut c).await, "hello");
    assert_silent(&mut a).await;
    assert_silent(&mut b).await;
    assert_silent(&mut c).await;

    b.close(None).await.unwrap();
    gateway.wait_for_members(2).await;

    a.send(Message::Text("again".into())).await.unwrap();
    assert_eq!(next_text(&mut c).await, "again");
    assert_silent(&mut a).await;

    let stats = gateway.hub.stats().await.unwrap();
    assert_eq!(stats.broadcasts, 2);
    assert_eq!(stats.deliveries, 3);
    assert_eq!(stats.evictions, 0);
}

#[tokio::test]
async fn test_include_sender_echoes_back() {
    let gateway = Gateway::with_echo(EchoPolicy::IncludeSender).await;
    let mut clients = gateway.connect_many(2).await;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    a.send(Message::Text("echo".into())).await.unwrap();

    assert_eq!(next_text(&mut a).await, "echo");
    assert_eq!(next_text(&mut b).await, "echo");
}

#[tokio::test]
async fn test_sender_order_is_preserved() {
    let gateway = Gateway::with_echo(EchoPolicy::ExcludeSender).await;
    let mut clients = gateway.connect_many(2).await;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    for i in 0..50 {
        a.send(Message::Text(format!("m{i}"))).await.unwrap();
    }
    for i in 0..50 {
        assert_eq!(next_text(&mut b).await, format!("m{i}"));
    }
}

#[tokio::test]
async fn test_binary_frames_stay_binary() {
    let gateway = Gateway::with_echo(EchoPolicy::ExcludeSender).await;
    let mut clients = gateway.connect_many(2).await;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    a.send(Message::Binary(vec![0, 1, 2, 255])).await.unwrap();

    assert_eq!(next_message(&mut b).await, Message::Binary(vec![0, 1, 2, 255]));
}

#[tokio::test]
async fn test_oversized_message_disconnects_sender() {
    let mut config = Config::default();
    config.limits.max_message_size = 16;
    let gateway = Gateway::start(config).await;
    let mut clients = gateway.connect_many(2).await;
    let mut b = clients.pop().unwrap();
    let mut a = clients.pop().unwrap();

    a.send(Message::Text("x".repeat(64))).await.unwrap();

    gateway.wait_for_members(1).await;
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn test_connection_limit_refuses_upgrade() {
    let mut config = Config::default();
    config.limits.max_connections = 1;
    let gateway = Gateway::start(config).await;

    let _first = gateway.connect_many(1).await;
    assert!(connect_async(gateway.url()).await.is_err());
}

#[tokio::test]
async fn test_health_reports_hub_stats() {
    let gateway = Gateway::with_echo(EchoPolicy::ExcludeSender).await;
    let _clients = gateway.connect_many(2).await;

    let mut stream = TcpStream::connect(gateway.addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("\"status\":\"ok\""));
    assert!(response.contains("\"connections\":2"));
    assert!(response.contains("\"sockets\":2"));
}
