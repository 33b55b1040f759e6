//! Connection Lifecycle Integration Tests
//!
//! Drives the connection manager over an in-memory transport: joins, leaves,
//! heartbeats, token renewal, self-healing and quote delivery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};

use intrinio_realtime::{
    AuthError, Channel, ClientConfig, ClientError, ConnectionManager, ConnectionState,
    Credentials, FeedTransport, FrameChunk, FrameSink, FrameSource, SocketEvent, Token,
    TokenProvider, TransportError,
};

const WAIT: Duration = Duration::from_secs(5);

// =============================================================================
// In-memory transport
// =============================================================================

/// What the client wrote to a socket.
#[derive(Debug)]
enum Sent {
    Chunk(FrameChunk),
    Close(u16, String),
}

/// Test-side view of one opened socket.
struct SocketHandle {
    url: String,
    sent: mpsc::UnboundedReceiver<Sent>,
    inbound: mpsc::UnboundedSender<Result<SocketEvent, TransportError>>,
}

impl SocketHandle {
    /// Read one complete outbound message and parse it as JSON.
    async fn next_message(&mut self) -> Value {
        let mut bytes = Vec::new();
        loop {
            match timeout(WAIT, self.sent.recv()).await.unwrap().unwrap() {
                Sent::Chunk(chunk) => {
                    bytes.extend_from_slice(&chunk.data);
                    if chunk.end_of_message {
                        return serde_json::from_slice(&bytes).unwrap();
                    }
                }
                Sent::Close(code, reason) => {
                    panic!("expected a message, socket closed with {code} {reason}")
                }
            }
        }
    }

    /// Wait for the client to close this socket.
    async fn expect_close(&mut self) -> (u16, String) {
        loop {
            match timeout(WAIT, self.sent.recv()).await.unwrap().unwrap() {
                Sent::Chunk(_) => {}
                Sent::Close(code, reason) => return (code, reason),
            }
        }
    }

    fn push_text(&self, text: &str) {
        self.inbound
            .send(Ok(SocketEvent::Fragment {
                data: text.as_bytes().to_vec(),
                end_of_message: true,
            }))
            .unwrap();
    }

    fn push_close(&self, code: u16) {
        self.inbound
            .send(Ok(SocketEvent::Closed { code: Some(code) }))
            .unwrap();
    }
}

struct FakeTransport {
    opened: mpsc::UnboundedSender<SocketHandle>,
    /// When set, every sink rejects outbound chunks. Closing still works.
    failing_sends: Arc<AtomicBool>,
}

impl FakeTransport {
    fn new() -> (Self, mpsc::UnboundedReceiver<SocketHandle>) {
        let (opened, sockets) = mpsc::unbounded_channel();
        let transport = Self {
            opened,
            failing_sends: Arc::default(),
        };
        (transport, sockets)
    }
}

struct FakeSink {
    tx: mpsc::UnboundedSender<Sent>,
    failing_sends: Arc<AtomicBool>,
}

struct FakeSource {
    rx: mpsc::UnboundedReceiver<Result<SocketEvent, TransportError>>,
}

#[async_trait]
impl FeedTransport for FakeTransport {
    type Sink = FakeSink;
    type Source = FakeSource;

    async fn open(&self, url: &str) -> Result<(FakeSink, FakeSource), TransportError> {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        self.opened
            .send(SocketHandle {
                url: url.to_string(),
                sent: sent_rx,
                inbound: inbound_tx,
            })
            .map_err(|_| TransportError::Connect("test dropped".to_string()))?;

        let sink = FakeSink {
            tx: sent_tx,
            failing_sends: Arc::clone(&self.failing_sends),
        };
        Ok((sink, FakeSource { rx: inbound_rx }))
    }
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_chunk(&mut self, chunk: FrameChunk) -> Result<(), TransportError> {
        if self.failing_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("broken pipe".to_string()));
        }
        self.tx
            .send(Sent::Chunk(chunk))
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.tx
            .send(Sent::Close(code, reason.to_string()))
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn next_event(&mut self) -> Result<SocketEvent, TransportError> {
        self.rx
            .recv()
            .await
            .unwrap_or(Ok(SocketEvent::Closed { code: None }))
    }
}

/// Token provider that hands out `tok-1`, `tok-2`, ... or fails on demand.
#[derive(Clone, Default)]
struct FakeTokens {
    calls: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    /// Response latency in milliseconds.
    latency_ms: Arc<AtomicU64>,
}

#[async_trait]
impl TokenProvider for FakeTokens {
    async fn fetch_token(&self) -> Result<Token, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AuthError::ServerError(503));
        }
        Ok(Token::new(format!("tok-{n}")))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> ClientConfig {
    ClientConfig::new(Credentials::new("user".to_string(), "pass".to_string()))
}

type Manager = ConnectionManager<FakeTransport, FakeTokens>;

async fn connect(
    config: ClientConfig,
) -> (Manager, FakeTokens, mpsc::UnboundedReceiver<SocketHandle>) {
    let tokens = FakeTokens::default();
    let (transport, sockets) = FakeTransport::new();
    let manager = ConnectionManager::start(config, tokens.clone(), transport)
        .await
        .unwrap();
    (manager, tokens, sockets)
}

async fn next_socket(sockets: &mut mpsc::UnboundedReceiver<SocketHandle>) -> SocketHandle {
    timeout(WAIT, sockets.recv()).await.unwrap().unwrap()
}

fn quote_json(ticker: &str, price: &str) -> String {
    json!({
        "topic": format!("iex:securities:{ticker}"),
        "event": "quote",
        "payload": {
            "ticker": ticker,
            "type": "last",
            "price": price,
            "size": "100",
            "timestamp": 1_700_000_000
        },
        "ref": null
    })
    .to_string()
}

fn topics(messages: &[Value]) -> Vec<String> {
    let mut topics: Vec<String> = messages
        .iter()
        .map(|m| m["topic"].as_str().unwrap().to_string())
        .collect();
    topics.sort();
    topics
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_start_connects_with_token_in_url() {
    let (manager, tokens, mut sockets) = connect(test_config()).await;
    let socket = next_socket(&mut sockets).await;

    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    assert!(socket.url.starts_with("wss://realtime.intrinio.com:443/socket/websocket?"));
    assert!(socket.url.contains("vsn=1.0.0"));
    assert!(socket.url.contains("token=tok-1"));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_join_sends_phx_join() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;

    manager.join(["AAPL"]).await.unwrap();

    let message = socket.next_message().await;
    assert_eq!(message["topic"], "iex:securities:AAPL");
    assert_eq!(message["event"], "phx_join");
    assert_eq!(message["payload"], json!({}));
    assert!(message["ref"].is_string());

    assert_eq!(
        manager.list_channels().await,
        vec![Channel::parse("AAPL").unwrap()]
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn test_join_lobby_uses_firehose_topic() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;

    manager.join(["$lobby"]).await.unwrap();

    let message = socket.next_message().await;
    assert_eq!(message["topic"], "iex:lobby");
    manager.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_join_registers_once() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let _socket = next_socket(&mut sockets).await;

    manager.join(["AAPL", "AAPL", " AAPL "]).await.unwrap();

    assert_eq!(manager.list_channels().await.len(), 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_join_stores_nothing() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;

    let err = manager
        .join(["AAPL", "THIS_NAME_IS_FAR_TOO_LONG"])
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidChannel(_)));
    assert!(manager.list_channels().await.is_empty());

    // Nothing was sent for the rejected batch.
    manager.join(["MSFT"]).await.unwrap();
    let message = socket.next_message().await;
    assert_eq!(message["topic"], "iex:securities:MSFT");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_leave_of_unregistered_channel_sends_nothing() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;

    manager.leave(["MSFT"]).await.unwrap();
    manager.join(["AAPL"]).await.unwrap();

    let message = socket.next_message().await;
    assert_eq!(message["event"], "phx_join");
    assert_eq!(message["topic"], "iex:securities:AAPL");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_leave_sends_phx_leave_and_unregisters() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;

    manager.join(["AAPL", "MSFT"]).await.unwrap();
    socket.next_message().await;
    socket.next_message().await;

    manager.leave(["AAPL"]).await.unwrap();
    let message = socket.next_message().await;
    assert_eq!(message["event"], "phx_leave");
    assert_eq!(message["topic"], "iex:securities:AAPL");
    assert_eq!(
        manager.list_channels().await,
        vec![Channel::parse("MSFT").unwrap()]
    );

    manager.leave_all().await.unwrap();
    let message = socket.next_message().await;
    assert_eq!(message["topic"], "iex:securities:MSFT");
    assert!(manager.list_channels().await.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_peer_close_reconnects_and_rejoins() {
    let (manager, tokens, mut sockets) = connect(test_config()).await;
    let mut first = next_socket(&mut sockets).await;
    let mut errors = manager.errors();

    manager.join(["AAPL", "MSFT"]).await.unwrap();
    first.next_message().await;
    first.next_message().await;

    first.push_close(4000);

    let mut second = next_socket(&mut sockets).await;
    assert!(second.url.contains("token=tok-2"));
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);

    let rejoins = vec![second.next_message().await, second.next_message().await];
    assert!(rejoins.iter().all(|m| m["event"] == "phx_join"));
    assert_eq!(
        topics(&rejoins),
        vec!["iex:securities:AAPL", "iex:securities:MSFT"]
    );

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(*err, ClientError::Transport(TransportError::Closed)));
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_malformed_message_does_not_stop_delivery() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let socket = next_socket(&mut sockets).await;
    let mut quotes = manager.subscribe_all();
    let mut errors = manager.errors();

    socket.push_text("{not json");
    socket.push_text(&quote_json("AAPL", "150.25"));

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(quote.ticker, "AAPL");
    assert_eq!(quote.price, Decimal::new(15025, 2));

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(matches!(*err, ClientError::Codec(_)));
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_fragmented_inbound_message_is_reassembled() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let socket = next_socket(&mut sockets).await;
    let mut quotes = manager.subscribe_all();

    let text = quote_json("MSFT", "410.5");
    let (head, tail) = text.split_at(text.len() / 2);
    socket
        .inbound
        .send(Ok(SocketEvent::Fragment {
            data: head.as_bytes().to_vec(),
            end_of_message: false,
        }))
        .unwrap();
    socket
        .inbound
        .send(Ok(SocketEvent::Fragment {
            data: tail.as_bytes().to_vec(),
            end_of_message: true,
        }))
        .unwrap();

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(quote.ticker, "MSFT");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_channel_subscription_filters_by_ticker() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let socket = next_socket(&mut sockets).await;
    let mut aapl = manager.subscribe_channel(&Channel::parse("AAPL").unwrap());

    socket.push_text(&quote_json("MSFT", "410.50"));
    socket.push_text(&quote_json("AAPL", "150.00"));

    let quote = timeout(WAIT, aapl.recv()).await.unwrap().unwrap();
    assert_eq!(quote.ticker, "AAPL");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_join_rejection_is_reported() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let socket = next_socket(&mut sockets).await;
    let mut errors = manager.errors();

    socket.push_text(
        &json!({
            "topic": "iex:securities:ZZZZ",
            "event": "phx_reply",
            "payload": {"status": "error", "response": {"reason": "unmatched topic"}},
            "ref": "7"
        })
        .to_string(),
    );

    let err = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    match &*err {
        ClientError::JoinRejected { topic, reason } => {
            assert_eq!(topic, "iex:securities:ZZZZ");
            assert_eq!(reason, "unmatched topic");
        }
        other => panic!("expected join rejection, got {other:?}"),
    }

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_sent_on_phoenix_topic() {
    let config = ClientConfig {
        heartbeat_interval: Duration::from_secs(20),
        ..test_config()
    };
    let (manager, _tokens, mut sockets) = connect(config).await;
    let mut socket = next_socket(&mut sockets).await;

    tokio::time::sleep(Duration::from_secs(21)).await;

    let message = socket.next_message().await;
    assert_eq!(message["topic"], "phoenix");
    assert_eq!(message["event"], "heartbeat");
    assert_eq!(message["payload"], json!({}));

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_token_renewal_replaces_socket_and_rejoins() {
    let config = ClientConfig {
        heartbeat_interval: Duration::from_secs(3600),
        token_renewal_interval: Duration::from_secs(60),
        ..test_config()
    };
    let (manager, tokens, mut sockets) = connect(config).await;
    let mut first = next_socket(&mut sockets).await;

    manager.join(["AAPL"]).await.unwrap();
    first.next_message().await;

    tokio::time::sleep(Duration::from_secs(61)).await;

    let mut second = next_socket(&mut sockets).await;
    assert!(second.url.contains("token=tok-2"));
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);

    let (code, _reason) = first.expect_close().await;
    assert_eq!(code, 1000);

    let rejoin = second.next_message().await;
    assert_eq!(rejoin["event"], "phx_join");
    assert_eq!(rejoin["topic"], "iex:securities:AAPL");

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let config = ClientConfig {
        self_heal_backoff: vec![Duration::ZERO, Duration::from_secs(5)],
        ..test_config()
    };
    let tokens = FakeTokens::default();
    tokens.failing.store(true, Ordering::SeqCst);
    let (transport, _sockets) = FakeTransport::new();

    let manager = ConnectionManager::start(config, tokens.clone(), transport)
        .await
        .unwrap();

    // Immediate retry ran inline; a 5 s retry is pending.
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(), ConnectionState::SelfHealing);

    manager.shutdown().await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(tokens.calls.load(Ordering::SeqCst), 2);
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_self_healing_recovers_after_auth_outage() {
    let config = ClientConfig {
        self_heal_backoff: vec![Duration::ZERO, Duration::from_secs(2)],
        ..test_config()
    };
    let tokens = FakeTokens::default();
    tokens.failing.store(true, Ordering::SeqCst);
    let (transport, mut sockets) = FakeTransport::new();

    let manager = ConnectionManager::start(config, tokens.clone(), transport)
        .await
        .unwrap();
    manager.join(["AAPL"]).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::SelfHealing);

    tokens.failing.store(false, Ordering::SeqCst);
    let mut socket = next_socket(&mut sockets).await;

    let message = socket.next_message().await;
    assert_eq!(message["topic"], "iex:securities:AAPL");
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_socket_and_is_idempotent() {
    let (manager, _tokens, mut sockets) = connect(test_config()).await;
    let mut socket = next_socket(&mut sockets).await;
    let mut states = manager.state_changes();

    manager.shutdown().await;
    manager.shutdown().await;

    let (code, reason) = socket.expect_close().await;
    assert_eq!(code, 1000);
    assert_eq!(reason, "User terminated");

    states.changed().await.unwrap();
    assert_eq!(*states.borrow(), ConnectionState::Disconnected);

    let err = manager.join(["AAPL"]).await.unwrap_err();
    assert!(matches!(err, ClientError::ShutDown));
    assert!(matches!(
        manager.leave_all().await.unwrap_err(),
        ClientError::ShutDown
    ));
}

#[tokio::test(start_paused = true)]
async fn test_join_does_not_wait_for_token_request() {
    let (manager, tokens, mut sockets) = connect(test_config()).await;
    let first = next_socket(&mut sockets).await;
    let mut states = manager.state_changes();

    tokens.latency_ms.store(25_000, Ordering::SeqCst);
    first.push_close(4000);
    states
        .wait_for(|state| *state == ConnectionState::Authenticating)
        .await
        .unwrap();

    // The token request is still outstanding.
    let joined = timeout(Duration::from_secs(1), manager.join(["AAPL"])).await;
    assert!(joined.unwrap().is_ok());
    let channels = timeout(Duration::from_secs(1), manager.list_channels())
        .await
        .unwrap();
    assert_eq!(channels, vec![Channel::parse("AAPL").unwrap()]);
    assert_eq!(manager.state(), ConnectionState::Authenticating);

    let mut second = timeout(Duration::from_secs(60), sockets.recv())
        .await
        .unwrap()
        .unwrap();
    let rejoin = second.next_message().await;
    assert_eq!(rejoin["event"], "phx_join");
    assert_eq!(rejoin["topic"], "iex:securities:AAPL");

    manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_rejoin_keeps_backing_off() {
    let config = ClientConfig {
        self_heal_backoff: vec![
            Duration::ZERO,
            Duration::from_secs(3),
            Duration::from_secs(60),
        ],
        ..test_config()
    };
    let tokens = FakeTokens::default();
    let (transport, mut sockets) = FakeTransport::new();
    let failing_sends = Arc::clone(&transport.failing_sends);

    let manager = ConnectionManager::start(config, tokens, transport)
        .await
        .unwrap();
    let mut first = next_socket(&mut sockets).await;
    manager.join(["AAPL"]).await.unwrap();
    first.next_message().await;

    failing_sends.store(true, Ordering::SeqCst);
    let started = Instant::now();
    first.push_close(4000);

    // Immediate reconnect opens a socket, the rejoin fails and it is retired.
    let mut second = next_socket(&mut sockets).await;
    let (code, _reason) = second.expect_close().await;
    assert_eq!(code, 1000);

    failing_sends.store(false, Ordering::SeqCst);
    let mut third = next_socket(&mut sockets).await;
    assert!(started.elapsed() >= Duration::from_secs(3));

    let rejoin = third.next_message().await;
    assert_eq!(rejoin["topic"], "iex:securities:AAPL");
    assert_eq!(manager.state(), ConnectionState::Connected);

    manager.shutdown().await;
}
