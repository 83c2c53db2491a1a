//! EventTransport against a real local WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use puppetproto::{ConnectionState, EventTransport, ReconnectPolicy, TransportConfig};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Echo server: replies `echo:<text>` to every text frame and drops the
/// connection without a close frame when it receives `hangup`.
struct TestServer {
    url: String,
    accepted: Arc<AtomicUsize>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            loop {
                let Ok((tcp, _)) = listener.accept().await else {
                    break;
                };
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(tcp).await else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);
                    let (mut write, mut read) = ws.split();
                    while let Some(Ok(msg)) = read.next().await {
                        if let Message::Text(text) = msg {
                            if text == "hangup" {
                                break;
                            }
                            if write
                                .send(Message::Text(format!("echo:{}", text)))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{}/ws", addr),
            accepted,
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

fn transport_for(url: &str, delay_ms: u64) -> EventTransport {
    let config = TransportConfig::new("test", url)
        .with_reconnect(ReconnectPolicy::Fixed(Duration::from_millis(delay_ms)));
    EventTransport::new(config).unwrap()
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn collector(transport: &EventTransport) -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = transport.on_message(move |raw| sink.lock().unwrap().push(raw.to_string()));
    seen
}

#[tokio::test]
async fn double_connect_opens_one_socket() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 50);

    transport.connect();
    transport.connect();
    wait_for("open", || transport.is_open()).await;
    transport.connect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(transport.sockets_opened(), 1);
    transport.close();
}

#[tokio::test]
async fn close_then_connect_never_dials() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 20);

    transport.close();
    for _ in 0..3 {
        transport.connect();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.accepted(), 0);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    assert!(!transport.send("hello"));
}

#[tokio::test]
async fn send_round_trips_through_listeners() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 50);
    let seen = collector(&transport);

    transport.connect();
    wait_for("open", || transport.is_open()).await;
    assert!(transport.send("hi"));

    wait_for("echo", || seen.lock().unwrap().iter().any(|m| m == "echo:hi")).await;
    transport.close();
}

#[tokio::test]
async fn same_callback_twice_delivers_twice() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 50);
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    let listener = move |_: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
    };
    let first = transport.on_message(listener.clone());
    let _second = transport.on_message(listener);

    transport.connect();
    wait_for("open", || transport.is_open()).await;
    transport.send("one");
    wait_for("two deliveries", || hits.load(Ordering::SeqCst) == 2).await;

    first.unsubscribe();
    transport.send("two");
    wait_for("one more delivery", || hits.load(Ordering::SeqCst) == 3).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    transport.close();
}

#[tokio::test]
async fn panicking_listener_does_not_block_delivery() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 50);
    let _bad = transport.on_message(|_| panic!("listener failure"));
    let seen = collector(&transport);

    transport.connect();
    wait_for("open", || transport.is_open()).await;
    transport.send("a");
    transport.send("b");

    wait_for("both echoes", || seen.lock().unwrap().len() == 2).await;
    transport.close();
}

#[tokio::test]
async fn reconnects_after_peer_drops() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 50);

    transport.connect();
    wait_for("open", || transport.is_open()).await;
    assert!(transport.send("hangup"));

    wait_for("second socket", || server.accepted() == 2).await;
    wait_for("reopen", || transport.is_open()).await;
    assert_eq!(transport.sockets_opened(), 2);
    transport.close();
}

#[tokio::test]
async fn close_during_delay_suppresses_reconnect() {
    let server = TestServer::start().await;
    let transport = transport_for(&server.url, 300);

    transport.connect();
    wait_for("open", || transport.is_open()).await;
    transport.send("hangup");
    wait_for("drop noticed", || !transport.is_open()).await;

    transport.close();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.accepted(), 1);
    assert!(!transport.send("anything"));
}

#[tokio::test]
async fn refused_endpoint_stays_disconnected() {
    // Reserve a port, then release it so the first attempts are refused
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let transport = transport_for(&format!("ws://{}/ws", addr), 30);
    transport.connect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!transport.is_open());
    assert!(!transport.send("early"));
    transport.close();
}

#[tokio::test]
async fn keepalive_sends_ping() {
    let server = TestServer::start().await;
    let config = TransportConfig::new("test", &server.url)
        .with_keepalive(Duration::from_millis(50));
    let transport = EventTransport::new(config).unwrap();
    let seen = collector(&transport);

    transport.connect();
    wait_for("ping echo", || {
        seen.lock()
            .unwrap()
            .iter()
            .any(|m| m == r#"echo:{"type":"ping"}"#)
    })
    .await;
    transport.close();
}
