//! Reconnecting WebSocket event transport.
//!
//! Architecture: one supervisor task per connection object.
//! - The supervisor owns the socket; callers never touch it
//! - Outbound text flows through an unbounded channel that only exists while
//!   the socket is open, so nothing is ever queued across a disconnect
//! - Inbound text frames fan out to every registered listener
//! - On unexpected closure the supervisor waits out the reconnect policy and
//!   dials again, until `close()` cancels it
//!
//! Usage:
//! ```ignore
//! let transport = EventTransport::new(TransportConfig::new("events", "ws://localhost:8000/ws"))?;
//! let _sub = transport.on_message(|raw| println!("{raw}"));
//! transport.connect();
//! transport.send(r#"{"type":"ping"}"#);
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::messages::Outbound;
use crate::reconnect::ReconnectPolicy;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(#[from] tungstenite::Error),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
}

/// Anything that accepts a text payload without blocking.
///
/// Returns `false` when the payload could not be handed off. Implementors
/// never queue for later.
pub trait MessageChannel: Send + Sync {
    fn send(&self, payload: &str) -> bool;
}

/// Socket lifecycle as seen by callers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, possibly waiting to reconnect
    Disconnected = 0,
    /// Handshake in flight
    Connecting = 1,
    /// Socket open, `send` works
    Open = 2,
    /// Owner called `close()`, close frame on its way
    Closing = 3,
}

impl ConnectionState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
        }
    }
}

/// Configuration for EventTransport
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name for logging
    pub name: String,
    /// WebSocket endpoint (e.g., "ws://localhost:8000/ws")
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on a single handshake
    pub connect_timeout: Duration,
    /// Send `{"type":"ping"}` this often while open
    pub keepalive: Option<Duration>,
}

impl TransportConfig {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            keepalive: None,
        }
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_keepalive(mut self, period: Duration) -> Self {
        self.keepalive = Some(period);
        self
    }
}

struct Inner {
    config: TransportConfig,
    state: AtomicU8,
    closed: AtomicBool,
    supervising: AtomicBool,
    /// Cuts a pending reconnect delay short
    wake: Notify,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    shutdown: CancellationToken,
    sockets_opened: AtomicU64,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn dispatch(&self, payload: &str) {
        // Snapshot so listeners may (un)subscribe from inside a callback
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        trace!(
            "{}: dispatching {} bytes to {} listeners",
            self.config.name,
            payload.len(),
            listeners.len()
        );

        for listener in listeners {
            if std::panic::catch_unwind(AssertUnwindSafe(|| listener(payload))).is_err() {
                warn!("{}: listener panicked, continuing", self.config.name);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A duplex text channel to one endpoint that keeps itself connected.
///
/// Cloning is cheap and every clone drives the same connection. The
/// supervisor task keeps the connection alive until `close()` is called;
/// dropping the last clone does not stop it.
#[derive(Clone)]
pub struct EventTransport {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTransport")
            .field("name", &self.inner.config.name)
            .field("url", &self.inner.config.url)
            .field("state", &self.state())
            .finish()
    }
}

impl EventTransport {
    /// Validate the endpoint and build a disconnected transport.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        config
            .url
            .as_str()
            .into_client_request()
            .map_err(|source| TransportError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                closed: AtomicBool::new(false),
                supervising: AtomicBool::new(false),
                wake: Notify::new(),
                writer: Mutex::new(None),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
                sockets_opened: AtomicU64::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of sockets that completed a handshake over this object's life.
    pub fn sockets_opened(&self) -> u64 {
        self.inner.sockets_opened.load(Ordering::SeqCst)
    }

    /// Start connecting in the background.
    ///
    /// Idempotent: with a socket open or a handshake in flight this does
    /// nothing. While waiting out a reconnect delay it makes the next attempt
    /// happen now. After `close()` it never does anything again.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let name = &self.inner.config.name;
        if self.inner.is_closed() {
            debug!("{}: connect() after close, ignoring", name);
            return;
        }

        if self.inner.supervising.swap(true, Ordering::SeqCst) {
            if self.state() == ConnectionState::Disconnected {
                debug!("{}: connect() during reconnect delay, dialing now", name);
                self.inner.wake.notify_one();
            }
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("{}: connect() outside a tokio runtime: {}", name, e);
                self.inner.supervising.store(false, Ordering::SeqCst);
                return;
            }
        };

        self.inner.set_state(ConnectionState::Connecting);
        let inner = Arc::clone(&self.inner);
        handle.spawn(supervise(inner));
    }

    /// Hand `payload` to the open socket. `false` if there is none.
    pub fn send(&self, payload: &str) -> bool {
        if self.state() != ConnectionState::Open {
            return false;
        }
        match lock(&self.inner.writer).as_ref() {
            Some(tx) => tx.send(Message::Text(payload.to_string())).is_ok(),
            None => false,
        }
    }

    /// Register a listener for every inbound text payload.
    ///
    /// Registering the same callback twice delivers twice. Dropping the
    /// returned [`Subscription`] keeps the listener registered; call
    /// [`Subscription::unsubscribe`] to remove it.
    pub fn on_message<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Close for good. Closes the live socket, if any, and cancels any
    /// pending reconnection.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("{}: closing", self.inner.config.name);
        if self.state() == ConnectionState::Open {
            self.inner.set_state(ConnectionState::Closing);
        }
        self.inner.shutdown.cancel();
        lock(&self.inner.writer).take();
    }
}

impl MessageChannel for EventTransport {
    fn send(&self, payload: &str) -> bool {
        EventTransport::send(self, payload)
    }
}

/// Handle returned by [`EventTransport::on_message`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

async fn dial(config: &TransportConfig) -> Result<WsStream, TransportError> {
    match tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(config.url.as_str()),
    )
    .await
    {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(TransportError::Handshake(e)),
        Err(_) => Err(TransportError::Timeout(config.connect_timeout)),
    }
}

/// Owns the connection: dial, pump, wait, repeat.
async fn supervise(inner: Arc<Inner>) {
    let name = inner.config.name.clone();
    let mut failures: u32 = 0;

    debug!("{}: supervisor started for {}", name, inner.config.url);

    loop {
        if inner.is_closed() {
            break;
        }
        inner.set_state(ConnectionState::Connecting);

        let dialed = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            result = dial(&inner.config) => result,
        };

        match dialed {
            Ok(stream) => {
                failures = 0;
                inner.sockets_opened.fetch_add(1, Ordering::SeqCst);
                info!("{}: connected to {}", name, inner.config.url);
                pump(&inner, stream).await;
                lock(&inner.writer).take();
                inner.set_state(ConnectionState::Disconnected);
                if inner.is_closed() {
                    break;
                }
                warn!("{}: connection lost", name);
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                inner.set_state(ConnectionState::Disconnected);
                warn!("{}: connect attempt {} failed: {}", name, failures, e);
            }
        }

        let delay = inner.config.reconnect.delay_for_attempt(failures.max(1));
        debug!("{}: reconnecting in {:?}", name, delay);

        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }

    lock(&inner.writer).take();
    inner.set_state(ConnectionState::Disconnected);
    inner.supervising.store(false, Ordering::SeqCst);
    debug!("{}: supervisor exiting", name);
}

/// Shuttle frames until the socket dies or the owner closes.
async fn pump(inner: &Arc<Inner>, stream: WsStream) {
    let name = &inner.config.name;
    let (mut sink, mut stream) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    *lock(&inner.writer) = Some(tx);
    if inner.is_closed() {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }
    inner.set_state(ConnectionState::Open);

    let mut keepalive = inner.config.keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        tokio::select! {
            biased;

            _ = inner.shutdown.cancelled() => {
                debug!("{}: sending close frame", name);
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            Some(msg) = rx.recv() => {
                if let Err(e) = sink.send(msg).await {
                    warn!("{}: send failed: {}", name, e);
                    break;
                }
            }

            _ = next_tick(&mut keepalive) => {
                match Outbound::Ping.to_json() {
                    Ok(ping) => {
                        if let Err(e) = sink.send(Message::Text(ping)).await {
                            warn!("{}: keepalive failed: {}", name, e);
                            break;
                        }
                    }
                    Err(e) => warn!("{}: failed to encode keepalive: {}", name, e),
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => inner.dispatch(&text),
                    Some(Ok(Message::Binary(bytes))) => {
                        debug!("{}: ignoring {} byte binary frame", name, bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("{}: peer closed: {:?}", name, frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("{}: receive error: {}", name, e);
                        break;
                    }
                    None => {
                        debug!("{}: stream ended", name);
                        break;
                    }
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
        ] {
            assert_eq!(ConnectionState::from_u8(state as u8), state);
        }
        assert_eq!(ConnectionState::from_u8(99), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Open.as_str(), "open");
    }

    #[test]
    fn rejects_garbage_url() {
        let err = EventTransport::new(TransportConfig::new("t", "not a url")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[test]
    fn send_before_connect_is_false() {
        let transport =
            EventTransport::new(TransportConfig::new("t", "ws://127.0.0.1:9/ws")).unwrap();
        assert!(!transport.send("hello"));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_outside_runtime_does_not_panic() {
        let transport =
            EventTransport::new(TransportConfig::new("t", "ws://127.0.0.1:9/ws")).unwrap();
        transport.connect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn unsubscribe_removes_only_that_listener() {
        let transport =
            EventTransport::new(TransportConfig::new("t", "ws://127.0.0.1:9/ws")).unwrap();
        let hits = Arc::new(AtomicU64::new(0));

        let h1 = Arc::clone(&hits);
        let first = transport.on_message(move |_| {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        let _second = transport.on_message(move |_| {
            h2.fetch_add(10, Ordering::SeqCst);
        });

        first.unsubscribe();
        transport.inner.dispatch("x");
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let transport =
            EventTransport::new(TransportConfig::new("t", "ws://127.0.0.1:9/ws")).unwrap();
        let hits = Arc::new(AtomicU64::new(0));

        let _bad = transport.on_message(|_| panic!("listener blew up"));
        let h = Arc::clone(&hits);
        let _good = transport.on_message(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        transport.inner.dispatch("x");
        transport.inner.dispatch("y");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
