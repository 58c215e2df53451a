//! TLS WebSocket client with auto-reconnect and ping keep-alive.
//!
//! The `WsClient` runs as a tokio task that:
//! 1. Connects to the exchange WebSocket endpoint (TLS, SNI, verified peer).
//! 2. Invokes `on_open`, letting the owner replay its subscriptions.
//! 3. Reads frames and forwards them to `on_frame`.
//! 4. Drains an outbound queue strictly FIFO with one in-flight write.
//! 5. Sends a standard WebSocket ping on a fixed interval.
//! 6. Automatically reconnects on disconnection with jittered exponential
//!    backoff, clearing the outbound queue first.
//!
//! All I/O and callbacks execute on the connection task; `enqueue` may be
//! called from any thread.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Failure site of a network error, mirroring the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Connect,
    Handshake,
    Read,
    Write,
    Ping,
}

impl NetworkErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Handshake => "handshake",
            Self::Read => "read",
            Self::Write => "write",
            Self::Ping => "ping",
        }
    }
}

/// Callback invoked after every successful WebSocket handshake.
pub type OnOpenCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked for each received text frame.
pub type OnFrameCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked when the connection closes (any reason).
pub type OnCloseCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Callback invoked for every transport-level error.
pub type OnErrorCallback = Arc<dyn Fn(NetworkErrorKind, &str) + Send + Sync>;

/// The owner's hooks into the connection lifecycle.
#[derive(Clone)]
pub struct WsCallbacks {
    pub on_open: OnOpenCallback,
    pub on_frame: OnFrameCallback,
    pub on_close: OnCloseCallback,
    pub on_error: OnErrorCallback,
}

/// Configuration for the WebSocket client.
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Full WebSocket URL (e.g. `wss://advanced-trade-ws.coinbase.com:443/`).
    pub url: String,
    /// Interval between standard WebSocket pings.
    pub ping_interval: Duration,
    /// Bound on each connection attempt (resolve + TCP + TLS + WS).
    pub handshake_timeout: Duration,
    /// First reconnect delay.
    pub initial_backoff: Duration,
    /// Reconnect delay cap.
    pub max_backoff: Duration,
    /// Upper bound of the uniform jitter added to each reconnect delay.
    pub backoff_jitter: Duration,
    /// Bound on the graceful close during shutdown.
    pub close_timeout: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            ping_interval: Duration::from_secs(25),
            handshake_timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_jitter: Duration::from_millis(250),
            close_timeout: Duration::from_secs(3),
        }
    }
}

/// Outbound queue depth. Subscription frames are small and bounded.
const OUTBOUND_QUEUE: usize = 64;

/// Cloneable handle for appending frames to a client's outbound queue.
///
/// Valid before `start()` — the replay callback typically captures one.
#[derive(Clone)]
pub struct WsSender {
    tx: mpsc::Sender<String>,
}

impl WsSender {
    /// Append a frame. Callable from any thread; the write happens on the
    /// connection task in FIFO order.
    pub fn enqueue(&self, frame: String) -> anyhow::Result<()> {
        self.tx.try_send(frame)?;
        Ok(())
    }
}

/// A WebSocket connection managed by a background tokio task.
pub struct WsClient {
    config: WsConfig,
    outbound_tx: mpsc::Sender<String>,
    outbound_rx: Option<mpsc::Receiver<String>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WsClient {
    /// Create a new (not yet started) client.
    pub fn new(config: WsConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        Self {
            config,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Handle for enqueueing outbound frames, usable before `start()`.
    pub fn sender(&self) -> WsSender {
        WsSender { tx: self.outbound_tx.clone() }
    }

    /// Start the connection task. Idempotent — a second call is a no-op.
    pub fn start(&mut self, callbacks: WsCallbacks) {
        if self.task.is_some() {
            return;
        }
        let Some(outbound_rx) = self.outbound_rx.take() else {
            return; // already consumed by a prior start/stop cycle
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            connection_loop(config, callbacks, outbound_rx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
    }

    /// Returns `true` between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Append a frame to the outbound queue. Callable from any thread; the
    /// write happens on the connection task in FIFO order.
    pub fn enqueue(&self, frame: String) -> anyhow::Result<()> {
        self.outbound_tx.try_send(frame)?;
        Ok(())
    }

    /// Stop the connection and wait for the task to finish. The in-flight
    /// graceful close is bounded by `close_timeout`.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Connection loop
// ---------------------------------------------------------------------------

/// Next delay in the exponential backoff ladder.
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Backoff plus 0..=jitter uniform random extra.
fn jittered(backoff: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return backoff;
    }
    let extra_ms = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    backoff + Duration::from_millis(extra_ms)
}

/// Main connection loop — connects, reads, writes, pings, reconnects.
async fn connection_loop(
    config: WsConfig,
    callbacks: WsCallbacks,
    mut outbound_rx: mpsc::Receiver<String>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        // Check shutdown before connecting
        if *shutdown_rx.borrow() {
            info!("[ws] shutdown requested");
            return;
        }

        info!("[ws] connecting to {}", config.url);

        let connect = tokio::time::timeout(config.handshake_timeout, connect_ws(&config));
        let ws_stream = match connect.await {
            Ok(Ok(stream)) => {
                backoff = config.initial_backoff; // reset backoff on success
                info!("[ws] connected");
                stream
            }
            Ok(Err(e)) => {
                error!("[ws] connection failed: {e}, retrying in {backoff:?}");
                (callbacks.on_error)(NetworkErrorKind::Connect, &e.to_string());
                let delay = jittered(backoff, config.backoff_jitter);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = shutdown_rx.changed() => return,
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
            Err(_) => {
                error!("[ws] handshake timed out after {:?}", config.handshake_timeout);
                (callbacks.on_error)(NetworkErrorKind::Handshake, "handshake timeout");
                let delay = jittered(backoff, config.backoff_jitter);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {},
                    _ = shutdown_rx.changed() => return,
                }
                backoff = next_backoff(backoff, config.max_backoff);
                continue;
            }
        };

        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Let the owner replay its desired subscriptions.
        (callbacks.on_open)();

        let mut ping_tick = tokio::time::interval(config.ping_interval);
        ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_tick.reset(); // first tick after a full interval, not immediately

        let mut close_reason = String::from("stream ended");

        // Main read/write loop
        loop {
            tokio::select! {
                // Shutdown signal — graceful close, bounded.
                _ = shutdown_rx.changed() => {
                    info!("[ws] shutdown signal received");
                    let close = tokio::time::timeout(config.close_timeout, ws_write.close());
                    if close.await.is_err() {
                        warn!("[ws] graceful close timed out, aborting");
                    }
                    (callbacks.on_close)("shutdown");
                    return;
                }

                // Incoming message
                msg = ws_read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            (callbacks.on_frame)(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = ws_write.send(Message::Pong(data)).await {
                                error!("[ws] pong send error: {e}");
                                (callbacks.on_error)(NetworkErrorKind::Write, &e.to_string());
                                close_reason = format!("pong write failed: {e}");
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            warn!("[ws] received close frame");
                            close_reason = frame
                                .map(|f| f.reason.to_string())
                                .filter(|r| !r.is_empty())
                                .unwrap_or_else(|| "server close".to_string());
                            break;
                        }
                        Some(Err(e)) => {
                            error!("[ws] read error: {e}");
                            (callbacks.on_error)(NetworkErrorKind::Read, &e.to_string());
                            close_reason = format!("read failed: {e}");
                            break;
                        }
                        None => {
                            warn!("[ws] stream ended");
                            break;
                        }
                        _ => {} // Pong, Binary, Frame — ignore
                    }
                }

                // Outbound frame from the owner — one in-flight write, FIFO.
                Some(frame) = outbound_rx.recv() => {
                    debug!("[ws] sending frame ({} bytes)", frame.len());
                    if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                        error!("[ws] send error: {e}");
                        (callbacks.on_error)(NetworkErrorKind::Write, &e.to_string());
                        close_reason = format!("write failed: {e}");
                        break;
                    }
                }

                // Keep-alive ping
                _ = ping_tick.tick() => {
                    if let Err(e) = ws_write.send(Message::Ping(vec![].into())).await {
                        error!("[ws] ping send error: {e}");
                        (callbacks.on_error)(NetworkErrorKind::Ping, &e.to_string());
                        close_reason = format!("ping failed: {e}");
                        break;
                    }
                }
            }
        }

        (callbacks.on_close)(&close_reason);

        // Stale subscription frames must not replay on the next stream;
        // the owner re-sends its desired set from `on_open`.
        while outbound_rx.try_recv().is_ok() {}

        let delay = jittered(backoff, config.backoff_jitter);
        warn!("[ws] disconnected ({close_reason}), reconnecting in {delay:?}");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {},
            _ = shutdown_rx.changed() => return,
        }
        backoff = next_backoff(backoff, config.max_backoff);
    }
}

/// Establish a TLS WebSocket connection (SNI + peer verification come from
/// the `wss://` handshake against the URL's host).
async fn connect_ws(
    config: &WsConfig,
) -> anyhow::Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
> {
    use tokio_tungstenite::tungstenite::http::Request;

    let request = Request::builder()
        .uri(&config.url)
        .header("Host", extract_host(&config.url))
        .body(())?;

    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

/// Extract the host from a URL string.
fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.host_str().unwrap_or("").to_string())
        .unwrap_or_default()
}
