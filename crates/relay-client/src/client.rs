//! The relay client: connection supervision and frame dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use claude_mobile_protocol::Frame;
use claude_mobile_protocol::constants::{HEARTBEAT_PERIOD, RECONNECT_DELAY, WS_MAX_MESSAGE_SIZE};

use crate::ClientError;
use crate::pumps::{heartbeat::heartbeat_pump, write::write_pump};

/// Outbound frame buffer per connection.
const SEND_BUFFER_SIZE: usize = 256;

/// Callback invoked for every parsed inbound frame.
pub type FrameHandler = Box<dyn Fn(&Frame) + Send + Sync>;

/// Relay client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base relay URL, e.g. `wss://relay.example.com/ws`.
    pub relay_url: String,
    /// Stable agent identity presented as `agentToken`.
    pub identity: String,
    /// Version string reported in `agent_register`.
    pub version: String,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Heartbeat ping interval.
    pub heartbeat_period: Duration,
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            identity: identity.into(),
            version: env!("CARGO_PKG_VERSION").into(),
            reconnect_delay: RECONNECT_DELAY,
            heartbeat_period: HEARTBEAT_PERIOD,
        }
    }
}

struct Inner {
    config: ClientConfig,
    handlers: std::sync::RwLock<Vec<FrameHandler>>,
    write_tx: std::sync::Mutex<Option<mpsc::Sender<tungstenite::Message>>>,
    connected: AtomicBool,
    cancel: CancellationToken,
}

/// Client maintaining one live relay connection for one agent identity.
pub struct RelayClient {
    inner: Arc<Inner>,
    run_handle: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                handlers: std::sync::RwLock::new(Vec::new()),
                write_tx: std::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                cancel: CancellationToken::new(),
            }),
            run_handle: std::sync::Mutex::new(None),
        }
    }

    /// Registers a handler for inbound frames.
    ///
    /// Handlers run on the receive loop in registration order, once per
    /// frame. A panicking handler is logged and skipped; the rest still
    /// run.
    pub fn on_frame(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        self.inner.handlers.write().unwrap().push(Box::new(handler));
    }

    /// Starts the connection supervisor. Reconnects forever until
    /// [`shutdown`](Self::shutdown).
    pub fn start(&self) {
        let mut guard = self.run_handle.lock().unwrap();
        if guard.is_some() {
            warn!("relay client already started");
            return;
        }
        let inner = Arc::clone(&self.inner);
        *guard = Some(tokio::spawn(supervisor(inner)));
    }

    /// Sends a frame. Returns `false` when the socket is not open or the
    /// buffer is full; nothing is queued across a disconnect.
    pub fn send(&self, frame: &Frame) -> bool {
        if !self.inner.connected.load(Ordering::Relaxed) {
            return false;
        }
        let Some(tx) = self.inner.write_tx.lock().unwrap().clone() else {
            return false;
        };
        let Ok(json) = serde_json::to_string(frame) else {
            return false;
        };
        tx.try_send(tungstenite::Message::Text(json.into())).is_ok()
    }

    /// Returns `true` while a connection is open.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    /// Stops the supervisor, cancels any pending reconnect, and closes the
    /// connection with a normal close code.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.run_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("relay client shut down");
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}

/// Connection supervisor: connect, run, back off a fixed delay, repeat.
async fn supervisor(inner: Arc<Inner>) {
    loop {
        if inner.cancel.is_cancelled() {
            break;
        }

        match run_connection(&inner).await {
            Ok(()) => debug!("relay connection closed"),
            Err(e) => warn!("relay connection failed: {e}"),
        }

        inner.connected.store(false, Ordering::Relaxed);
        *inner.write_tx.lock().unwrap() = None;

        if inner.cancel.is_cancelled() {
            break;
        }
        debug!(
            delay_secs = inner.config.reconnect_delay.as_secs_f64(),
            "reconnecting to relay"
        );
        tokio::select! {
            _ = inner.cancel.cancelled() => break,
            _ = tokio::time::sleep(inner.config.reconnect_delay) => {}
        }
    }
}

/// One connection: register, pump, dispatch until the socket dies.
async fn run_connection(inner: &Arc<Inner>) -> Result<(), ClientError> {
    let url = build_url(&inner.config)?;

    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    let (ws, _) =
        tokio_tungstenite::connect_async_with_config(url.as_str(), Some(ws_config), false).await?;
    info!(url = %inner.config.relay_url, "connected to relay");

    let (write, mut read) = ws.split();
    let conn_cancel = inner.cancel.child_token();
    let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(SEND_BUFFER_SIZE);

    let write_handle = tokio::spawn(write_pump(write, write_rx, conn_cancel.clone()));
    let heartbeat_handle = tokio::spawn(heartbeat_pump(
        write_tx.clone(),
        inner.config.heartbeat_period,
        conn_cancel.clone(),
    ));

    *inner.write_tx.lock().unwrap() = Some(write_tx.clone());
    inner.connected.store(true, Ordering::Relaxed);

    // Register immediately; the relay answers with `register_ok`.
    let register = Frame::AgentRegister {
        agent_token: inner.config.identity.clone(),
        version: inner.config.version.clone(),
    };
    let json = serde_json::to_string(&register)?;
    if write_tx
        .send(tungstenite::Message::Text(json.into()))
        .await
        .is_err()
    {
        conn_cancel.cancel();
        return Ok(());
    }

    // Receive loop: single consumer, sequential dispatch.
    loop {
        tokio::select! {
            _ = conn_cancel.cancelled() => break,

            msg = read.next() => match msg {
                Some(Ok(tungstenite::Message::Text(text))) => {
                    dispatch(&inner.handlers, text.as_str());
                }
                Some(Ok(tungstenite::Message::Ping(data))) => {
                    let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                }
                Some(Ok(tungstenite::Message::Close(_))) => {
                    debug!("relay sent close frame");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("relay read error: {e}");
                    break;
                }
                None => break,
            },
        }
    }

    inner.connected.store(false, Ordering::Relaxed);
    conn_cancel.cancel();
    let _ = write_handle.await;
    heartbeat_handle.abort();
    Ok(())
}

/// Parses one inbound text frame and runs every handler over it.
fn dispatch(handlers: &std::sync::RwLock<Vec<FrameHandler>>, text: &str) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("dropping unparsable frame: {e}");
            return;
        }
    };

    let guard = handlers.read().unwrap();
    for handler in guard.iter() {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&frame)));
        if result.is_err() {
            warn!("frame handler panicked, continuing with remaining handlers");
        }
    }
}

/// Builds the classified upgrade URL for this identity.
fn build_url(config: &ClientConfig) -> Result<url::Url, ClientError> {
    let mut url = url::Url::parse(&config.relay_url)?;
    url.query_pairs_mut()
        .append_pair("type", "agent")
        .append_pair("agentToken", &config.identity);
    Ok(url)
}
