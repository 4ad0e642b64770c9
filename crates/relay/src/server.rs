//! Relay WebSocket server.
//!
//! Listens on a TCP port, classifies each upgrade from its URL query
//! (`type=agent|mobile`, plus `agentToken` / `sessionToken`), and runs one
//! connection task per socket. Agent and mobile loops share the same
//! structure: an outbound channel drained into the sink, an inbound stream
//! dispatched against the registry, and a dead-connection deadline reset by
//! every inbound frame.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_util::sync::CancellationToken;

use claude_mobile_protocol::Frame;
use claude_mobile_protocol::constants::{
    CLOSE_BAD_HANDSHAKE, CLOSE_SESSION_EXPIRED, CONNECTION_DEAD_TIMEOUT, MSG_AGENT_DISCONNECTED,
    MSG_INVALID_CODE, MSG_SESSION_EXPIRED, PAIRING_IDLE_TIMEOUT, WS_MAX_MESSAGE_SIZE,
};

use crate::RelayError;
use crate::peer::{PeerSender, SEND_BUFFER_SIZE};
use crate::registry::Registry;

type WsSink = SplitSink<WebSocketStream<TcpStream>, WsMessage>;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
    /// A socket producing no frames for this long is closed.
    pub dead_timeout: Duration,
    /// How long an unpaired mobile may idle before being closed.
    pub pairing_idle_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 0,
            dead_timeout: CONNECTION_DEAD_TIMEOUT,
            pairing_idle_timeout: PAIRING_IDLE_TIMEOUT,
        }
    }
}

/// How an upgrade URL classified the connection.
enum Classification {
    Agent { identity: String },
    MobilePairing,
    MobileResume { token: String },
}

/// The relay server: registry plus accept loop.
pub struct RelayServer {
    config: RelayConfig,
    registry: Registry,
    cancel: CancellationToken,
    local_addr: tokio::sync::Mutex<Option<SocketAddr>>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Registry::new(),
            cancel: CancellationToken::new(),
            local_addr: tokio::sync::Mutex::new(None),
        })
    }

    /// The registry backing this relay (read access for diagnostics).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the bound address. Only available after [`run`](Self::run)
    /// binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Gracefully shuts down the server and every connection task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Runs the accept loop until cancellation.
    pub async fn run(self: &Arc<Self>) -> Result<(), RelayError> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.port).into();
        let listener = TcpListener::bind(addr).await?;

        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("relay listening on {local_addr}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("relay shutting down");
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::debug!(%peer_addr, "connection ended with error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and runs the matching peer loop.
    async fn handle_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let mut classification: Option<Classification> = None;
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            classification = classify(req.uri().query());
            Ok(resp)
        };

        let mut ws_config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let mut ws =
            tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws_config))
                .await?;

        match classification {
            None => {
                tracing::warn!(%peer_addr, "unclassified connection, closing");
                let frame = CloseFrame {
                    code: CloseCode::from(CLOSE_BAD_HANDSHAKE),
                    reason: "unclassified connection".into(),
                };
                let _ = ws.send(WsMessage::Close(Some(frame))).await;
                Ok(())
            }
            Some(Classification::Agent { identity }) => {
                tracing::info!(%peer_addr, agent = %identity, "agent connected");
                self.agent_loop(ws, identity, peer_addr).await
            }
            Some(Classification::MobilePairing) => {
                tracing::info!(%peer_addr, "mobile connected for pairing");
                self.mobile_loop(ws, None, peer_addr).await
            }
            Some(Classification::MobileResume { token }) => {
                tracing::info!(%peer_addr, "mobile resuming session");
                self.mobile_loop(ws, Some(token), peer_addr).await
            }
        }
    }

    /// Connection loop for an agent socket.
    async fn agent_loop(
        self: &Arc<Self>,
        ws: WebSocketStream<TcpStream>,
        identity: String,
        peer_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let (tx, mut rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
        let sender = PeerSender::new(tx);
        let conn_id = sender.conn_id();
        let (mut sink, mut stream) = ws.split();
        let mut registered = false;

        let deadline = tokio::time::sleep(self.config.dead_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                () = &mut deadline => {
                    tracing::info!(%peer_addr, agent = %identity, "agent silent too long, closing");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }

                out = rx.recv() => match out {
                    Some(msg) => {
                        let closing = matches!(msg, WsMessage::Close(_));
                        if sink.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                },

                frame = stream.next() => match frame {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(
                            tokio::time::Instant::now() + self.config.dead_timeout,
                        );
                        match msg {
                            WsMessage::Text(text) => {
                                if let Some(value) = parse_object(text.as_str()) {
                                    self.on_agent_frame(&identity, &sender, &mut registered, value);
                                }
                            }
                            WsMessage::Ping(data) => {
                                let _ = sink.send(WsMessage::Pong(data)).await;
                            }
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(%peer_addr, "agent read error: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }

        if registered {
            self.registry.detach_agent(&identity, conn_id);
            tracing::info!(agent = %identity, "agent disconnected");
        }
        Ok(())
    }

    /// Dispatches one parsed frame from an agent.
    fn on_agent_frame(
        &self,
        identity: &str,
        sender: &PeerSender,
        registered: &mut bool,
        value: serde_json::Value,
    ) {
        let frame_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");

        if frame_type == "agent_register" {
            if let Some(claimed) = value.get("agentToken").and_then(|t| t.as_str())
                && claimed != identity
            {
                tracing::warn!(
                    agent = %identity,
                    claimed = %claimed,
                    "agent_register token differs from upgrade URL, using URL identity"
                );
            }
            let registration = self.registry.register_agent(identity, sender.clone());
            *registered = true;
            if let Some(displaced) = registration.displaced
                && displaced.conn_id() != sender.conn_id()
            {
                tracing::info!(agent = %identity, "displacing previous agent socket");
                displaced.close(1000, "superseded by new registration");
            }
            tracing::info!(
                agent = %identity,
                code = %registration.pairing_code,
                "agent registered"
            );
            let _ = sender.send_frame(&Frame::RegisterOk {
                pairing_code: registration.pairing_code,
            });
            return;
        }

        // Everything else routes by sessionId to the bound mobile, or is
        // dropped silently (heartbeats land here by design).
        if let Some(session_id) = value.get("sessionId").and_then(|s| s.as_str()) {
            match self.registry.mobile_for_session(session_id, identity) {
                Some(mobile) => {
                    let _ = mobile.send_value(&value);
                }
                None => {
                    tracing::trace!(
                        agent = %identity,
                        session = %session_id,
                        "no live mobile for session, dropping frame"
                    );
                }
            }
        }
    }

    /// Connection loop for a mobile socket (pairing or resuming).
    async fn mobile_loop(
        self: &Arc<Self>,
        ws: WebSocketStream<TcpStream>,
        resume: Option<String>,
        peer_addr: SocketAddr,
    ) -> Result<(), RelayError> {
        let (tx, mut rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
        let sender = PeerSender::new(tx);
        let conn_id = sender.conn_id();
        let (mut sink, mut stream) = ws.split();

        let mut paired: Option<String> = None;
        if let Some(token) = resume {
            if self.registry.attach_mobile(&token, sender.clone()) {
                paired = Some(token);
            } else {
                tracing::info!(%peer_addr, "unknown session token, closing");
                send_frame(&mut sink, &Frame::error(None, MSG_SESSION_EXPIRED)).await;
                let frame = CloseFrame {
                    code: CloseCode::from(CLOSE_SESSION_EXPIRED),
                    reason: MSG_SESSION_EXPIRED.into(),
                };
                let _ = sink.send(WsMessage::Close(Some(frame))).await;
                return Ok(());
            }
        }

        let idle = |paired: &Option<String>| {
            if paired.is_some() {
                self.config.dead_timeout
            } else {
                self.config.pairing_idle_timeout
            }
        };

        let deadline = tokio::time::sleep(idle(&paired));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                () = &mut deadline => {
                    tracing::info!(%peer_addr, "mobile idle too long, closing");
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }

                out = rx.recv() => match out {
                    Some(msg) => {
                        let closing = matches!(msg, WsMessage::Close(_));
                        if sink.send(msg).await.is_err() || closing {
                            break;
                        }
                    }
                    None => break,
                },

                frame = stream.next() => match frame {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + idle(&paired));
                        match msg {
                            WsMessage::Text(text) => {
                                let Some(value) = parse_object(text.as_str()) else {
                                    continue;
                                };
                                let stop = self
                                    .on_mobile_frame(&sender, &mut paired, value, &mut sink)
                                    .await;
                                // A successful pairing switches the idle limit.
                                deadline.as_mut().reset(
                                    tokio::time::Instant::now() + idle(&paired),
                                );
                                if stop {
                                    break;
                                }
                            }
                            WsMessage::Ping(data) => {
                                let _ = sink.send(WsMessage::Pong(data)).await;
                            }
                            WsMessage::Close(_) => break,
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(%peer_addr, "mobile read error: {e}");
                        break;
                    }
                    None => break,
                },
            }
        }

        if let Some(token) = paired {
            self.registry.detach_mobile(&token, conn_id);
        }
        Ok(())
    }

    /// Dispatches one parsed frame from a mobile. Returns `true` when the
    /// connection should close.
    async fn on_mobile_frame(
        &self,
        sender: &PeerSender,
        paired: &mut Option<String>,
        mut value: serde_json::Value,
        sink: &mut WsSink,
    ) -> bool {
        let frame_type = value
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();

        let Some(token) = paired.clone() else {
            // PAIR_WAIT: only mobile_connect means anything.
            if frame_type != "mobile_connect" {
                return false;
            }
            let Some(code) = value.get("pairingCode").and_then(|c| c.as_str()) else {
                return false;
            };
            match self.registry.redeem_code(code, sender.clone()) {
                Some(session_token) => {
                    tracing::info!(code = %code, "pairing succeeded");
                    send_frame(
                        sink,
                        &Frame::SessionOk {
                            session_token: session_token.clone(),
                        },
                    )
                    .await;
                    *paired = Some(session_token);
                }
                None => {
                    tracing::debug!(code = %code, "unknown pairing code");
                    send_frame(sink, &Frame::error(None, MSG_INVALID_CODE)).await;
                }
            }
            return false;
        };

        if frame_type == "invalidate_pairing" {
            if let Some(outcome) = self.registry.invalidate(&token) {
                for mobile in outcome.revoked_mobiles {
                    mobile.close(1000, "pairing invalidated");
                }
                if let Some((agent, new_code)) = outcome.rotated {
                    tracing::info!(code = %new_code, "pairing code rotated");
                    let _ = agent.send_frame(&Frame::RegisterOk {
                        pairing_code: new_code,
                    });
                }
            }
            *paired = None;
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: "pairing invalidated".into(),
            };
            let _ = sink.send(WsMessage::Close(Some(frame))).await;
            return true;
        }

        // PAIRED: stamp the originating token over whatever the mobile
        // supplied, then forward, unrecognized types included.
        if let Some(obj) = value.as_object_mut() {
            obj.insert("sessionId".into(), serde_json::Value::String(token.clone()));
        }
        match self.registry.agent_for_session(&token) {
            Some(agent) => {
                let _ = agent.send_value(&value);
            }
            None => {
                send_frame(
                    sink,
                    &Frame::error(Some(token), MSG_AGENT_DISCONNECTED),
                )
                .await;
            }
        }
        false
    }
}

/// Sends a frame on the local sink, best-effort.
async fn send_frame(sink: &mut WsSink, frame: &Frame) {
    if let Ok(json) = serde_json::to_string(frame) {
        let _ = sink.send(WsMessage::Text(json.into())).await;
    }
}

/// Parses a text frame into a JSON object. Malformed JSON and non-object
/// payloads are dropped silently.
fn parse_object(text: &str) -> Option<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.is_object().then_some(value)
}

/// Classifies a connection from its upgrade URL query string.
fn classify(query: Option<&str>) -> Option<Classification> {
    let query = query?;
    let mut kind = None;
    let mut agent_token = None;
    let mut session_token = None;
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        match k.as_ref() {
            "type" => kind = Some(v.into_owned()),
            "agentToken" => agent_token = Some(v.into_owned()),
            "sessionToken" => session_token = Some(v.into_owned()),
            _ => {}
        }
    }
    match kind.as_deref() {
        Some("agent") => {
            let identity = agent_token.filter(|t| !t.is_empty())?;
            Some(Classification::Agent { identity })
        }
        Some("mobile") => match session_token {
            Some(token) if token.is_empty() => None,
            Some(token) => Some(Classification::MobileResume { token }),
            None => Some(Classification::MobilePairing),
        },
        _ => None,
    }
}
