//! Persistent WebSocket client connecting an agent to its relay.
//!
//! Maintains exactly one live connection under one agent identity:
//! registers on connect, heartbeats while open, reconnects on loss after a
//! fixed delay, and dispatches inbound frames to registered handlers in
//! registration order. Nothing is queued across a disconnect; `send`
//! simply returns `false` while the socket is down.

mod client;
mod pumps;

pub use client::{ClientConfig, FrameHandler, RelayClient};

/// Errors from the relay client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid relay URL: {0}")]
    Url(#[from] url::ParseError),
}
