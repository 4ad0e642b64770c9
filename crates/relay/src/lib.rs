//! WebSocket relay for mobile-agent sessions.
//!
//! A single logical instance terminates every connection, classifies it
//! from the upgrade URL, runs the pairing state machine, and forwards
//! frames between one agent and the mobile sessions bound to it. All state
//! lives in memory: after a restart, agents re-register (which reissues
//! their pairing code) and mobiles fall back to re-pairing.

mod peer;
mod registry;
mod server;

pub use peer::PeerSender;
pub use registry::{Invalidation, Registration, Registry};
pub use server::{RelayConfig, RelayServer};

/// Errors produced by the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
