//! Wire protocol for mobile-relay-agent communication.
//!
//! Every frame is exactly one JSON object carried as a WebSocket text
//! message, tagged by a mandatory `type` field. The relay interprets only
//! the handshake frames; everything else is routed opaquely by `sessionId`.

pub mod constants;
pub mod frames;
pub mod types;

// Re-export primary types for convenience.
pub use frames::Frame;
pub use types::Repository;
