use std::time::Duration;

/// Interval between agent heartbeat pings.
pub const HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

/// Sentinel `sessionId` carried by agent heartbeat pings.
///
/// The relay routes by session token, so the sentinel never matches a live
/// session and the frame is dropped after refreshing the dead-connection
/// timer.
pub const HEARTBEAT_SESSION_ID: &str = "__heartbeat__";

/// Fixed delay between agent reconnection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A socket that produces no frames for this long is considered dead
/// and closed by the relay.
pub const CONNECTION_DEAD_TIMEOUT: Duration = Duration::from_secs(90);

/// How long an unpaired mobile socket may idle before the relay closes it.
pub const PAIRING_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum frame size in bytes (1 MB). The protocol is text-only; anything
/// larger is a misbehaving peer.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Number of decimal digits in a pairing code.
pub const PAIRING_CODE_LEN: usize = 6;

/// Close code for a connection whose upgrade URL could not be classified.
pub const CLOSE_BAD_HANDSHAKE: u16 = 4000;

/// Close code for a mobile presenting a session token the relay no longer
/// knows.
pub const CLOSE_SESSION_EXPIRED: u16 = 4001;

/// Error message for an unknown or revoked pairing code.
pub const MSG_INVALID_CODE: &str = "Invalid or expired pairing code";

/// Error message for a session token that no longer resolves.
pub const MSG_SESSION_EXPIRED: &str = "Session expired — reconnect";

/// Error message for a frame that could not reach a live agent.
pub const MSG_AGENT_DISCONNECTED: &str = "Agent disconnected";
