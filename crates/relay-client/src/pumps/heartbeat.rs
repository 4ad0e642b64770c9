//! Application-level heartbeat pump.
//!
//! The relay routes by session token, so heartbeats carry the sentinel
//! session id and die at the relay after refreshing its dead-connection
//! timer. They are JSON `ping` frames, not WebSocket pings; the protocol
//! keeps keepalive at the application layer.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use claude_mobile_protocol::Frame;
use claude_mobile_protocol::constants::HEARTBEAT_SESSION_ID;

/// Sends a heartbeat ping every `period` until cancellation.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    let frame = Frame::Ping {
        session_id: HEARTBEAT_SESSION_ID.into(),
    };
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(_) => return,
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let msg = tungstenite::Message::Text(json.clone().into());
                if write_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
    }
}
