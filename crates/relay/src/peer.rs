//! Outbound handle for a connected socket.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};

use claude_mobile_protocol::Frame;

/// Outbound frame buffer per socket. Frames beyond this are dropped, never
/// queued: a slow or absent peer does not exert backpressure on the relay.
pub(crate) const SEND_BUFFER_SIZE: usize = 256;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for sending messages to one connected socket.
///
/// Cloneable and cheap. The connection id distinguishes a displaced socket
/// from its replacement, so a late disconnect of the old socket cannot
/// clear the new socket's registry pointer.
#[derive(Debug, Clone)]
pub struct PeerSender {
    conn_id: u64,
    tx: mpsc::Sender<WsMessage>,
}

impl PeerSender {
    pub(crate) fn new(tx: mpsc::Sender<WsMessage>) -> Self {
        Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Stable id of the underlying connection.
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Sends a protocol frame as JSON text. Returns `Err` when the buffer
    /// is full or the socket is gone; the frame is dropped either way.
    pub fn send_frame(&self, frame: &Frame) -> Result<(), SendError> {
        let json = serde_json::to_string(frame).map_err(|_| SendError)?;
        self.send_text(json)
    }

    /// Sends a pre-assembled JSON object (used when forwarding frames the
    /// relay does not interpret).
    pub fn send_value(&self, value: &serde_json::Value) -> Result<(), SendError> {
        self.send_text(value.to_string())
    }

    fn send_text(&self, json: String) -> Result<(), SendError> {
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!(conn = self.conn_id, "send buffer full or closed, dropping frame");
            SendError
        })
    }

    /// Queues a close frame with the given code. The owning connection
    /// task sends it and shuts down.
    pub fn close(&self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let _ = self.tx.try_send(WsMessage::Close(Some(frame)));
    }

    /// Returns `true` while the owning connection task is alive.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Error returned when the send buffer is full or the connection is gone.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn conn_ids_are_unique() {
        let (tx, _rx) = mpsc::channel(4);
        let a = PeerSender::new(tx.clone());
        let b = PeerSender::new(tx);
        assert_ne!(a.conn_id(), b.conn_id());
    }

    #[tokio::test]
    async fn send_frame_serializes_text() {
        let (tx, mut rx) = mpsc::channel(4);
        let peer = PeerSender::new(tx);
        peer.send_frame(&Frame::RegisterOk {
            pairing_code: "123456".into(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            WsMessage::Text(text) => {
                assert!(text.as_str().contains("\"register_ok\""));
                assert!(text.as_str().contains("123456"));
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_after_drop_fails() {
        let (tx, rx) = mpsc::channel(4);
        let peer = PeerSender::new(tx);
        drop(rx);
        assert!(!peer.is_connected());
        assert!(
            peer.send_frame(&Frame::StreamEnd {
                session_id: "U".into()
            })
            .is_err()
        );
    }

    #[tokio::test]
    async fn close_queues_close_frame() {
        let (tx, mut rx) = mpsc::channel(4);
        let peer = PeerSender::new(tx);
        peer.close(4001, "Session expired");
        match rx.recv().await.unwrap() {
            WsMessage::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 4001);
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}
