//! Transport handle boundary.
//!
//! The delivery engine only ever talks to a [`Transport`]: an async
//! structured-message sink with a queryable open/closed state. The WebSocket
//! layer provides the channel-backed implementation; tests substitute their
//! own.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

/// Send failure, split so the engine can tell a dead peer from a hiccup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is gone; the connection must be torn down.
    #[error("transport closed")]
    Disconnected,

    /// Retryable failure (backpressure, partial write, ...).
    #[error("transient send failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one JSON frame for the peer. May suspend on backpressure; the
    /// caller applies its own timeout around this.
    async fn send(&self, frame: Value) -> Result<(), TransportError>;

    /// Whether the underlying session is still open.
    fn is_open(&self) -> bool;
}

/// Transport backed by an mpsc channel into a socket writer task.
///
/// The writer side owns the actual socket; once it drops the receiver, every
/// send reports [`TransportError::Disconnected`].
pub struct ChannelTransport {
    sender: mpsc::Sender<Value>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<Value>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: Value) -> Result<(), TransportError> {
        self.sender
            .send(frame)
            .await
            .map_err(|_| TransportError::Disconnected)
    }

    fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_channel_transport_delivers_frames() {
        let (tx, mut rx) = mpsc::channel(4);
        let transport = ChannelTransport::new(tx);

        assert!(transport.is_open());
        transport.send(json!({"n": 1})).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_channel_transport_reports_disconnect() {
        let (tx, rx) = mpsc::channel(4);
        let transport = ChannelTransport::new(tx);

        drop(rx);
        assert!(!transport.is_open());
        let err = transport.send(json!({})).await.unwrap_err();
        assert_eq!(err, TransportError::Disconnected);
    }
}
