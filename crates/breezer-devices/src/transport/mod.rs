/*!
 * Transport boundary.
 *
 * The driver needs only a handful of primitives from the platform BLE stack.
 * They are collected in the [`Transport`] trait; everything above it
 * (framing, retries, sessions, codecs) is platform independent.
 */
use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::TransportError;

pub mod dummy;

#[cfg(feature = "btleplug")]
pub mod btleplug;

/// Result type for transport primitives
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Producer side of the notification channel
///
/// Transports push every raw notification into the sink; the session
/// consumes them. The channel is bounded: when it is full the notification
/// is dropped with a warning.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<Bytes>,
}

impl NotificationSink {
    /// Wrap a channel sender
    pub fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }

    /// Deliver one notification, returning whether it was queued
    pub fn deliver(&self, data: &[u8]) -> bool {
        match self.tx.try_send(Bytes::copy_from_slice(data)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Notification queue is full, dropping {} bytes", data.len());
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Notification queue is closed, dropping {} bytes", data.len());
                false
            }
        }
    }

    /// Whether the consumer is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Primitives the driver requires from a BLE stack
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Address of the peripheral
    fn address(&self) -> String;

    /// Open the link
    async fn connect(&self) -> TransportResult<()>;

    /// Close the link
    async fn disconnect(&self) -> TransportResult<()>;

    /// Whether the link is up, as reported by the stack
    async fn is_connected(&self) -> bool;

    /// Write one frame to a characteristic
    async fn write(&self, characteristic: Uuid, data: &[u8]) -> TransportResult<()>;

    /// Route notifications of a characteristic into `sink`
    async fn subscribe(&self, characteristic: Uuid, sink: NotificationSink) -> TransportResult<()>;

    /// Link-level pairing
    async fn pair(&self) -> TransportResult<()> {
        debug!("Transport for {} has no pairing step", self.address());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_delivers_until_full() {
        let (tx, mut rx) = mpsc::channel(2);
        let sink = NotificationSink::new(tx);

        assert!(sink.deliver(&[1]));
        assert!(sink.deliver(&[2]));
        assert!(!sink.deliver(&[3]));

        assert_eq!(rx.recv().await.unwrap().as_ref(), &[1]);
        assert_eq!(rx.recv().await.unwrap().as_ref(), &[2]);
    }

    #[tokio::test]
    async fn test_sink_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(2);
        let sink = NotificationSink::new(tx);
        drop(rx);

        assert!(sink.is_closed());
        assert!(!sink.deliver(&[1]));
    }
}
