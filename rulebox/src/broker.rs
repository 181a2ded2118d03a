//! Outbound broker seam and the in-process channel broker.
//!
//! The engine republishes qualifying control events through an
//! [`EventPublisher`] and consumes its own control feed from a channel
//! receiver. [`LocalBroker`] wires both halves over one in-process tokio
//! channel; cross-process brokers implement [`EventPublisher`] against their
//! own transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use rulebox_shared::{EngineError, EngineResult, Event};

/// Handle used to publish events to a broker topic.
pub trait EventPublisher: Send + Sync {
    /// Publish one event. Must not block on slow consumers.
    fn send(&self, event: &Event) -> EngineResult<()>;

    /// Close the handle; subsequent sends fail.
    fn close(&self);
}

/// In-process broker over an unbounded tokio channel.
///
/// The sender half implements [`EventPublisher`]; the receiver half is handed
/// to the engine as its control-plane subscription. Dropping the receiver (or
/// closing the publisher) ends the subscriber loop.
pub struct LocalBroker;

impl LocalBroker {
    /// Create a connected publisher/subscription pair.
    pub fn channel() -> (Arc<ChannelPublisher>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(ChannelPublisher {
                tx,
                closed: AtomicBool::new(false),
            }),
            rx,
        )
    }
}

/// Publisher half of a [`LocalBroker`] channel.
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Event>,
    closed: AtomicBool,
}

impl EventPublisher for ChannelPublisher {
    fn send(&self, event: &Event) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Broker("publisher is closed".to_string()));
        }
        self.tx
            .send(event.clone())
            .map_err(|_| EngineError::Broker("subscription dropped".to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reaches_subscription() {
        let (publisher, mut rx) = LocalBroker::channel();
        publisher.send(&Event::new("cell1", "rule.create", false)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.cell_id.as_deref(), Some("cell1"));
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (publisher, _rx) = LocalBroker::channel();
        publisher.close();
        assert!(publisher.send(&Event::new("cell1", "rule.create", false)).is_err());
    }

    #[tokio::test]
    async fn test_send_after_subscription_drop_fails() {
        let (publisher, rx) = LocalBroker::channel();
        drop(rx);
        assert!(publisher.send(&Event::new("cell1", "rule.create", false)).is_err());
    }
}
