use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chargeflow_core::{DomainError, QueueMessage};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Nothing arrived within the dequeue timeout.
    #[error("queue empty")]
    Empty,

    /// The other side of the queue is gone; nothing more can ever arrive
    /// (or be delivered).
    #[error("queue transport disconnected")]
    Disconnected,

    /// A payload could not be encoded or decoded.
    #[error("queue payload codec failure: {0}")]
    Codec(DomainError),
}

impl QueueError {
    /// Only an empty poll is expected and recoverable by polling again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Create a connected producer/consumer pair.
pub fn work_queue() -> (WorkQueueProducer, WorkQueueConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkQueueProducer { tx }, WorkQueueConsumer { rx, closed: false })
}

/// Sending half. Clone it for every producer.
#[derive(Debug, Clone)]
pub struct WorkQueueProducer {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl WorkQueueProducer {
    /// Hand a message over to the queue without waiting for the consumer.
    pub fn enqueue(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let bytes = message.encode().map_err(QueueError::Codec)?;
        self.tx.send(bytes).map_err(|_| QueueError::Disconnected)?;
        debug!(job_id = %message.job.job_id, charges = message.charges.len(), "enqueued batch");
        Ok(())
    }

    /// `true` once the consumer side has been closed or dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half. There is exactly one consumer per queue.
#[derive(Debug)]
pub struct WorkQueueConsumer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    closed: bool,
}

impl WorkQueueConsumer {
    /// Wait up to `timeout` for the next message.
    ///
    /// Cancel safe: if the future is dropped before completing, no message is
    /// lost.
    pub async fn dequeue(&mut self, timeout: Duration) -> Result<QueueMessage, QueueError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Err(_elapsed) => Err(QueueError::Empty),
            Ok(None) => Err(QueueError::Disconnected),
            Ok(Some(bytes)) => QueueMessage::decode(&bytes).map_err(QueueError::Codec),
        }
    }

    /// Take the next message if one is already queued.
    pub fn try_dequeue(&mut self) -> Result<QueueMessage, QueueError> {
        match self.rx.try_recv() {
            Ok(bytes) => QueueMessage::decode(&bytes).map_err(QueueError::Codec),
            Err(mpsc::error::TryRecvError::Empty) if self.closed => Err(QueueError::Disconnected),
            Err(mpsc::error::TryRecvError::Empty) => Err(QueueError::Empty),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(QueueError::Disconnected),
        }
    }

    /// Close the queue and throw away everything still buffered.
    ///
    /// Producers see `Disconnected` from then on. Returns the number of
    /// discarded messages.
    pub fn drain_discard(&mut self) -> usize {
        self.rx.close();
        self.closed = true;

        let mut discarded = 0;
        while self.rx.try_recv().is_ok() {
            discarded += 1;
        }

        if discarded > 0 {
            warn!(discarded, "discarded queued batches on shutdown");
        }
        discarded
    }
}
