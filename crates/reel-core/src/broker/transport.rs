use std::{fmt, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport connection closed")]
    Closed,

    #[error("broker rejected the operation: {0}")]
    Rejected(String),

    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Per-message delivery settings for a durable publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub ttl: Option<Duration>,
    /// Routing key the message is republished under when `ttl` runs out.
    pub dead_letter: Option<String>,
}

/// Durable broker seam.
///
/// `publish` must only return `Ok` once the broker accepted the message.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn publish(
        &self,
        routing_key: &str,
        payload: Vec<u8>,
        options: PublishOptions,
    ) -> Result<(), TransportError>;

    /// Create `queue` if needed and bind it to `routing_key`.
    async fn declare(&self, queue: &str, routing_key: &str) -> Result<(), TransportError>;

    /// Start consuming `queue` with at most `prefetch` unsettled deliveries.
    async fn subscribe(
        &self,
        queue: &str,
        prefetch: usize,
    ) -> Result<Box<dyn Subscription>, TransportError>;
}

/// Stream of deliveries from one queue.
///
/// `None` means the subscription ended; `Err` means the connection was lost.
#[async_trait]
pub trait Subscription: Send {
    async fn next(&mut self) -> Option<Result<Delivery, TransportError>>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acker: Send {
    async fn ack(&mut self) -> Result<(), TransportError>;
    async fn requeue(&mut self) -> Result<(), TransportError>;
}

/// One consumed message awaiting settlement.
pub struct Delivery {
    pub payload: Vec<u8>,
    /// Set when the broker delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(payload: Vec<u8>, redelivered: bool, acker: Box<dyn Acker>) -> Self {
        Self {
            payload,
            redelivered,
            acker,
        }
    }

    /// Acknowledge as handled.
    pub async fn ack(mut self) -> Result<(), TransportError> {
        self.acker.ack().await
    }

    /// Return to the queue for redelivery.
    pub async fn requeue(mut self) -> Result<(), TransportError> {
        self.acker.requeue().await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("bytes", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}
