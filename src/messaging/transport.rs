//! Broker seams shared by the AMQP and in-memory implementations.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::EventType;

/// A delivery from the request queue awaiting acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    /// Set when the broker delivered this message before without an ack
    pub redelivered: bool,
}

/// Publishes enveloped events to the queue of their type.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Wrap `data` in an envelope stamped now and enqueue it persistently on
    /// the request queue. Event types without an envelope queue are rejected.
    async fn publish(&self, event_type: EventType, data: serde_json::Value) -> Result<()>;
}

/// Round-trip connectivity check against the broker.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn ping(&self) -> Result<()>;
}

/// Opens consumer sessions on the request queue for the worker.
#[async_trait]
pub trait BrokerTransport: Send + Sync + 'static {
    type Session: ConsumerSession;

    /// Connect, open a channel, declare both queues, limit prefetch to one
    /// and start consuming `billing_requests`.
    async fn open_consumer(&self) -> Result<Self::Session>;
}

/// A live connection/channel pair owned by one worker.
#[async_trait]
pub trait ConsumerSession: Send + Sync {
    /// Wait for the next delivery. `None` means the consumer was cancelled.
    async fn recv(&mut self) -> Option<Result<InboundMessage>>;

    /// Publish a bare body persistently to `queue` on this channel.
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()>;

    /// Positively acknowledge a delivery.
    async fn ack(&self, delivery_tag: u64) -> Result<()>;

    /// Close the underlying connection. Errors are logged, not returned.
    async fn close(&mut self);
}
