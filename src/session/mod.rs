//! Broker session
//!
//! A session owns one broker connection and exposes the four primitives the
//! rest of the crate needs: passive queue binding, manual-ack consumption
//! with explicit cancellation, fire-and-forget publishing and an idempotent
//! close.
//!
//! Two backends implement [`Broker`]:
//! - [`AmqpSession`]: RabbitMQ over AMQP 0-9-1 (`lapin`)
//! - [`MemoryBroker`]: an in-process topic exchange, used by tests and by
//!   `send --dry-run`
//!
//! Consumption never auto-acknowledges. Every [`Delivery`] must be settled
//! with a [`Disposition`] by whoever pulled it from the stream.

pub mod amqp;
pub mod memory;
pub mod retry;

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::utils::Result;

pub use amqp::AmqpSession;
pub use memory::{MemoryBroker, PublishedMessage};
pub use retry::RetryPolicy;

/// Stream of deliveries from one queue. An `Err` item means the consumer is
/// gone (connection or channel loss) and no further items will follow.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Bind an existing queue to an existing exchange. Nothing is declared:
    /// a missing queue or exchange is a `Topology` error.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Start a manual-ack consumer on `queue` registered as `consumer_tag`.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    /// Ask the broker to stop delivering to `consumer_tag`. Dropping the
    /// stream alone leaves the consumer registered until the channel closes.
    /// Unknown tags are ignored.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Publish without waiting for a broker confirm.
    async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// What the consumer decided to do with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

/// Backend-specific settlement of one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;
    async fn reject(&self, requeue: bool) -> Result<()>;
}

/// A message pulled from a queue, not yet settled.
pub struct Delivery {
    pub routing_key: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        routing_key: String,
        body: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            routing_key,
            body,
            redelivered,
            acker,
        }
    }

    /// Consume the delivery by acknowledging or rejecting it.
    pub async fn settle(self, disposition: Disposition) -> Result<()> {
        match disposition {
            Disposition::Ack => self.acker.ack().await,
            Disposition::Reject { requeue } => self.acker.reject(requeue).await,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("routing_key", &self.routing_key)
            .field("body_len", &self.body.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

#[cfg(test)]
mod tests;
