//! Broker seams (publish / consume mechanics only).
//!
//! The pipeline never talks to a concrete message broker. It depends on two
//! small traits that any transport (AMQP, Redis Streams, in-memory) can satisfy:
//!
//! - [`Publisher`]: fire a payload at a topic
//! - [`MessageSource`]: pull deliveries from a queue and settle them
//!
//! ## Delivery Contract
//!
//! The broker provides **at-least-once delivery**:
//!
//! - A delivery stays in flight until it is settled with [`MessageSource::ack`]
//!   or [`MessageSource::requeue`]
//! - A consumer that dies mid-attempt leaves the delivery unsettled; what
//!   happens next is the broker's own recovery policy
//! - Consumers settle a delivery only once its processing reached a terminal
//!   state, so every unsettled message can safely be redelivered
//!
//! ## Redelivery
//!
//! `requeue` carries a replacement body. The processor bumps `retry_count`
//! before asking for redelivery, and the new count has to travel with the
//! message or the retry budget would never run out. The `delay` argument is
//! advisory: honoring it (delayed exchange, TTL queue, ...) is up to the broker.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

/// Broker-assigned handle for one in-flight delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryTag(Uuid);

impl DeliveryTag {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeliveryTag {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DeliveryTag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One message handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub queue: String,
    pub payload: Vec<u8>,
    /// `true` when this message was requeued at least once.
    pub redelivered: bool,
    /// Delay requested by the last `requeue`, if any.
    pub backoff_hint: Option<Duration>,
}

/// Publish side of the broker.
///
/// `publish()` can fail (connection loss, unroutable topic, ...). What a failure
/// means is decided by the caller: the originator surfaces it, the
/// dead-letter path logs and swallows it.
pub trait Publisher: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;
}

/// Consume side of the broker.
pub trait MessageSource: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Take the next message from `queue`, or `None` when it is empty.
    fn receive(&self, queue: &str) -> Result<Option<Delivery>, Self::Error>;

    /// Positive acknowledgement: the message is done and can be forgotten.
    fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error>;

    /// Negative acknowledgement with redelivery of `payload`.
    fn requeue(
        &self,
        delivery: &Delivery,
        payload: Vec<u8>,
        delay: Duration,
    ) -> Result<(), Self::Error>;
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    type Error = P::Error;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        (**self).publish(topic, payload)
    }
}

impl<S> MessageSource for Arc<S>
where
    S: MessageSource + ?Sized,
{
    type Error = S::Error;

    fn receive(&self, queue: &str) -> Result<Option<Delivery>, Self::Error> {
        (**self).receive(queue)
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        (**self).ack(delivery)
    }

    fn requeue(
        &self,
        delivery: &Delivery,
        payload: Vec<u8>,
        delay: Duration,
    ) -> Result<(), Self::Error> {
        (**self).requeue(delivery, payload, delay)
    }
}
