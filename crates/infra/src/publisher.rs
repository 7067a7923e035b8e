//! Originator side: turn a placed order into a queued work item.
//!
//! Whether the confirmation email is queued or sent synchronously is decided
//! here, once, from [`QueueConfig::enabled`]. The consumer side only ever sees
//! work items arriving on the main topic.

use tracing::{error, info, warn};

use ordermail_core::{DomainError, Order, OrderId, WorkItem};
use ordermail_events::{EncodeError, MAIN_TOPIC, Publisher, encode};

use crate::config::QueueConfig;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error("failed to publish to {topic}: {source}")]
    Transport {
        topic: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Publishes work items to the main order email topic.
#[derive(Debug, Clone)]
pub struct OrderEmailPublisher<P> {
    publisher: P,
}

impl<P> OrderEmailPublisher<P>
where
    P: Publisher,
{
    pub fn new(publisher: P) -> Self {
        Self { publisher }
    }

    pub fn publish(&self, item: &WorkItem) -> Result<(), PublishError> {
        let order_id = item.order_id_display();

        let payload = encode(item).inspect_err(|e| {
            error!(order_id = %order_id, error = %e, "failed to encode order email message");
        })?;

        self.publisher
            .publish(MAIN_TOPIC, payload)
            .map_err(|e| {
                error!(order_id = %order_id, error = %e, "failed to publish order email message");
                PublishError::Transport {
                    topic: MAIN_TOPIC,
                    source: Box::new(e),
                }
            })?;

        info!(order_id = %order_id, topic = MAIN_TOPIC, "order email queued");
        Ok(())
    }
}

/// What happened to the confirmation email of a placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A work item was published; the consumer will send the email.
    Queued(OrderId),
    /// The caller must send the email synchronously.
    SendDirect,
    /// The order has no id yet; nothing to do.
    Skipped,
}

/// Reacts to "order placed" by queueing the confirmation email.
pub struct OrderPlacedDispatcher<P> {
    publisher: OrderEmailPublisher<P>,
    enabled: bool,
}

impl<P> OrderPlacedDispatcher<P>
where
    P: Publisher,
{
    pub fn new(publisher: P, config: &QueueConfig) -> Self {
        Self {
            publisher: OrderEmailPublisher::new(publisher),
            enabled: config.enabled,
        }
    }

    pub fn on_order_placed(&self, order: &Order) -> Dispatch {
        if !self.enabled {
            info!(
                increment_id = order.increment_id.as_deref().unwrap_or("unknown"),
                "order email queue is disabled, email will be sent synchronously"
            );
            return Dispatch::SendDirect;
        }

        let item = match WorkItem::from_order(order) {
            Ok(item) => item,
            Err(DomainError::MissingOrderId) => {
                warn!(
                    increment_id = order.increment_id.as_deref().unwrap_or("unknown"),
                    "order has no id, not queueing confirmation email"
                );
                return Dispatch::Skipped;
            }
            Err(e) => {
                warn!(error = %e, "cannot build order email message, sending directly");
                return Dispatch::SendDirect;
            }
        };

        let Some(order_id) = item.order_id else {
            return Dispatch::Skipped;
        };

        match self.publisher.publish(&item) {
            Ok(()) => Dispatch::Queued(order_id),
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "queueing failed, sending order email directly");
                Dispatch::SendDirect
            }
        }
    }
}
