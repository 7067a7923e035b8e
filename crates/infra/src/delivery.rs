//! Delivery attempt executor.
//!
//! One attempt = resolve the order, then hand it to the mail sender. Failures
//! are classified here, once, so the state machine only has to ask
//! [`AttemptFailure::is_transient`].

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use ordermail_core::{Order, OrderId, WorkItem};

use crate::config::QueueConfig;

/// Read-only access to orders.
pub trait OrderStore: Send + Sync {
    /// `Ok(None)` when the order does not exist.
    fn get(&self, order_id: OrderId) -> anyhow::Result<Option<Order>>;
}

/// Sends the order confirmation email.
pub trait MailSender: Send + Sync {
    /// `Ok(false)` when the sender declined without raising an error.
    fn send(&self, order: &Order) -> anyhow::Result<bool>;
}

impl<S> OrderStore for Arc<S>
where
    S: OrderStore + ?Sized,
{
    fn get(&self, order_id: OrderId) -> anyhow::Result<Option<Order>> {
        (**self).get(order_id)
    }
}

impl<M> MailSender for Arc<M>
where
    M: MailSender + ?Sized,
{
    fn send(&self, order: &Order) -> anyhow::Result<bool> {
        (**self).send(order)
    }
}

/// Why an attempt did not deliver the email.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptFailure {
    /// The work item has no order id. Permanent.
    #[error("invalid message: missing order_id")]
    InvalidMessage,

    /// The order does not exist. Permanent.
    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    /// Lookup or send failed in a way that may succeed later.
    #[error("{0}")]
    TransientSendFailure(String),
}

impl AttemptFailure {
    pub fn is_transient(&self) -> bool {
        matches!(self, AttemptFailure::TransientSendFailure(_))
    }
}

/// Synthetic failures for exercising the retry path.
///
/// This is the only place that decides whether an attempt is failed on
/// purpose; `Disabled` makes attempts fully deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureInjection {
    #[default]
    Disabled,
    /// Fail roughly `percent`% of attempts (`100` fails all of them).
    Random { percent: u8 },
}

impl FailureInjection {
    pub fn from_config(config: &QueueConfig) -> Self {
        if config.simulate_failures {
            Self::Random {
                percent: config.failure_rate_percent.min(100),
            }
        } else {
            Self::Disabled
        }
    }

    pub fn should_fail(&self) -> bool {
        match *self {
            FailureInjection::Disabled => false,
            FailureInjection::Random { percent: 0 } => false,
            FailureInjection::Random { percent } => {
                rand::thread_rng().gen_range(1..=100u8) <= percent
            }
        }
    }
}

/// Runs a single delivery attempt for a work item.
///
/// Side effects are limited to the mail sender call and logging; nothing is
/// persisted here.
pub struct DeliveryExecutor<S, M> {
    orders: S,
    mailer: M,
    failures: FailureInjection,
}

impl<S, M> DeliveryExecutor<S, M>
where
    S: OrderStore,
    M: MailSender,
{
    pub fn new(orders: S, mailer: M) -> Self {
        Self {
            orders,
            mailer,
            failures: FailureInjection::Disabled,
        }
    }

    pub fn with_failure_injection(mut self, failures: FailureInjection) -> Self {
        self.failures = failures;
        self
    }

    /// Attempt delivery, returning the order the email was sent for.
    pub fn attempt(&self, item: &WorkItem) -> Result<Order, AttemptFailure> {
        let order_id = item.validate().map_err(|_| AttemptFailure::InvalidMessage)?;

        let order = self
            .orders
            .get(order_id)
            .map_err(|e| AttemptFailure::TransientSendFailure(format!("order lookup failed: {e:#}")))?
            .ok_or(AttemptFailure::OrderNotFound(order_id))?;

        if self.failures.should_fail() {
            return Err(AttemptFailure::TransientSendFailure(
                "simulated failure for testing purposes".to_string(),
            ));
        }

        match self.mailer.send(&order) {
            Ok(true) => {
                debug!(order_id = %order_id, "mail sender accepted order email");
                Ok(order)
            }
            Ok(false) => Err(AttemptFailure::TransientSendFailure(
                "failed to send order confirmation email".to_string(),
            )),
            Err(e) => Err(AttemptFailure::TransientSendFailure(format!(
                "mail sender error: {e:#}"
            ))),
        }
    }
}
