//! Dead letter handler.
//!
//! Dead-lettered work items are surfaced for manual review. Processing them
//! never throws and never publishes back to the dead-letter topic, so the DLQ
//! consumer cannot start a second failure cycle.

use tracing::{error, info, warn};

use ordermail_core::WorkItem;
use ordermail_events::{MAIN_TOPIC, Publisher, decode, encode};

use crate::consumer::{Disposition, MessageHandler};

pub struct DeadLetterHandler<P> {
    publisher: P,
    requeue_on_process: bool,
}

impl<P> DeadLetterHandler<P>
where
    P: Publisher,
{
    /// Handler that only logs. Requeueing stays an explicit operator action.
    pub fn new(publisher: P) -> Self {
        Self {
            publisher,
            requeue_on_process: false,
        }
    }

    /// Requeue every processed item to the main topic.
    pub fn with_requeue(mut self, requeue_on_process: bool) -> Self {
        self.requeue_on_process = requeue_on_process;
        self
    }

    /// Log one dead-lettered payload. Returns the decoded item, or `None` when
    /// the payload could not be decoded (it is logged and dropped).
    pub fn process(&self, raw: &[u8]) -> Option<WorkItem> {
        let item = match decode(raw) {
            Ok(item) => item,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(raw),
                    "failed to decode dead letter message"
                );
                return None;
            }
        };

        info!(
            order_id = %item.order_id_display(),
            retry_count = item.retry_count,
            payload = %String::from_utf8_lossy(raw),
            "processing dead letter message"
        );

        warn!(
            order_id = %item.order_id_display(),
            increment_id = item.increment_id_or_unknown(),
            customer_email = item.customer_email_or_unknown(),
            retry_count = item.retry_count,
            "order email permanently failed, manual review required"
        );

        if self.requeue_on_process {
            self.requeue(item.clone());
        }

        Some(item)
    }

    /// Send an item back to the main topic with a fresh retry budget.
    ///
    /// Returns `false` when nothing was published. Failures are logged, never raised.
    pub fn requeue(&self, mut item: WorkItem) -> bool {
        let Some(order_id) = item.order_id else {
            warn!("refusing to requeue dead letter without order_id");
            return false;
        };

        item.retry_count = 0;

        let payload = match encode(&item) {
            Ok(payload) => payload,
            Err(e) => {
                error!(order_id = %order_id, error = %e, "failed to encode requeued message");
                return false;
            }
        };

        match self.publisher.publish(MAIN_TOPIC, payload) {
            Ok(()) => {
                info!(order_id = %order_id, topic = MAIN_TOPIC, "requeued dead letter message");
                true
            }
            Err(e) => {
                error!(order_id = %order_id, error = %e, "failed to requeue dead letter message");
                false
            }
        }
    }
}

impl<P> MessageHandler for DeadLetterHandler<P>
where
    P: Publisher,
{
    fn handle(&self, payload: &[u8]) -> Disposition {
        self.process(payload);
        Disposition::Ack
    }
}
