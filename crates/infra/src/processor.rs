//! Processing state machine for one order email message.
//!
//! ```text
//! Received -> Decoding -> Validating -> Attempting -> Succeeded
//!                 |            |             |     -> RetrySignaled
//!                 |            |             |     -> DeadLettered
//!                 +------------+-------------+-------> Rejected
//! ```
//!
//! Every path ends in an [`Outcome`] value. Nothing here re-publishes to the
//! main topic or sleeps: a retry is handed back to the broker adapter as
//! [`Disposition::Requeue`], which owns redelivery and its timing.
//!
//! Dead-lettering is best-effort. A failed DLQ publish is logged and the message
//! is still considered handled, so DLQ outages never feed back into the
//! original message's retry accounting.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use ordermail_core::{OrderId, WorkItem};
use ordermail_events::{DEAD_LETTER_TOPIC, Publisher, decode, encode};

use crate::config::QueueConfig;
use crate::consumer::{Disposition, MessageHandler};
use crate::delivery::{AttemptFailure, DeliveryExecutor, FailureInjection, MailSender, OrderStore};
use crate::retry::{RetryDecision, RetryPolicy};

/// States a message moves through while being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProcessingState {
    Received,
    Decoding,
    Validating,
    Attempting,
    Succeeded,
    RetrySignaled,
    DeadLettered,
    Rejected,
}

impl ProcessingState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Succeeded
                | ProcessingState::RetrySignaled
                | ProcessingState::DeadLettered
                | ProcessingState::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Received => "received",
            ProcessingState::Decoding => "decoding",
            ProcessingState::Validating => "validating",
            ProcessingState::Attempting => "attempting",
            ProcessingState::Succeeded => "succeeded",
            ProcessingState::RetrySignaled => "retry_signaled",
            ProcessingState::DeadLettered => "dead_lettered",
            ProcessingState::Rejected => "rejected",
        }
    }
}

impl core::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a message was dropped without retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// The payload is not a valid envelope.
    Malformed,
    /// The envelope has no usable `order_id`.
    MissingOrderId,
    /// The referenced order does not exist.
    OrderNotFound(OrderId),
    /// The updated envelope could not be serialized for redelivery.
    Unencodable,
}

/// Terminal result of processing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded {
        order_id: OrderId,
        retry_count: u32,
    },
    /// The attempt failed and the budget allows another one. `payload` is the
    /// envelope with the incremented `retry_count`.
    RetrySignaled {
        item: WorkItem,
        decision: RetryDecision,
        payload: Vec<u8>,
    },
    /// The budget is exhausted. `published` is `false` when the DLQ publish failed.
    DeadLettered {
        item: WorkItem,
        published: bool,
        error: String,
    },
    Rejected {
        reason: RejectReason,
    },
}

impl Outcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            Outcome::Succeeded { .. } => ProcessingState::Succeeded,
            Outcome::RetrySignaled { .. } => ProcessingState::RetrySignaled,
            Outcome::DeadLettered { .. } => ProcessingState::DeadLettered,
            Outcome::Rejected { .. } => ProcessingState::Rejected,
        }
    }

    /// What the broker adapter must do with the delivery.
    pub fn disposition(self) -> Disposition {
        match self {
            Outcome::RetrySignaled {
                decision, payload, ..
            } => Disposition::Requeue {
                payload,
                backoff: decision.backoff(),
            },
            Outcome::Succeeded { .. } | Outcome::DeadLettered { .. } | Outcome::Rejected { .. } => {
                Disposition::Ack
            }
        }
    }
}

/// Consumer-side processor for the main order email queue.
pub struct EmailProcessor<S, M, P> {
    executor: DeliveryExecutor<S, M>,
    policy: RetryPolicy,
    dead_letters: P,
}

impl<S, M, P> EmailProcessor<S, M, P>
where
    S: OrderStore,
    M: MailSender,
    P: Publisher,
{
    pub fn new(executor: DeliveryExecutor<S, M>, policy: RetryPolicy, dead_letters: P) -> Self {
        Self {
            executor,
            policy,
            dead_letters,
        }
    }

    /// Wire a processor from collaborators and queue settings.
    pub fn from_config(orders: S, mailer: M, dead_letters: P, config: &QueueConfig) -> Self {
        let executor = DeliveryExecutor::new(orders, mailer)
            .with_failure_injection(FailureInjection::from_config(config));
        Self::new(executor, RetryPolicy::from_config(config), dead_letters)
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Run one raw message through the state machine.
    pub fn process(&self, raw: &[u8]) -> Outcome {
        trace_state(ProcessingState::Received, None);

        trace_state(ProcessingState::Decoding, None);
        let item = match decode(raw) {
            Ok(item) => item,
            Err(e) => {
                error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(raw),
                    "failed to decode order email message"
                );
                return Outcome::Rejected {
                    reason: RejectReason::Malformed,
                };
            }
        };

        trace_state(ProcessingState::Validating, item.order_id);
        let order_id = match item.validate() {
            Ok(order_id) => order_id,
            Err(_) => {
                error!(
                    payload = %String::from_utf8_lossy(raw),
                    "invalid message: missing order_id"
                );
                return Outcome::Rejected {
                    reason: RejectReason::MissingOrderId,
                };
            }
        };

        info!(
            order_id = %order_id,
            retry_count = item.retry_count,
            "processing order email"
        );

        trace_state(ProcessingState::Attempting, Some(order_id));
        match self.executor.attempt(&item) {
            Ok(order) => {
                info!(
                    order_id = %order_id,
                    increment_id = order.increment_id.as_deref().unwrap_or("unknown"),
                    customer_email = order.customer_email.as_deref().unwrap_or("unknown"),
                    retry_count = item.retry_count,
                    "order email sent"
                );
                Outcome::Succeeded {
                    order_id,
                    retry_count: item.retry_count,
                }
            }
            Err(AttemptFailure::InvalidMessage) => {
                error!(order_id = %order_id, "invalid message: missing order_id");
                Outcome::Rejected {
                    reason: RejectReason::MissingOrderId,
                }
            }
            Err(AttemptFailure::OrderNotFound(missing)) => {
                warn!(order_id = %missing, "order not found, dropping message");
                Outcome::Rejected {
                    reason: RejectReason::OrderNotFound(missing),
                }
            }
            Err(failure) => self.handle_failure(order_id, item, failure),
        }
    }

    fn handle_failure(&self, order_id: OrderId, mut item: WorkItem, failure: AttemptFailure) -> Outcome {
        let decision = self.policy.decide(item.retry_count);
        let error = failure.to_string();

        warn!(
            order_id = %order_id,
            attempt = decision.next_retry_count,
            max_attempts = self.policy.max_retries(),
            error = %error,
            "order email attempt failed"
        );

        item.retry_count = decision.next_retry_count;

        if decision.should_retry {
            let payload = match encode(&item) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "failed to encode retry envelope");
                    return Outcome::Rejected {
                        reason: RejectReason::Unencodable,
                    };
                }
            };

            info!(
                order_id = %order_id,
                retry_count = decision.next_retry_count,
                backoff_seconds = decision.backoff_seconds,
                "retrying order email after backoff"
            );

            return Outcome::RetrySignaled {
                item,
                decision,
                payload,
            };
        }

        error!(
            order_id = %order_id,
            retry_count = item.retry_count,
            error = %error,
            "max retries exceeded, sending to dead letter queue"
        );

        let published = self.publish_dead_letter(&item);
        Outcome::DeadLettered {
            item,
            published,
            error,
        }
    }

    fn publish_dead_letter(&self, item: &WorkItem) -> bool {
        let payload = match encode(item) {
            Ok(payload) => payload,
            Err(e) => {
                error!(order_id = %item.order_id_display(), error = %e, "failed to encode dead letter");
                return false;
            }
        };

        match self.dead_letters.publish(DEAD_LETTER_TOPIC, payload) {
            Ok(()) => {
                info!(
                    order_id = %item.order_id_display(),
                    retry_count = item.retry_count,
                    topic = DEAD_LETTER_TOPIC,
                    "order email sent to dead letter queue"
                );
                true
            }
            Err(e) => {
                error!(
                    order_id = %item.order_id_display(),
                    error = %e,
                    "failed to publish to dead letter queue"
                );
                false
            }
        }
    }
}

impl<S, M, P> MessageHandler for EmailProcessor<S, M, P>
where
    S: OrderStore,
    M: MailSender,
    P: Publisher,
{
    fn handle(&self, payload: &[u8]) -> Disposition {
        self.process(payload).disposition()
    }
}

fn trace_state(state: ProcessingState, order_id: Option<OrderId>) {
    debug!(state = %state, order_id = ?order_id, "order email state");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use proptest::prelude::*;
    use tracing::Level;

    use ordermail_core::Order;
    use ordermail_events::{DEAD_LETTER_QUEUE, InMemoryBroker};

    use super::*;
    use crate::order_store::InMemoryOrderStore;
    use crate::testing::{FailingOrderStore, ScriptedMailSender, capture_logs};

    type TestProcessor = EmailProcessor<Arc<InMemoryOrderStore>, ScriptedMailSender, Arc<InMemoryBroker>>;

    fn order_id(n: u64) -> OrderId {
        OrderId::new(n).unwrap()
    }

    fn orders() -> Arc<InMemoryOrderStore> {
        let store = InMemoryOrderStore::arc();
        store.insert(
            Order::new(order_id(42), "000000042").with_customer("jane@example.com", "Jane", "Doe"),
        );
        store
    }

    fn processor(
        mailer: ScriptedMailSender,
        broker: Arc<InMemoryBroker>,
        max_retries: u32,
    ) -> TestProcessor {
        EmailProcessor::new(
            DeliveryExecutor::new(orders(), mailer),
            RetryPolicy::new(max_retries),
            broker,
        )
    }

    fn payload(item: &WorkItem) -> Vec<u8> {
        encode(item).unwrap()
    }

    /// Feed the message back in until the processor stops asking for a retry.
    fn run_to_completion(processor: &TestProcessor, mut raw: Vec<u8>) -> (Outcome, usize) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match processor.process(&raw) {
                Outcome::RetrySignaled { payload, .. } => raw = payload,
                outcome => return (outcome, attempts),
            }
        }
    }

    #[test]
    fn succeeds_on_third_attempt_after_two_failures() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let mailer = ScriptedMailSender::script([Ok(false), Err("smtp timeout")]);
        let processor = processor(mailer.clone(), broker.clone(), 3);

        let ((outcome, attempts), logs) =
            capture_logs(|| run_to_completion(&processor, payload(&WorkItem::new(order_id(42)))));

        assert_eq!(
            outcome,
            Outcome::Succeeded {
                order_id: order_id(42),
                retry_count: 2
            }
        );
        assert_eq!(attempts, 3);
        assert_eq!(mailer.calls(), 3);
        assert!(broker.published(DEAD_LETTER_TOPIC).is_empty());
        assert_eq!(logs.count(Level::WARN), 2);
        assert!(!logs.contains(Level::ERROR, "max retries exceeded"));

        let failed: Vec<_> = logs
            .matching("order email attempt failed")
            .iter()
            .map(|e| e.field("attempt").map(str::to_string))
            .collect();
        assert_eq!(failed, [Some("1".to_string()), Some("2".to_string())]);

        let retried: Vec<_> = logs
            .matching("retrying order email")
            .iter()
            .map(|e| {
                (
                    e.field("retry_count").map(str::to_string),
                    e.field("backoff_seconds").map(str::to_string),
                )
            })
            .collect();
        assert_eq!(
            retried,
            [
                (Some("1".to_string()), Some("2".to_string())),
                (Some("2".to_string()), Some("4".to_string())),
            ]
        );

        let sent = logs.matching("order email sent");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].level, Level::INFO);
        assert_eq!(sent[0].field("retry_count"), Some("2"));
        assert_eq!(sent[0].field("increment_id"), Some("000000042"));
    }

    #[test]
    fn null_retry_count_is_a_first_attempt() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let mailer = ScriptedMailSender::always(true);
        let processor = processor(mailer.clone(), broker, 3);

        let raw = br#"{"order_id":42,"increment_id":"000000042","retry_count":null}"#;
        assert_eq!(
            processor.process(raw),
            Outcome::Succeeded {
                order_id: order_id(42),
                retry_count: 0
            }
        );
        assert_eq!(mailer.calls(), 1);
    }

    #[test]
    fn retry_signal_carries_incremented_count_and_backoff() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let processor = processor(ScriptedMailSender::always(false), broker, 3);

        let item = WorkItem::new(order_id(42)).with_increment_id("000000042");
        let outcome = processor.process(&payload(&item));

        let Outcome::RetrySignaled {
            item: retried,
            decision,
            payload: raw,
        } = outcome.clone()
        else {
            panic!("expected a retry signal, got {outcome:?}");
        };
        assert_eq!(retried.retry_count, 1);
        assert_eq!(decision.backoff_seconds, 2);
        assert_eq!(decode(&raw).unwrap(), retried);

        assert_eq!(
            outcome.disposition(),
            Disposition::Requeue {
                payload: raw,
                backoff: Duration::from_secs(2)
            }
        );
    }

    #[test]
    fn exhausted_item_goes_to_dead_letter_queue_with_final_count() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let mailer = ScriptedMailSender::always(false);
        let processor = processor(mailer.clone(), broker.clone(), 3);

        let (outcome, attempts) = run_to_completion(&processor, payload(&WorkItem::new(order_id(42))));

        assert_eq!(attempts, 3);
        assert_eq!(mailer.calls(), 3);
        assert_eq!(outcome.state(), ProcessingState::DeadLettered);
        assert!(matches!(outcome, Outcome::DeadLettered { published: true, .. }));

        let dead = broker.published(DEAD_LETTER_TOPIC);
        assert_eq!(dead.len(), 1);
        assert_eq!(decode(&dead[0]).unwrap().retry_count, 3);
        assert_eq!(broker.depth(DEAD_LETTER_QUEUE), 1);
        assert_eq!(outcome.disposition(), Disposition::Ack);
    }

    #[test]
    fn dead_letter_publish_failure_is_swallowed() {
        // No bindings: every publish is unroutable.
        let broker = Arc::new(InMemoryBroker::new());
        let processor = processor(ScriptedMailSender::always(false), broker, 1);

        let (outcome, logs) =
            capture_logs(|| processor.process(&payload(&WorkItem::new(order_id(42)))));

        assert!(matches!(outcome, Outcome::DeadLettered { published: false, .. }));
        assert_eq!(outcome.disposition(), Disposition::Ack);
        assert!(logs.contains(Level::ERROR, "failed to publish to dead letter queue"));
    }

    #[test]
    fn malformed_payloads_are_rejected_without_retry_or_dlq() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let mailer = ScriptedMailSender::always(true);
        let processor = processor(mailer.clone(), broker.clone(), 3);

        for raw in [&b"not json"[..], b"[1,2]", br#"{"order_id":"42"}"#, b""] {
            let (outcome, logs) = capture_logs(|| processor.process(raw));
            assert_eq!(
                outcome,
                Outcome::Rejected {
                    reason: RejectReason::Malformed
                }
            );
            assert!(logs.contains(Level::ERROR, "failed to decode"));
        }

        assert_eq!(mailer.calls(), 0);
        assert!(broker.published(DEAD_LETTER_TOPIC).is_empty());
    }

    #[test]
    fn missing_order_id_is_rejected() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let mailer = ScriptedMailSender::always(true);
        let processor = processor(mailer.clone(), broker.clone(), 3);

        for raw in [&br#"{"retry_count":1}"#[..], br#"{"order_id":0}"#, br#"{"order_id":null}"#] {
            let outcome = processor.process(raw);
            assert_eq!(
                outcome,
                Outcome::Rejected {
                    reason: RejectReason::MissingOrderId
                }
            );
            assert_eq!(outcome.disposition(), Disposition::Ack);
        }

        assert_eq!(mailer.calls(), 0);
        assert!(broker.published(DEAD_LETTER_TOPIC).is_empty());
    }

    #[test]
    fn unknown_order_is_rejected() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let processor = processor(ScriptedMailSender::always(true), broker.clone(), 3);

        let outcome = processor.process(&payload(&WorkItem::new(order_id(7))));
        assert_eq!(
            outcome,
            Outcome::Rejected {
                reason: RejectReason::OrderNotFound(order_id(7))
            }
        );
        assert!(broker.published(DEAD_LETTER_TOPIC).is_empty());
    }

    #[test]
    fn store_outage_is_retried() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let processor = EmailProcessor::new(
            DeliveryExecutor::new(FailingOrderStore, ScriptedMailSender::always(true)),
            RetryPolicy::new(3),
            broker,
        );

        let outcome = processor.process(&payload(&WorkItem::new(order_id(42))));
        assert_eq!(outcome.state(), ProcessingState::RetrySignaled);
    }

    #[test]
    fn unknown_fields_survive_retry_and_dead_lettering() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let processor = processor(ScriptedMailSender::always(false), broker.clone(), 2);

        let raw = br#"{"order_id":42,"retry_count":0,"store_id":3}"#.to_vec();
        let (outcome, _) = run_to_completion(&processor, raw);
        assert_eq!(outcome.state(), ProcessingState::DeadLettered);

        let dead = decode(&broker.published(DEAD_LETTER_TOPIC)[0]).unwrap();
        assert_eq!(dead.extra.get("store_id"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn from_config_uses_configured_budget() {
        let broker = Arc::new(InMemoryBroker::with_default_topology());
        let config = QueueConfig::default().with_max_retry_attempts(5);
        let processor =
            EmailProcessor::from_config(orders(), ScriptedMailSender::always(true), broker, &config);
        assert_eq!(processor.policy().max_retries(), 5);
    }

    #[test]
    fn state_names_and_terminality() {
        assert!(!ProcessingState::Attempting.is_terminal());
        assert!(ProcessingState::RetrySignaled.is_terminal());
        assert_eq!(ProcessingState::DeadLettered.to_string(), "dead_lettered");
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            ..ProptestConfig::default()
        })]

        /// Property: an always-failing item is attempted exactly N times and the
        /// DLQ copy carries retry_count = N.
        #[test]
        fn always_failing_item_is_attempted_exactly_n_times(n in 1u32..=10) {
            let broker = Arc::new(InMemoryBroker::with_default_topology());
            let mailer = ScriptedMailSender::always(false);
            let processor = processor(mailer.clone(), broker.clone(), n);

            let (outcome, attempts) =
                run_to_completion(&processor, payload(&WorkItem::new(order_id(42))));

            prop_assert_eq!(outcome.state(), ProcessingState::DeadLettered);
            prop_assert_eq!(attempts, n as usize);
            prop_assert_eq!(mailer.calls(), n as usize);

            let dead = broker.published(DEAD_LETTER_TOPIC);
            prop_assert_eq!(dead.len(), 1);
            prop_assert_eq!(decode(&dead[0]).unwrap().retry_count, n);
        }

        /// Property: text that cannot contain a JSON object is always rejected.
        #[test]
        fn payloads_without_an_object_are_rejected(raw in "[^{]*") {
            let broker = Arc::new(InMemoryBroker::with_default_topology());
            let processor = processor(ScriptedMailSender::always(true), broker.clone(), 3);

            let outcome = processor.process(raw.as_bytes());
            prop_assert_eq!(outcome.state(), ProcessingState::Rejected);
            prop_assert!(broker.published(DEAD_LETTER_TOPIC).is_empty());
        }
    }
}
