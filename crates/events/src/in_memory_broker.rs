//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use crate::broker::{Delivery, DeliveryTag, MessageSource, Publisher};
use crate::topology::{DEAD_LETTER_QUEUE, DEAD_LETTER_TOPIC, MAIN_QUEUE, MAIN_TOPIC};

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBrokerError {
    /// Internal lock poisoning.
    #[error("broker state poisoned")]
    Poisoned,

    /// No queue is bound to the topic.
    #[error("no queue bound to topic {0}")]
    Unroutable(String),

    /// The delivery was already settled (or never handed out).
    #[error("unknown delivery {0}")]
    UnknownDelivery(DeliveryTag),
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    payload: Vec<u8>,
    redelivered: bool,
    backoff_hint: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    bindings: HashMap<String, Vec<String>>,
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    in_flight: HashMap<DeliveryTag, String>,
    published: Vec<(String, Vec<u8>)>,
}

/// In-memory topic/queue broker.
///
/// - No IO / no async
/// - Topics fan out to every bound queue; publishing to an unbound topic fails
/// - FIFO queues; `requeue` appends to the back of the queue
/// - Delays requested on `requeue` are recorded, never waited for
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broker with the main and dead-letter topics bound to their queues.
    pub fn with_default_topology() -> Self {
        let broker = Self::new();
        broker.bind(MAIN_TOPIC, MAIN_QUEUE);
        broker.bind(DEAD_LETTER_TOPIC, DEAD_LETTER_QUEUE);
        broker
    }

    /// Route messages published to `topic` into `queue`.
    pub fn bind(&self, topic: &str, queue: &str) {
        if let Ok(mut state) = self.state.lock() {
            let queues = state.bindings.entry(topic.to_string()).or_default();
            if !queues.iter().any(|q| q == queue) {
                queues.push(queue.to_string());
            }
            state.queues.entry(queue.to_string()).or_default();
        }
    }

    /// Messages waiting in `queue` (not counting in-flight ones).
    pub fn depth(&self, queue: &str) -> usize {
        self.lock()
            .map(|state| state.queues.get(queue).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Deliveries handed out from `queue` and not yet settled.
    pub fn in_flight(&self, queue: &str) -> usize {
        self.lock()
            .map(|state| state.in_flight.values().filter(|q| *q == queue).count())
            .unwrap_or(0)
    }

    /// Every payload successfully published to `topic`, oldest first.
    pub fn published(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .map(|state| {
                state
                    .published
                    .iter()
                    .filter(|(t, _)| t == topic)
                    .map(|(_, payload)| payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, InMemoryBrokerError> {
        self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)
    }
}

impl Publisher for InMemoryBroker {
    type Error = InMemoryBrokerError;

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let mut state = self.lock()?;

        let targets = match state.bindings.get(topic) {
            Some(queues) if !queues.is_empty() => queues.clone(),
            _ => return Err(InMemoryBrokerError::Unroutable(topic.to_string())),
        };

        for queue in targets {
            state.queues.entry(queue).or_default().push_back(QueuedMessage {
                payload: payload.clone(),
                redelivered: false,
                backoff_hint: None,
            });
        }
        state.published.push((topic.to_string(), payload));

        Ok(())
    }
}

impl MessageSource for InMemoryBroker {
    type Error = InMemoryBrokerError;

    fn receive(&self, queue: &str) -> Result<Option<Delivery>, Self::Error> {
        let mut state = self.lock()?;

        let Some(message) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        let tag = DeliveryTag::new();
        state.in_flight.insert(tag, queue.to_string());

        Ok(Some(Delivery {
            tag,
            queue: queue.to_string(),
            payload: message.payload,
            redelivered: message.redelivered,
            backoff_hint: message.backoff_hint,
        }))
    }

    fn ack(&self, delivery: &Delivery) -> Result<(), Self::Error> {
        let mut state = self.lock()?;
        state
            .in_flight
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(InMemoryBrokerError::UnknownDelivery(delivery.tag))
    }

    fn requeue(
        &self,
        delivery: &Delivery,
        payload: Vec<u8>,
        delay: Duration,
    ) -> Result<(), Self::Error> {
        let mut state = self.lock()?;
        let queue = state
            .in_flight
            .remove(&delivery.tag)
            .ok_or(InMemoryBrokerError::UnknownDelivery(delivery.tag))?;

        debug!(queue = %queue, delay_secs = delay.as_secs(), "requeued delivery");

        state.queues.entry(queue).or_default().push_back(QueuedMessage {
            payload,
            redelivered: true,
            backoff_hint: Some(delay),
        });

        Ok(())
    }
}
