//! Broker adapter: pulls messages from a queue and settles them.
//!
//! Handlers never touch the broker. They return a [`Disposition`] and the
//! consumer performs the matching `ack`/`requeue` call, only after the handler
//! is done with the message.

use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info};

use ordermail_events::{Delivery, MessageSource};

use crate::config::ConsumerOptions;

/// How the broker should settle a handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Processing reached a terminal state; forget the message.
    Ack,
    /// Redeliver `payload` (the updated envelope) after roughly `backoff`.
    Requeue { payload: Vec<u8>, backoff: Duration },
}

/// Per-message processing logic driven by a [`QueueConsumer`].
pub trait MessageHandler: Send + Sync {
    fn handle(&self, payload: &[u8]) -> Disposition;
}

impl<H> MessageHandler for Arc<H>
where
    H: MessageHandler + ?Sized,
{
    fn handle(&self, payload: &[u8]) -> Disposition {
        (**self).handle(payload)
    }
}

/// Counters for one `drain` call or one background consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    pub received: u64,
    pub acknowledged: u64,
    pub requeued: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: &Disposition) {
        self.received += 1;
        match disposition {
            Disposition::Ack => self.acknowledged += 1,
            Disposition::Requeue { .. } => self.requeued += 1,
        }
    }

    fn merge(&mut self, other: ConsumerStats) {
        self.received += other.received;
        self.acknowledged += other.acknowledged;
        self.requeued += other.requeued;
    }
}

/// Handle to control and join a background consumer.
#[derive(Debug)]
pub struct ConsumerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ConsumerStats>>,
}

impl ConsumerHandle {
    /// Request graceful shutdown and wait for the consumer to stop.
    ///
    /// A message that is being handled is settled before the thread exits.
    pub fn shutdown(mut self) -> ConsumerStats {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
        self.stats()
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }
}

/// Consumer bound to a single queue.
#[derive(Debug, Clone)]
pub struct QueueConsumer<B> {
    name: String,
    broker: B,
    queue: String,
}

impl<B> QueueConsumer<B>
where
    B: MessageSource,
{
    pub fn new(name: impl Into<String>, broker: B, queue: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            broker,
            queue: queue.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Handle at most `max_messages` messages, stopping early when the queue is empty.
    ///
    /// Requeued messages go to the back of the queue and count towards the limit
    /// when they come around again within the same call.
    pub fn drain<H>(&self, handler: &H, max_messages: usize) -> Result<ConsumerStats, B::Error>
    where
        H: MessageHandler + ?Sized,
    {
        let mut stats = ConsumerStats::default();

        while (stats.received as usize) < max_messages {
            let Some(delivery) = self.broker.receive(&self.queue)? else {
                break;
            };

            let disposition = handler.handle(&delivery.payload);
            self.settle(&delivery, &disposition)?;
            stats.record(&disposition);
        }

        debug!(
            consumer = %self.name,
            queue = %self.queue,
            received = stats.received,
            requeued = stats.requeued,
            "drain finished"
        );

        Ok(stats)
    }

    /// Spawn a background thread that keeps draining the queue until shutdown.
    ///
    /// The thread sleeps for `poll_interval` only while the queue is empty.
    pub fn spawn<H>(self, handler: H, options: ConsumerOptions) -> std::io::Result<ConsumerHandle>
    where
        B: Send + 'static,
        H: MessageHandler + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let stats = Arc::new(Mutex::new(ConsumerStats::default()));
        let loop_stats = stats.clone();

        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || consumer_loop(self, handler, options, shutdown_rx, loop_stats))?;

        Ok(ConsumerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
            stats,
        })
    }

    fn settle(&self, delivery: &Delivery, disposition: &Disposition) -> Result<(), B::Error> {
        match disposition {
            Disposition::Ack => self.broker.ack(delivery),
            Disposition::Requeue { payload, backoff } => {
                self.broker.requeue(delivery, payload.clone(), *backoff)
            }
        }
    }
}

fn consumer_loop<B, H>(
    consumer: QueueConsumer<B>,
    handler: H,
    options: ConsumerOptions,
    shutdown_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<ConsumerStats>>,
) where
    B: MessageSource,
    H: MessageHandler,
{
    info!(consumer = %consumer.name, queue = %consumer.queue, "queue consumer started");
    let started = Instant::now();
    let batch = options.max_messages.max(1);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match consumer.drain(&handler, batch) {
            Ok(batch_stats) => {
                if let Ok(mut s) = stats.lock() {
                    s.merge(batch_stats);
                }
                if batch_stats.received == 0 {
                    thread::sleep(options.poll_interval);
                }
            }
            Err(e) => {
                error!(consumer = %consumer.name, error = %e, "failed to consume from queue");
                thread::sleep(options.poll_interval);
            }
        }
    }

    info!(
        consumer = %consumer.name,
        uptime_secs = started.elapsed().as_secs(),
        "queue consumer stopped"
    );
}
