//! Topic, queue and consumer names.
//!
//! ```text
//! order.email.send       ──► order.email.queue       (orderEmailConsumer)
//! order.email.send.dead  ──► order.email.queue.dead  (orderEmailDeadLetterConsumer)
//! ```

/// Topic the originator publishes new work items to.
pub const MAIN_TOPIC: &str = "order.email.send";

/// Topic exhausted work items are published to.
pub const DEAD_LETTER_TOPIC: &str = "order.email.send.dead";

pub const MAIN_QUEUE: &str = "order.email.queue";

pub const DEAD_LETTER_QUEUE: &str = "order.email.queue.dead";

pub const MAIN_CONSUMER: &str = "orderEmailConsumer";

pub const DEAD_LETTER_CONSUMER: &str = "orderEmailDeadLetterConsumer";
