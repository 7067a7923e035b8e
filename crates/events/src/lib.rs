//! `ordermail-events`: wire format and broker seams for the order email queue.
//!
//! The broker itself is an external collaborator. This crate only defines the
//! contract the pipeline needs from it (publish, receive, ack, requeue) plus an
//! in-memory implementation for tests and offline tooling.

pub mod broker;
pub mod codec;
pub mod in_memory_broker;
pub mod topology;

pub use broker::{Delivery, DeliveryTag, MessageSource, Publisher};
pub use codec::{DecodeError, EncodeError, decode, encode};
pub use in_memory_broker::{InMemoryBroker, InMemoryBrokerError};
pub use topology::{
    DEAD_LETTER_CONSUMER, DEAD_LETTER_QUEUE, DEAD_LETTER_TOPIC, MAIN_CONSUMER, MAIN_QUEUE,
    MAIN_TOPIC,
};
