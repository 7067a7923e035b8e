//! `ordermail-infra`: the order email pipeline.
//!
//! Consumer side: [`EmailProcessor`] (retry/dead-letter state machine) and
//! [`DeadLetterHandler`], both driven by a [`QueueConsumer`].
//! Originator side: [`OrderPlacedDispatcher`].

pub mod config;
pub mod consumer;
pub mod dead_letter;
pub mod delivery;
pub mod order_store;
pub mod processor;
pub mod publisher;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;


pub use config::{ConfigError, ConsumerOptions, QueueConfig};
pub use consumer::{ConsumerHandle, ConsumerStats, Disposition, MessageHandler, QueueConsumer};
pub use dead_letter::DeadLetterHandler;
pub use delivery::{AttemptFailure, DeliveryExecutor, FailureInjection, MailSender, OrderStore};
pub use order_store::InMemoryOrderStore;
pub use processor::{EmailProcessor, Outcome, ProcessingState, RejectReason};
pub use publisher::{Dispatch, OrderEmailPublisher, OrderPlacedDispatcher, PublishError};
pub use retry::{RetryDecision, RetryPolicy, backoff_seconds};
