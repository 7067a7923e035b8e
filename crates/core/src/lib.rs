//! `ordermail-core`: the order email work item and its identifiers.
//!
//! This crate contains **pure data** (no broker, store or mail concerns).

pub mod error;
pub mod id;
pub mod order;
pub mod work_item;

pub use error::{DomainError, DomainResult};
pub use id::OrderId;
pub use order::Order;
pub use work_item::WorkItem;
