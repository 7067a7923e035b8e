//! The order email work item (queue message envelope).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{DomainError, DomainResult};
use crate::id::OrderId;
use crate::order::Order;

/// Timestamp layout used for `created_at` on the wire.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Envelope for one "send the order confirmation email" request.
///
/// Notes:
/// - `order_id` is required for processing, but an envelope without one still
///   decodes so that it can be rejected (and logged) as an invalid message.
///   `0` and `null` are read as "missing".
/// - `retry_count` never decreases while the item cycles through retries. It is
///   reset to `0` only when an operator requeues the item from the DLQ.
/// - Fields this version does not know about are kept in `extra` and written
///   back out unchanged, so retries and dead-lettering never lose data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default, deserialize_with = "deserialize_order_id")]
    pub order_id: Option<OrderId>,

    #[serde(default)]
    pub increment_id: Option<String>,

    #[serde(default)]
    pub customer_email: Option<String>,

    #[serde(default)]
    pub customer_name: Option<String>,

    #[serde(default)]
    pub created_at: Option<String>,

    #[serde(default, deserialize_with = "deserialize_retry_count")]
    pub retry_count: u32,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn deserialize_order_id<'de, D>(deserializer: D) -> Result<Option<OrderId>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<u64>::deserialize(deserializer)?;
    Ok(raw.and_then(OrderId::new))
}

// `null` counts as "no retries yet", like an absent field.
fn deserialize_retry_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl WorkItem {
    /// A fresh work item (`retry_count = 0`) for the given order.
    pub fn new(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            increment_id: None,
            customer_email: None,
            customer_name: None,
            created_at: None,
            retry_count: 0,
            extra: Map::new(),
        }
    }

    /// Build the envelope published when an order is placed.
    pub fn from_order(order: &Order) -> DomainResult<Self> {
        let order_id = order.entity_id.ok_or(DomainError::MissingOrderId)?;

        Ok(Self {
            order_id: Some(order_id),
            increment_id: order.increment_id.clone(),
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name(),
            created_at: Some(order.created_at.format(CREATED_AT_FORMAT).to_string()),
            retry_count: 0,
            extra: Map::new(),
        })
    }

    pub fn with_increment_id(mut self, increment_id: impl Into<String>) -> Self {
        self.increment_id = Some(increment_id.into());
        self
    }

    pub fn with_customer(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
        self.customer_email = Some(email.into());
        self.customer_name = Some(name.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// The order this item refers to, or `MissingOrderId`.
    pub fn validate(&self) -> DomainResult<OrderId> {
        self.order_id.ok_or(DomainError::MissingOrderId)
    }

    pub fn increment_id_or_unknown(&self) -> &str {
        self.increment_id.as_deref().unwrap_or("unknown")
    }

    pub fn customer_email_or_unknown(&self) -> &str {
        self.customer_email.as_deref().unwrap_or("unknown")
    }

    /// `order_id` rendered for logs (`unknown` when missing).
    pub fn order_id_display(&self) -> String {
        self.order_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}
