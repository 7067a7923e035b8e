//! Order as seen by the email pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::OrderId;

/// Read-only view of an order, as resolved from the order store.
///
/// `entity_id` is `None` for orders that were never persisted; those cannot be
/// queued for email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub entity_id: Option<OrderId>,
    pub increment_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_firstname: Option<String>,
    pub customer_lastname: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn new(entity_id: OrderId, increment_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id),
            increment_id: Some(increment_id.into()),
            customer_email: None,
            customer_firstname: None,
            customer_lastname: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_customer(
        mut self,
        email: impl Into<String>,
        firstname: impl Into<String>,
        lastname: impl Into<String>,
    ) -> Self {
        self.customer_email = Some(email.into());
        self.customer_firstname = Some(firstname.into());
        self.customer_lastname = Some(lastname.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// "First Last" from the trimmed parts, skipping missing or blank ones.
    /// `None` when neither part has text.
    pub fn customer_name(&self) -> Option<String> {
        let parts: Vec<&str> = [&self.customer_firstname, &self.customer_lastname]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}
