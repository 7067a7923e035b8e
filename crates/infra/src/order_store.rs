//! Order store implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use ordermail_core::{Order, OrderId};

use crate::delivery::OrderStore;

/// In-memory order store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<OrderId, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Store an order under its entity id. Orders without one are ignored.
    pub fn insert(&self, order: Order) -> bool {
        let Some(id) = order.entity_id else {
            return false;
        };

        match self.orders.write() {
            Ok(mut orders) => {
                orders.insert(id, order);
                true
            }
            Err(_) => false,
        }
    }

    pub fn remove(&self, order_id: OrderId) -> Option<Order> {
        self.orders.write().ok()?.remove(&order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.read().map(|orders| orders.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderStore for InMemoryOrderStore {
    fn get(&self, order_id: OrderId) -> anyhow::Result<Option<Order>> {
        let orders = self
            .orders
            .read()
            .map_err(|_| anyhow::anyhow!("order store lock poisoned"))?;
        Ok(orders.get(&order_id).cloned())
    }
}
