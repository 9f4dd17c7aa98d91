//! Domain events
//!
//! State transitions are announced through an [`EventSink`] so collaborators
//! (projections, mailers, analytics) can react without re-querying the
//! aggregate. Delivery is synchronous and in-process; wiring a message bus
//! is the consuming service's concern.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::aggregates::item::CartItem;
use crate::pricing::Totals;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CartEvent {
    Created {
        identifier: String,
        instance: String,
    },
    Updated {
        identifier: String,
        instance: String,
        version: u64,
        /// Present when projection sync is inline, so listeners need not
        /// re-price the cart.
        #[serde(skip_serializing_if = "Option::is_none")]
        totals: Option<TotalsSnapshot>,
    },
    ItemAdded {
        identifier: String,
        instance: String,
        item: CartItem,
    },
    ItemUpdated {
        identifier: String,
        instance: String,
        item: CartItem,
    },
    ItemRemoved {
        identifier: String,
        instance: String,
        item_id: String,
    },
    ConditionAdded {
        identifier: String,
        instance: String,
        name: String,
    },
    ConditionRemoved {
        identifier: String,
        instance: String,
        name: String,
    },
    Cleared {
        identifier: String,
        instance: String,
    },
    Merged {
        source: String,
        target: String,
        instance: String,
        items_merged: usize,
        conditions_merged: usize,
    },
    Migrated {
        source: String,
        target: String,
        instance: String,
    },
}

/// Serializable copy of [`Totals`] carried on update events.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TotalsSnapshot {
    pub subtotal_without_conditions: i64,
    pub subtotal: i64,
    pub total: i64,
    pub savings: i64,
    pub quantity: u64,
    pub count: usize,
}

impl From<Totals> for TotalsSnapshot {
    fn from(t: Totals) -> Self {
        Self {
            subtotal_without_conditions: t.subtotal_without_conditions,
            subtotal: t.subtotal,
            total: t.total,
            savings: t.savings,
            quantity: t.quantity,
            count: t.count,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: CartEvent);
}

/// Discards every event. The default sink.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: CartEvent) {}
}

/// Fans events out over a tokio broadcast channel. Slow subscribers may
/// lag and miss events, per broadcast semantics.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    sender: broadcast::Sender<CartEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CartEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: CartEvent) {
        // no receivers is fine; events are fire-and-forget
        let _ = self.sender.send(event);
    }
}
