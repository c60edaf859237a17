use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use kore_core::{Aggregate, Entity, Mutable, ProductId, Quantity, WarehouseId};

use crate::movement::StockMovement;

/// Identity of a stock level row: one per (product, warehouse) pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product: ProductId,
    pub warehouse: WarehouseId,
}

impl StockKey {
    pub fn new(product: ProductId, warehouse: WarehouseId) -> Self {
        Self { product, warehouse }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product, self.warehouse)
    }
}

/// Aggregate: on-hand quantity for one (product, warehouse) pair.
///
/// A cache over the movement log; only the movement engine moves it, through
/// [`Aggregate::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    key: StockKey,
    quantity: Quantity,
    updated_at: DateTime<Utc>,
}

impl StockLevel {
    /// Zero level, created lazily on the first movement for a pair.
    pub fn empty(key: StockKey, at: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity: Quantity::ZERO,
            updated_at: at,
        }
    }

    pub fn restore(key: StockKey, quantity: Quantity, updated_at: DateTime<Utc>) -> Self {
        Self {
            key,
            quantity,
            updated_at,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn product(&self) -> ProductId {
        self.key.product
    }

    pub fn warehouse(&self) -> WarehouseId {
        self.key.warehouse
    }

    pub fn quantity(&self) -> Quantity {
        self.quantity
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

impl Entity for StockLevel {
    type Id = StockKey;
    const RECORD: &'static str = "stock_level";

    fn id(&self) -> Self::Id {
        self.key
    }
}

impl Mutable for StockLevel {}

impl Aggregate for StockLevel {
    type Event = StockMovement;

    fn apply(&mut self, event: &Self::Event) {
        if event.key() != self.key {
            return;
        }
        self.quantity += event.delta;
        self.updated_at = event.timestamp;
    }
}
