//! Inventory Movement Engine and Stock Aggregator boundary.
//!
//! A movement validates through `kore-inventory` against the locked
//! `StockLevel` row, then logs the movement and updates the level as one
//! unit. Reads of the movement log never touch the cached level.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kore_core::{ProductId, Quantity, WarehouseId};
use kore_inventory::{
    ApplyMovement, LevelDrift, NewProduct, NewWarehouse, Product, StockLevel, StockMovement, Transfer,
    Warehouse,
};

use crate::error::StoreResult;

pub use in_memory::InMemoryStock;
pub use postgres::PostgresStock;

/// One page request over a product's movement log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub product: ProductId,
    /// Restrict to one warehouse.
    pub warehouse: Option<WarehouseId>,
    /// Only movements logged before this cursor; `None` starts at the newest.
    pub before: Option<u64>,
    pub limit: usize,
}

impl HistoryQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 1000;

    pub fn for_product(product: ProductId) -> Self {
        Self {
            product,
            warehouse: None,
            before: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn at_warehouse(mut self, warehouse: WarehouseId) -> Self {
        self.warehouse = Some(warehouse);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Limit clamped to `1..=MAX_LIMIT`.
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Newest first.
    pub movements: Vec<StockMovement>,
    /// Cursor for the following (older) page, if there is one.
    pub next: Option<u64>,
}

/// Inventory storage.
///
/// Implementations must:
/// - hold an exclusive lock on the `(product, warehouse)` level row from the
///   read of the current quantity until the movement is committed
/// - create missing level rows at zero inside that same locked unit
/// - never update or delete a logged movement
#[async_trait]
pub trait StockStore: Send + Sync {
    async fn create_product(&self, cmd: NewProduct) -> StoreResult<Product>;

    async fn create_warehouse(&self, cmd: NewWarehouse) -> StoreResult<Warehouse>;

    async fn get_product(&self, id: ProductId) -> StoreResult<Product>;

    async fn get_warehouse(&self, id: WarehouseId) -> StoreResult<Warehouse>;

    async fn set_product_active(&self, id: ProductId, active: bool) -> StoreResult<Product>;

    async fn set_warehouse_active(&self, id: WarehouseId, active: bool) -> StoreResult<Warehouse>;

    /// Refused with `StillReferenced` once any level or movement exists for it.
    async fn delete_product(&self, id: ProductId) -> StoreResult<()>;

    /// Refused with `StillReferenced` once any level or movement exists for it.
    async fn delete_warehouse(&self, id: WarehouseId) -> StoreResult<()>;

    async fn apply_movement(&self, cmd: ApplyMovement) -> StoreResult<StockMovement>;

    /// Returns the `(source, destination)` legs.
    async fn transfer(&self, cmd: Transfer) -> StoreResult<(StockMovement, StockMovement)>;

    /// Cached on-hand quantity; zero for a pair that never moved.
    async fn get_quantity(&self, product: ProductId, warehouse: WarehouseId) -> StoreResult<Quantity>;

    /// Every level row for `product`, ordered by warehouse id.
    async fn list_stock_levels(&self, product: ProductId) -> StoreResult<Vec<StockLevel>>;

    async fn history_page(&self, query: &HistoryQuery) -> StoreResult<HistoryPage>;

    /// Always fails with `ImmutabilityViolation`.
    async fn update_movement(&self, movement: StockMovement) -> StoreResult<()>;

    /// Always fails with `ImmutabilityViolation`.
    async fn delete_movement(&self, movement: StockMovement) -> StoreResult<()>;

    /// Replay the movement log and report pairs whose cached level drifted.
    async fn reconcile_levels(&self) -> StoreResult<Vec<LevelDrift>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Start,
    Before(u64),
    Exhausted,
}

/// Lazy, restartable walk over a product's movement log, newest first.
///
/// Nothing is read until [`MovementHistory::next_page`] is called.
pub struct MovementHistory {
    store: Arc<dyn StockStore>,
    query: HistoryQuery,
    cursor: Cursor,
}

impl MovementHistory {
    pub fn new(store: Arc<dyn StockStore>, query: HistoryQuery) -> Self {
        Self {
            store,
            query,
            cursor: Cursor::Start,
        }
    }

    /// The next (older) page, or `None` once the log is exhausted.
    pub async fn next_page(&mut self) -> StoreResult<Option<Vec<StockMovement>>> {
        let before = match self.cursor {
            Cursor::Start => None,
            Cursor::Before(seq) => Some(seq),
            Cursor::Exhausted => return Ok(None),
        };
        let page = self.store.history_page(&HistoryQuery { before, ..self.query }).await?;
        self.cursor = match page.next {
            Some(seq) => Cursor::Before(seq),
            None => Cursor::Exhausted,
        };
        if page.movements.is_empty() {
            return Ok(None);
        }
        Ok(Some(page.movements))
    }

    /// Drain the remaining pages into one vector.
    pub async fn collect_remaining(&mut self) -> StoreResult<Vec<StockMovement>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    /// Start again from the newest movement.
    pub fn restart(&mut self) {
        self.cursor = Cursor::Start;
    }
}

impl std::fmt::Debug for MovementHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovementHistory")
            .field("query", &self.query)
            .field("cursor", &self.cursor)
            .finish()
    }
}
