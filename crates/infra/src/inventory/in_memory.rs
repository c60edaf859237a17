use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument};

use kore_core::{Aggregate, DomainError, Entity, MovementId, ProductId, Quantity, WarehouseId};
use kore_inventory::{
    reconcile_levels, ApplyMovement, LevelDrift, NewProduct, NewWarehouse, Product, StockKey,
    StockLevel, StockMovement, Transfer, Warehouse,
};

use super::{HistoryPage, HistoryQuery, StockStore};
use crate::error::{StoreError, StoreResult};
use crate::record_store::{lock, lock_all, AppendOnlyLog, RecordStore, Table};

/// In-memory inventory.
///
/// Intended for tests/dev. Each `(product, warehouse)` level is its own row
/// lock, held across plan, append and apply. Catalog deletes and
/// reconciliation take the `catalog` lock exclusively; movements hold it
/// shared.
#[derive(Debug, Default)]
pub struct InMemoryStock {
    products: Table<Product>,
    warehouses: Table<Warehouse>,
    levels: Table<StockLevel>,
    movements: AppendOnlyLog<StockMovement>,
    catalog: RwLock<()>,
}

impl InMemoryStock {
    pub fn new() -> Self {
        Self::default()
    }

    fn shared(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.catalog.read().map_err(|_| StoreError::LockPoisoned("inventory"))
    }

    fn exclusive(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.catalog.write().map_err(|_| StoreError::LockPoisoned("inventory"))
    }

    fn product(&self, id: ProductId) -> StoreResult<Product> {
        self.products
            .get(id)?
            .ok_or_else(|| DomainError::UnknownProduct(id).into())
    }

    fn warehouse(&self, id: WarehouseId) -> StoreResult<Warehouse> {
        self.warehouses
            .get(id)?
            .ok_or_else(|| DomainError::UnknownWarehouse(id).into())
    }

    fn commit_movement(&self, cmd: &ApplyMovement) -> StoreResult<StockMovement> {
        let _catalog = self.shared()?;
        self.product(cmd.product)?;
        self.warehouse(cmd.warehouse)?;

        let key = cmd.key();
        let row = match self.levels.row(key)? {
            Some(row) => row,
            None => {
                // A movement that fails against zero stock never creates the row.
                cmd.plan(&StockLevel::empty(key, Utc::now()))?;
                self.levels.row_or_insert_with(key, || StockLevel::empty(key, Utc::now()))?
            }
        };

        let mut level = lock(&row)?;
        let plan = cmd.plan(&level)?;
        let movement = cmd.record(MovementId::new(), &plan, Utc::now());
        self.movements.append(movement.clone())?;
        level.apply(&movement);

        info!(
            movement_id = %movement.id,
            delta = %movement.delta,
            level = %level.quantity(),
            "stock movement committed"
        );
        Ok(movement)
    }

    fn commit_transfer(&self, cmd: &Transfer) -> StoreResult<(StockMovement, StockMovement)> {
        cmd.validate()?;
        let _catalog = self.shared()?;
        self.product(cmd.product)?;
        self.warehouse(cmd.from)?;
        self.warehouse(cmd.to)?;

        let (source, destination) = (cmd.source(), cmd.destination());
        if !self.levels.contains(source)? {
            let now = Utc::now();
            cmd.plan(&StockLevel::empty(source, now), &StockLevel::empty(destination, now))?;
        }

        let mut keys = [source, destination];
        keys.sort();
        let rows = keys
            .iter()
            .map(|&key| self.levels.row_or_insert_with(key, || StockLevel::empty(key, Utc::now())))
            .collect::<StoreResult<Vec<_>>>()?;
        let mut guards = lock_all(&rows)?;
        let (src, dst) = if keys[0] == source { (0, 1) } else { (1, 0) };

        let plan = cmd.plan(&guards[src], &guards[dst])?;
        let (out, into) = cmd.record((MovementId::new(), MovementId::new()), &plan, Utc::now());
        self.movements.append_all_if(vec![out.clone(), into.clone()], |_| Ok(()))?;
        guards[src].apply(&out);
        guards[dst].apply(&into);

        info!(
            quantity = %into.delta,
            source_level = %guards[src].quantity(),
            destination_level = %guards[dst].quantity(),
            "stock transfer committed"
        );
        Ok((out, into))
    }

    fn ensure_unreferenced<F>(&self, record: &'static str, id: impl ToString, references: F) -> StoreResult<()>
    where
        F: Fn(StockKey) -> bool,
    {
        let id = id.to_string();
        if !self.levels.filter(|l| references(l.key()))?.is_empty() {
            return Err(DomainError::still_referenced(record, &id, StockLevel::RECORD).into());
        }
        if self.movements.any(|m| references(m.key()))? {
            return Err(DomainError::still_referenced(record, &id, StockMovement::RECORD).into());
        }
        Ok(())
    }
}

#[async_trait]
impl StockStore for InMemoryStock {
    #[instrument(skip(self, cmd), fields(sku = %cmd.sku), err)]
    async fn create_product(&self, cmd: NewProduct) -> StoreResult<Product> {
        let product = Product::create(ProductId::new(), cmd, Utc::now())?;
        self.products.insert(product.clone())?;
        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    #[instrument(skip(self, cmd), fields(code = %cmd.code), err)]
    async fn create_warehouse(&self, cmd: NewWarehouse) -> StoreResult<Warehouse> {
        let warehouse = Warehouse::create(WarehouseId::new(), cmd, Utc::now())?;
        self.warehouses.insert(warehouse.clone())?;
        info!(warehouse_id = %warehouse.id, "warehouse created");
        Ok(warehouse)
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Product> {
        self.product(id)
    }

    async fn get_warehouse(&self, id: WarehouseId) -> StoreResult<Warehouse> {
        self.warehouse(id)
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn set_product_active(&self, id: ProductId, active: bool) -> StoreResult<Product> {
        self.products
            .modify(id, |p| {
                p.active = active;
                Ok(())
            })?
            .ok_or_else(|| DomainError::UnknownProduct(id).into())
    }

    #[instrument(skip(self), fields(warehouse_id = %id), err)]
    async fn set_warehouse_active(&self, id: WarehouseId, active: bool) -> StoreResult<Warehouse> {
        self.warehouses
            .modify(id, |w| {
                w.active = active;
                Ok(())
            })?
            .ok_or_else(|| DomainError::UnknownWarehouse(id).into())
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> StoreResult<()> {
        let _catalog = self.exclusive()?;
        self.product(id)?;
        self.ensure_unreferenced(Product::RECORD, id, |key| key.product == id)?;
        self.products.delete(id)?;
        info!("product deleted");
        Ok(())
    }

    #[instrument(skip(self), fields(warehouse_id = %id), err)]
    async fn delete_warehouse(&self, id: WarehouseId) -> StoreResult<()> {
        let _catalog = self.exclusive()?;
        self.warehouse(id)?;
        self.ensure_unreferenced(Warehouse::RECORD, id, |key| key.warehouse == id)?;
        self.warehouses.delete(id)?;
        info!("warehouse deleted");
        Ok(())
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product, warehouse_id = %cmd.warehouse, kind = cmd.kind.as_str(), quantity = %cmd.quantity),
        err
    )]
    async fn apply_movement(&self, cmd: ApplyMovement) -> StoreResult<StockMovement> {
        self.commit_movement(&cmd).map_err(StoreError::traced)
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product, from = %cmd.from, to = %cmd.to, quantity = %cmd.quantity),
        err
    )]
    async fn transfer(&self, cmd: Transfer) -> StoreResult<(StockMovement, StockMovement)> {
        self.commit_transfer(&cmd).map_err(StoreError::traced)
    }

    async fn get_quantity(&self, product: ProductId, warehouse: WarehouseId) -> StoreResult<Quantity> {
        self.product(product)?;
        self.warehouse(warehouse)?;
        Ok(self
            .levels
            .get(StockKey::new(product, warehouse))?
            .map(|l| l.quantity())
            .unwrap_or(Quantity::ZERO))
    }

    async fn list_stock_levels(&self, product: ProductId) -> StoreResult<Vec<StockLevel>> {
        self.product(product)?;
        self.levels.filter(|l| l.product() == product)
    }

    async fn history_page(&self, query: &HistoryQuery) -> StoreResult<HistoryPage> {
        self.product(query.product)?;
        let limit = query.effective_limit();
        let mut found = self.movements.scan_back(query.before, limit + 1, |m| {
            m.product == query.product && query.warehouse.is_none_or(|w| m.warehouse == w)
        })?;

        let next = if found.len() > limit {
            found.truncate(limit);
            found.last().map(|s| s.sequence)
        } else {
            None
        };
        Ok(HistoryPage {
            movements: found.into_iter().map(|s| s.record).collect(),
            next,
        })
    }

    async fn update_movement(&self, movement: StockMovement) -> StoreResult<()> {
        self.movements.update(movement)
    }

    async fn delete_movement(&self, movement: StockMovement) -> StoreResult<()> {
        self.movements.delete(movement.id)
    }

    #[instrument(skip(self), err)]
    async fn reconcile_levels(&self) -> StoreResult<Vec<LevelDrift>> {
        let _catalog = self.exclusive()?;
        let levels = self.levels.values()?;
        let movements = self.movements.snapshot()?;
        let drift = reconcile_levels(&levels, &movements);
        info!(levels = levels.len(), movements = movements.len(), drifted = drift.len(), "stock reconciled");
        Ok(drift)
    }
}
