//! PostgreSQL-backed inventory.
//!
//! ## Locking
//!
//! A movement runs in one transaction:
//!
//! 1. `FOR SHARE` on the product and warehouse rows (blocks a concurrent delete)
//! 2. `INSERT .. ON CONFLICT DO NOTHING` for the level row, so a first movement
//!    has a row to lock
//! 3. `SELECT .. FOR UPDATE` on the level row; concurrent movements on the same
//!    pair queue here
//! 4. plan, insert the movement, update the level, commit
//!
//! A rejected movement rolls back, which also discards a level row created in
//! step 2. A transfer locks both level rows in warehouse id order.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::{info, instrument};
use uuid::Uuid;

use kore_core::{DomainError, Entity, MovementId, ProductId, Quantity, UserId, WarehouseId};
use kore_inventory::{
    reconcile_levels, ApplyMovement, LevelDrift, MovementKind, NewProduct, NewWarehouse, Product,
    StockKey, StockLevel, StockMovement, Transfer, Warehouse,
};

use super::{HistoryPage, HistoryQuery, StockStore};
use crate::error::{StoreError, StoreResult};
use crate::postgres::{abort, amount, decode, map_delete_error, map_insert_error, map_sqlx_error, quantity};

const PRODUCT_COLUMNS: &str = "id, sku, name, description, category, unit_cost, active, created_at";
const WAREHOUSE_COLUMNS: &str = "id, code, name, address, active, created_at";
const MOVEMENT_COLUMNS: &str =
    "seq, id, product_id, warehouse_id, delta, kind, reference, notes, actor, created_at";

/// PostgreSQL inventory store.
#[derive(Debug, Clone)]
pub struct PostgresStock {
    pool: Arc<PgPool>,
}

impl PostgresStock {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn product_on(conn: &mut PgConnection, id: ProductId) -> StoreResult<Product> {
        let sql = format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(|e| map_sqlx_error("get_product", e))?
            .ok_or(DomainError::UnknownProduct(id))?
            .into_product()
    }

    async fn warehouse_on(conn: &mut PgConnection, id: WarehouseId) -> StoreResult<Warehouse> {
        let sql = format!("SELECT {WAREHOUSE_COLUMNS} FROM warehouses WHERE id = $1");
        sqlx::query_as::<_, WarehouseRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(conn)
            .await
            .map_err(|e| map_sqlx_error("get_warehouse", e))?
            .ok_or(DomainError::UnknownWarehouse(id))?
            .into_warehouse()
    }

    /// `FOR SHARE` on the catalog rows a movement references.
    async fn share_catalog(
        conn: &mut PgConnection,
        product: ProductId,
        warehouses: &[WarehouseId],
    ) -> StoreResult<()> {
        let found = sqlx::query("SELECT id FROM products WHERE id = $1 FOR SHARE")
            .bind(product.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("lock_product", e))?;
        if found.is_none() {
            return Err(DomainError::UnknownProduct(product).into());
        }
        for warehouse in warehouses {
            let found = sqlx::query("SELECT id FROM warehouses WHERE id = $1 FOR SHARE")
                .bind(warehouse.as_uuid())
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| map_sqlx_error("lock_warehouse", e))?;
            if found.is_none() {
                return Err(DomainError::UnknownWarehouse(*warehouse).into());
            }
        }
        Ok(())
    }

    async fn ensure_level(conn: &mut PgConnection, key: StockKey) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO stock_levels (product_id, warehouse_id, quantity, updated_at) \
             VALUES ($1, $2, 0, $3) ON CONFLICT (product_id, warehouse_id) DO NOTHING",
        )
        .bind(key.product.as_uuid())
        .bind(key.warehouse.as_uuid())
        .bind(Utc::now())
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("ensure_level", e))?;
        Ok(())
    }

    /// Lock the level rows for `product` at `warehouses`, in warehouse id order.
    async fn lock_levels(
        conn: &mut PgConnection,
        product: ProductId,
        warehouses: &[WarehouseId],
    ) -> StoreResult<Vec<StockLevel>> {
        let raw: Vec<Uuid> = warehouses.iter().map(|w| *w.as_uuid()).collect();
        sqlx::query_as::<_, LevelRow>(
            "SELECT product_id, warehouse_id, quantity, updated_at FROM stock_levels \
             WHERE product_id = $1 AND warehouse_id = ANY($2) ORDER BY warehouse_id FOR UPDATE",
        )
        .bind(product.as_uuid())
        .bind(&raw)
        .fetch_all(conn)
        .await
        .map_err(|e| map_sqlx_error("lock_levels", e))?
        .into_iter()
        .map(LevelRow::into_level)
        .collect()
    }

    async fn insert_movement(conn: &mut PgConnection, movement: &StockMovement) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO stock_movements (id, product_id, warehouse_id, delta, kind, reference, notes, actor, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(movement.id.as_uuid())
        .bind(movement.product.as_uuid())
        .bind(movement.warehouse.as_uuid())
        .bind(movement.delta.value())
        .bind(movement.kind.as_str())
        .bind(&movement.reference)
        .bind(&movement.notes)
        .bind(movement.actor.as_uuid())
        .bind(movement.timestamp)
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error("insert_movement", e))?;
        Ok(())
    }

    async fn store_level(conn: &mut PgConnection, key: StockKey, level: Quantity, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE stock_levels SET quantity = $3, updated_at = $4 WHERE product_id = $1 AND warehouse_id = $2")
            .bind(key.product.as_uuid())
            .bind(key.warehouse.as_uuid())
            .bind(level.value())
            .bind(at)
            .execute(conn)
            .await
            .map_err(|e| map_sqlx_error("update_level", e))?;
        Ok(())
    }

    /// Stock levels and movements referencing a catalog row.
    async fn check_references(conn: &mut PgConnection, record: &'static str, column: &str, id: Uuid) -> StoreResult<()> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM stock_levels WHERE {column} = $1), \
                    EXISTS (SELECT 1 FROM stock_movements WHERE {column} = $1)"
        );
        let (levels, movements): (bool, bool) = sqlx::query_as(&sql)
            .bind(id)
            .fetch_one(conn)
            .await
            .map_err(|e| map_sqlx_error("check_references", e))?;

        if levels {
            return Err(DomainError::still_referenced(record, id, StockLevel::RECORD).into());
        }
        if movements {
            return Err(DomainError::still_referenced(record, id, StockMovement::RECORD).into());
        }
        Ok(())
    }

    async fn delete_catalog_row(&self, record: &'static str, table: &str, column: &str, id: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let lock = format!("SELECT id FROM {table} WHERE id = $1 FOR UPDATE");
        let found = sqlx::query(&lock)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_catalog_row", e))?;
        if found.is_none() {
            let unknown = if record == Product::RECORD {
                DomainError::UnknownProduct(ProductId::from_uuid(id))
            } else {
                DomainError::UnknownWarehouse(WarehouseId::from_uuid(id))
            };
            return abort(tx, unknown).await;
        }
        if let Err(e) = Self::check_references(&mut tx, record, column, id).await {
            return abort(tx, e).await;
        }

        let delete = format!("DELETE FROM {table} WHERE id = $1");
        let deleted = sqlx::query(&delete).bind(id).execute(&mut *tx).await;
        if let Err(e) = deleted {
            return abort(tx, map_delete_error("delete_catalog_row", record, id, e)).await;
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        info!(record, %id, "catalog row deleted");
        Ok(())
    }

    async fn commit_movement(&self, cmd: &ApplyMovement) -> StoreResult<StockMovement> {
        let key = cmd.key();
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;

        if let Err(e) = Self::share_catalog(&mut tx, cmd.product, &[cmd.warehouse]).await {
            return abort(tx, e).await;
        }
        Self::ensure_level(&mut tx, key).await?;
        let Some(level) = Self::lock_levels(&mut tx, cmd.product, &[cmd.warehouse]).await?.pop() else {
            return abort(tx, StoreError::Database(format!("stock level {key} vanished under lock"))).await;
        };

        let plan = match cmd.plan(&level) {
            Ok(plan) => plan,
            Err(e) => return abort(tx, e).await,
        };
        let movement = cmd.record(MovementId::new(), &plan, Utc::now());
        Self::insert_movement(&mut tx, &movement).await?;
        Self::store_level(&mut tx, key, plan.new_level, movement.timestamp).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        info!(
            movement_id = %movement.id,
            delta = %movement.delta,
            level = %plan.new_level,
            "stock movement committed"
        );
        Ok(movement)
    }

    async fn commit_transfer(&self, cmd: &Transfer) -> StoreResult<(StockMovement, StockMovement)> {
        cmd.validate()?;
        let (source, destination) = (cmd.source(), cmd.destination());
        let mut warehouses = [cmd.from, cmd.to];
        warehouses.sort();

        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        if let Err(e) = Self::share_catalog(&mut tx, cmd.product, &warehouses).await {
            return abort(tx, e).await;
        }
        for warehouse in warehouses {
            Self::ensure_level(&mut tx, StockKey::new(cmd.product, warehouse)).await?;
        }
        let levels = Self::lock_levels(&mut tx, cmd.product, &warehouses).await?;
        let find = |key: StockKey| levels.iter().find(|l| l.key() == key);
        let (Some(src), Some(dst)) = (find(source), find(destination)) else {
            return abort(tx, StoreError::Database("transfer levels vanished under lock".to_string())).await;
        };

        let plan = match cmd.plan(src, dst) {
            Ok(plan) => plan,
            Err(e) => return abort(tx, e).await,
        };
        let (out, into) = cmd.record((MovementId::new(), MovementId::new()), &plan, Utc::now());
        Self::insert_movement(&mut tx, &out).await?;
        Self::insert_movement(&mut tx, &into).await?;
        Self::store_level(&mut tx, source, plan.source.new_level, out.timestamp).await?;
        Self::store_level(&mut tx, destination, plan.destination.new_level, into.timestamp).await?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        info!(
            quantity = %into.delta,
            source_level = %plan.source.new_level,
            destination_level = %plan.destination.new_level,
            "stock transfer committed"
        );
        Ok((out, into))
    }
}

#[async_trait]
impl StockStore for PostgresStock {
    #[instrument(skip(self, cmd), fields(sku = %cmd.sku), err)]
    async fn create_product(&self, cmd: NewProduct) -> StoreResult<Product> {
        let product = Product::create(ProductId::new(), cmd, Utc::now())?;
        sqlx::query(
            "INSERT INTO products (id, sku, name, description, category, unit_cost, active, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.id.as_uuid())
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.category.as_deref())
        .bind(product.unit_cost.value())
        .bind(product.active)
        .bind(product.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_insert_error("create_product", &product.sku, e))?;

        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    #[instrument(skip(self, cmd), fields(code = %cmd.code), err)]
    async fn create_warehouse(&self, cmd: NewWarehouse) -> StoreResult<Warehouse> {
        let warehouse = Warehouse::create(WarehouseId::new(), cmd, Utc::now())?;
        sqlx::query(
            "INSERT INTO warehouses (id, code, name, address, active, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(warehouse.id.as_uuid())
        .bind(&warehouse.code)
        .bind(&warehouse.name)
        .bind(&warehouse.address)
        .bind(warehouse.active)
        .bind(warehouse.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_insert_error("create_warehouse", &warehouse.code, e))?;

        info!(warehouse_id = %warehouse.id, "warehouse created");
        Ok(warehouse)
    }

    async fn get_product(&self, id: ProductId) -> StoreResult<Product> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::product_on(&mut conn, id).await
    }

    async fn get_warehouse(&self, id: WarehouseId) -> StoreResult<Warehouse> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::warehouse_on(&mut conn, id).await
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn set_product_active(&self, id: ProductId, active: bool) -> StoreResult<Product> {
        let sql = format!("UPDATE products SET active = $2 WHERE id = $1 RETURNING {PRODUCT_COLUMNS}");
        sqlx::query_as::<_, ProductRow>(&sql)
            .bind(id.as_uuid())
            .bind(active)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_product_active", e))?
            .ok_or(DomainError::UnknownProduct(id))?
            .into_product()
    }

    #[instrument(skip(self), fields(warehouse_id = %id), err)]
    async fn set_warehouse_active(&self, id: WarehouseId, active: bool) -> StoreResult<Warehouse> {
        let sql = format!("UPDATE warehouses SET active = $2 WHERE id = $1 RETURNING {WAREHOUSE_COLUMNS}");
        sqlx::query_as::<_, WarehouseRow>(&sql)
            .bind(id.as_uuid())
            .bind(active)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("set_warehouse_active", e))?
            .ok_or(DomainError::UnknownWarehouse(id))?
            .into_warehouse()
    }

    #[instrument(skip(self), fields(product_id = %id), err)]
    async fn delete_product(&self, id: ProductId) -> StoreResult<()> {
        self.delete_catalog_row(Product::RECORD, "products", "product_id", *id.as_uuid())
            .await
    }

    #[instrument(skip(self), fields(warehouse_id = %id), err)]
    async fn delete_warehouse(&self, id: WarehouseId) -> StoreResult<()> {
        self.delete_catalog_row(Warehouse::RECORD, "warehouses", "warehouse_id", *id.as_uuid())
            .await
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product, warehouse_id = %cmd.warehouse, kind = cmd.kind.as_str(), quantity = %cmd.quantity),
        err
    )]
    async fn apply_movement(&self, cmd: ApplyMovement) -> StoreResult<StockMovement> {
        self.commit_movement(&cmd).await.map_err(StoreError::traced)
    }

    #[instrument(
        skip(self, cmd),
        fields(product_id = %cmd.product, from = %cmd.from, to = %cmd.to, quantity = %cmd.quantity),
        err
    )]
    async fn transfer(&self, cmd: Transfer) -> StoreResult<(StockMovement, StockMovement)> {
        self.commit_transfer(&cmd).await.map_err(StoreError::traced)
    }

    async fn get_quantity(&self, product: ProductId, warehouse: WarehouseId) -> StoreResult<Quantity> {
        let (has_product, has_warehouse, raw): (bool, bool, Option<Decimal>) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM products WHERE id = $1), \
                    EXISTS (SELECT 1 FROM warehouses WHERE id = $2), \
                    (SELECT quantity FROM stock_levels WHERE product_id = $1 AND warehouse_id = $2)",
        )
        .bind(product.as_uuid())
        .bind(warehouse.as_uuid())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_quantity", e))?;

        if !has_product {
            return Err(DomainError::UnknownProduct(product).into());
        }
        if !has_warehouse {
            return Err(DomainError::UnknownWarehouse(warehouse).into());
        }
        raw.map_or(Ok(Quantity::ZERO), |q| quantity("quantity", q))
    }

    async fn list_stock_levels(&self, product: ProductId) -> StoreResult<Vec<StockLevel>> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::product_on(&mut conn, product).await?;
        sqlx::query_as::<_, LevelRow>(
            "SELECT product_id, warehouse_id, quantity, updated_at FROM stock_levels \
             WHERE product_id = $1 ORDER BY warehouse_id",
        )
        .bind(product.as_uuid())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("list_stock_levels", e))?
        .into_iter()
        .map(LevelRow::into_level)
        .collect()
    }

    async fn history_page(&self, query: &HistoryQuery) -> StoreResult<HistoryPage> {
        let mut conn = self.pool.acquire().await.map_err(|e| map_sqlx_error("acquire", e))?;
        Self::product_on(&mut conn, query.product).await?;

        let limit = query.effective_limit();
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE product_id = $1 AND ($2::uuid IS NULL OR warehouse_id = $2) AND ($3::bigint IS NULL OR seq < $3) \
             ORDER BY seq DESC LIMIT $4"
        );
        let mut rows = sqlx::query_as::<_, MovementRow>(&sql)
            .bind(query.product.as_uuid())
            .bind(query.warehouse.map(|w| *w.as_uuid()))
            .bind(query.before.map(|seq| seq as i64))
            .bind(limit as i64 + 1)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("history_page", e))?;

        let next = if rows.len() > limit {
            rows.truncate(limit);
            rows.last().map(|r| r.seq as u64)
        } else {
            None
        };
        Ok(HistoryPage {
            movements: rows.into_iter().map(MovementRow::into_movement).collect::<StoreResult<_>>()?,
            next,
        })
    }

    async fn update_movement(&self, movement: StockMovement) -> StoreResult<()> {
        sqlx::query("UPDATE stock_movements SET notes = $2 WHERE id = $1")
            .bind(movement.id.as_uuid())
            .bind(&movement.notes)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_movement", e))?;
        Err(DomainError::immutable(StockMovement::RECORD, "update").into())
    }

    async fn delete_movement(&self, movement: StockMovement) -> StoreResult<()> {
        sqlx::query("DELETE FROM stock_movements WHERE id = $1")
            .bind(movement.id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_movement", e))?;
        Err(DomainError::immutable(StockMovement::RECORD, "delete").into())
    }

    #[instrument(skip(self), err)]
    async fn reconcile_levels(&self) -> StoreResult<Vec<LevelDrift>> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let levels = sqlx::query_as::<_, LevelRow>(
            "SELECT product_id, warehouse_id, quantity, updated_at FROM stock_levels ORDER BY product_id, warehouse_id",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("load_levels", e))?
        .into_iter()
        .map(LevelRow::into_level)
        .collect::<StoreResult<Vec<_>>>()?;

        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements ORDER BY seq");
        let movements = sqlx::query_as::<_, MovementRow>(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("load_movements", e))?
            .into_iter()
            .map(MovementRow::into_movement)
            .collect::<StoreResult<Vec<_>>>()?;
        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;

        let drift = reconcile_levels(&levels, &movements);
        info!(levels = levels.len(), movements = movements.len(), drifted = drift.len(), "stock reconciled");
        Ok(drift)
    }
}

// Database row types

#[derive(Debug)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    description: String,
    category: Option<String>,
    unit_cost: Decimal,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ProductRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProductRow {
            id: row.try_get("id")?,
            sku: row.try_get("sku")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            category: row.try_get("category")?,
            unit_cost: row.try_get("unit_cost")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl ProductRow {
    fn into_product(self) -> StoreResult<Product> {
        Ok(Product {
            id: ProductId::from_uuid(self.id),
            sku: self.sku,
            name: self.name,
            description: self.description,
            category: self.category,
            unit_cost: amount("unit_cost", self.unit_cost)?,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug)]
struct WarehouseRow {
    id: Uuid,
    code: String,
    name: String,
    address: String,
    active: bool,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for WarehouseRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(WarehouseRow {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl WarehouseRow {
    fn into_warehouse(self) -> StoreResult<Warehouse> {
        Ok(Warehouse {
            id: WarehouseId::from_uuid(self.id),
            code: self.code,
            name: self.name,
            address: self.address,
            active: self.active,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug)]
struct LevelRow {
    product_id: Uuid,
    warehouse_id: Uuid,
    quantity: Decimal,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LevelRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LevelRow {
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            quantity: row.try_get("quantity")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl LevelRow {
    fn into_level(self) -> StoreResult<StockLevel> {
        let key = StockKey::new(ProductId::from_uuid(self.product_id), WarehouseId::from_uuid(self.warehouse_id));
        Ok(StockLevel::restore(key, quantity("quantity", self.quantity)?, self.updated_at))
    }
}

#[derive(Debug)]
struct MovementRow {
    seq: i64,
    id: Uuid,
    product_id: Uuid,
    warehouse_id: Uuid,
    delta: Decimal,
    kind: String,
    reference: String,
    notes: String,
    actor: Uuid,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            seq: row.try_get("seq")?,
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            warehouse_id: row.try_get("warehouse_id")?,
            delta: row.try_get("delta")?,
            kind: row.try_get("kind")?,
            reference: row.try_get("reference")?,
            notes: row.try_get("notes")?,
            actor: row.try_get("actor")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl MovementRow {
    fn into_movement(self) -> StoreResult<StockMovement> {
        Ok(StockMovement {
            id: MovementId::from_uuid(self.id),
            product: ProductId::from_uuid(self.product_id),
            warehouse: WarehouseId::from_uuid(self.warehouse_id),
            delta: quantity("delta", self.delta)?,
            kind: decode("kind", &self.kind, MovementKind::parse)?,
            reference: self.reference,
            notes: self.notes,
            actor: UserId::from_uuid(self.actor),
            timestamp: self.created_at,
        })
    }
}
