use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kore_core::{Amount, DomainError, DomainResult, Entity, Mutable, ProductId, WarehouseId};

/// Command: register a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub unit_cost: Decimal,
}

/// Command: register a storage location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWarehouse {
    pub code: String,
    pub name: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    pub description: String,
    pub category: Option<String>,
    pub unit_cost: Amount,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn create(id: ProductId, cmd: NewProduct, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let sku = cmd.sku.trim().to_string();
        if sku.is_empty() {
            return Err(DomainError::validation("sku cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("product name cannot be empty"));
        }
        let unit_cost = Amount::new(cmd.unit_cost)?;
        if unit_cost.is_negative() {
            return Err(DomainError::validation(format!(
                "unit cost must not be negative (got {unit_cost})"
            )));
        }
        let category = cmd
            .category
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(Self {
            id,
            sku,
            name: cmd.name,
            description: cmd.description,
            category,
            unit_cost,
            active: true,
            created_at,
        })
    }
}

impl Entity for Product {
    type Id = ProductId;
    const RECORD: &'static str = "product";

    fn id(&self) -> Self::Id {
        self.id
    }

    fn natural_key(&self) -> Option<&str> {
        Some(&self.sku)
    }
}

impl Mutable for Product {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub address: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Warehouse {
    pub fn create(id: WarehouseId, cmd: NewWarehouse, created_at: DateTime<Utc>) -> DomainResult<Self> {
        let code = cmd.code.trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("warehouse code cannot be empty"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        Ok(Self {
            id,
            code,
            name: cmd.name,
            address: cmd.address,
            active: true,
            created_at,
        })
    }
}

impl Entity for Warehouse {
    type Id = WarehouseId;
    const RECORD: &'static str = "warehouse";

    fn id(&self) -> Self::Id {
        self.id
    }

    fn natural_key(&self) -> Option<&str> {
        Some(&self.code)
    }
}

impl Mutable for Warehouse {}
