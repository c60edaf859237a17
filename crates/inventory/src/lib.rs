//! Inventory domain module (movement ledger).
//!
//! This crate contains business rules for stock keeping, implemented purely
//! as deterministic domain logic (no IO, no locking, no storage).

pub mod catalog;
pub mod movement;
pub mod reconcile;
pub mod stock;

pub use catalog::{NewProduct, NewWarehouse, Product, Warehouse};
pub use movement::{ApplyMovement, MovementKind, MovementPlan, StockMovement, Transfer, TransferPlan};
pub use reconcile::{reconcile_levels, replay_levels, LevelDrift};
pub use stock::{StockKey, StockLevel};
