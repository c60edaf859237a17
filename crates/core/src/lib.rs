//! `kore-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, fixed-point decimals, the error taxonomy, and the record
//! markers the stores use to tell historical records from mutable ones.

pub mod aggregate;
pub mod decimal;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::Aggregate;
pub use decimal::{Amount, Fixed, Quantity, AMOUNT_SCALE, QUANTITY_SCALE};
pub use entity::{Entity, Immutable, Mutable};
pub use error::{DomainError, DomainResult, ErrorKind};
pub use id::{AccountId, EntryId, InvoiceId, MovementId, ProductId, UserId, WarehouseId};
