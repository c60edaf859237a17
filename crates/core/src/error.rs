//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::id::{AccountId, EntryId, InvoiceId, ProductId, WarehouseId};

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Category a [`DomainError`] belongs to.
///
/// Callers that only need to distinguish "bad input" from "state conflict"
/// from "historical record touched" from "dangling reference" match on this
/// instead of on individual variants.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input (negative quantity, empty line set, too many decimals).
    Validation,
    /// The request is well-formed but conflicts with current state.
    Consistency,
    /// Attempted update or delete of a historical record.
    Immutability,
    /// A referenced record is missing, inactive, or still referenced.
    Reference,
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures. Storage
/// faults are reported by the infrastructure layer and wrap this type.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("quantity must not be negative (got {0})")]
    NegativeQuantity(Decimal),

    #[error("unbalanced entry: debit {debit} != credit {credit}")]
    UnbalancedEntry { debit: Decimal, credit: Decimal },

    #[error("journal entry {0} has already been reversed")]
    AlreadyReversed(EntryId),

    #[error("insufficient stock: {available} on hand, {requested} requested")]
    InsufficientStock {
        product: ProductId,
        warehouse: WarehouseId,
        available: Decimal,
        requested: Decimal,
    },

    /// Making `parent` the parent of `account` would close a loop.
    #[error("account {account} cannot be placed under {parent}: hierarchy cycle")]
    HierarchyCycle { account: AccountId, parent: AccountId },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("duplicate entry number: {0}")]
    DuplicateEntryNumber(String),

    /// A unique natural key (account code, SKU, warehouse code, invoice number) is taken.
    #[error("duplicate {record} key: {key}")]
    Duplicate { record: &'static str, key: String },

    #[error("{record} records are immutable: {operation} rejected")]
    ImmutabilityViolation {
        record: &'static str,
        operation: &'static str,
    },

    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("account is inactive: {0}")]
    InactiveAccount(AccountId),

    #[error("unknown journal entry: {0}")]
    UnknownEntry(EntryId),

    #[error("unknown product: {0}")]
    UnknownProduct(ProductId),

    #[error("unknown warehouse: {0}")]
    UnknownWarehouse(WarehouseId),

    #[error("unknown invoice: {0}")]
    UnknownInvoice(InvoiceId),

    /// Delete refused because other records still point at the target.
    #[error("{record} {id} is still referenced by {by}")]
    StillReferenced {
        record: &'static str,
        id: String,
        by: &'static str,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn duplicate(record: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            record,
            key: key.into(),
        }
    }

    pub fn immutable(record: &'static str, operation: &'static str) -> Self {
        Self::ImmutabilityViolation { record, operation }
    }

    pub fn still_referenced(record: &'static str, id: impl ToString, by: &'static str) -> Self {
        Self::StillReferenced {
            record,
            id: id.to_string(),
            by,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) | DomainError::NegativeQuantity(_) => ErrorKind::Validation,
            DomainError::UnbalancedEntry { .. }
            | DomainError::AlreadyReversed(_)
            | DomainError::InsufficientStock { .. }
            | DomainError::HierarchyCycle { .. }
            | DomainError::InvalidTransition { .. }
            | DomainError::DuplicateEntryNumber(_)
            | DomainError::Duplicate { .. } => ErrorKind::Consistency,
            DomainError::ImmutabilityViolation { .. } => ErrorKind::Immutability,
            DomainError::UnknownAccount(_)
            | DomainError::InactiveAccount(_)
            | DomainError::UnknownEntry(_)
            | DomainError::UnknownProduct(_)
            | DomainError::UnknownWarehouse(_)
            | DomainError::UnknownInvoice(_)
            | DomainError::StillReferenced { .. } => ErrorKind::Reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(DomainError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(
            DomainError::AlreadyReversed(EntryId::new()).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            DomainError::immutable("stock_movement", "update").kind(),
            ErrorKind::Immutability
        );
        assert_eq!(
            DomainError::UnknownWarehouse(WarehouseId::new()).kind(),
            ErrorKind::Reference
        );
    }

    #[test]
    fn display_names_the_operation() {
        let err = DomainError::immutable("journal_entry", "delete");
        assert_eq!(
            err.to_string(),
            "journal_entry records are immutable: delete rejected"
        );
    }
}
