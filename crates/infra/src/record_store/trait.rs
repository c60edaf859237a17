use std::sync::{Mutex, MutexGuard};

use kore_core::Entity;

use crate::error::{StoreError, StoreResult};

/// Minimal persistence contract shared by every in-memory record container.
///
/// Mutable records ([`super::Table`]) honour all four operations. Immutable
/// records ([`super::AppendOnlyLog`]) accept `insert` and `get`; `update` and
/// `delete` always fail with `ImmutabilityViolation`.
pub trait RecordStore<E: Entity>: Send + Sync {
    /// Persist a new record and return its identity.
    fn insert(&self, record: E) -> StoreResult<E::Id>;

    fn get(&self, id: E::Id) -> StoreResult<Option<E>>;

    /// Replace the stored record with the same identity.
    fn update(&self, record: E) -> StoreResult<()>;

    fn delete(&self, id: E::Id) -> StoreResult<()>;
}

pub(crate) fn lock<'a, E: Entity>(row: &'a Mutex<E>) -> StoreResult<MutexGuard<'a, E>> {
    row.lock().map_err(|_| StoreError::LockPoisoned(E::RECORD))
}
