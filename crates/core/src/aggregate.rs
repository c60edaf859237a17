//! Derived aggregates anchored on an append-only log.

use crate::entity::{Immutable, Mutable};

/// Mutable state derived from immutable log records.
///
/// The engines call `apply` once per committed record while holding the
/// aggregate's row lock. Offline reconciliation replays the same `apply`
/// over the whole log, so the cached value and the replayed value come from
/// one code path.
///
/// `apply` must ignore records that do not concern this aggregate instance.
pub trait Aggregate: Mutable {
    type Event: Immutable;

    /// Evolve state from a single committed record.
    fn apply(&mut self, event: &Self::Event);

    /// Fold a sequence of records into this aggregate.
    fn replay<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Event>,
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}
