//! Record markers: identity, natural keys, and mutability class.

/// A persisted record with identity.
pub trait Entity: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Strongly-typed identifier.
    type Id: Copy + Eq + Ord + core::hash::Hash + core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    /// Stable record name used in errors and logs (e.g. "journal_entry").
    const RECORD: &'static str;

    /// Returns the record identifier.
    fn id(&self) -> Self::Id;

    /// Unique business key, if the record has one (code, SKU, entry number).
    fn natural_key(&self) -> Option<&str> {
        None
    }
}

/// Historical record that may be inserted but never updated or deleted.
///
/// Journal entries and stock movements are immutable. Corrections are new
/// records (a reversal entry, a compensating movement).
pub trait Immutable: Entity {}

/// Record that may be updated in place (catalog data, cached aggregates).
pub trait Mutable: Entity {}
