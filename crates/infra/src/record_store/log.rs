use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use kore_core::{DomainError, DomainResult, Immutable};

use super::r#trait::RecordStore;
use crate::error::{StoreError, StoreResult};

/// A log record together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced<E> {
    /// Monotonically increasing, starts at 1, never reused.
    pub sequence: u64,
    pub record: E,
}

#[derive(Debug)]
struct Inner<E: Immutable> {
    records: Vec<Sequenced<E>>,
    by_id: HashMap<E::Id, usize>,
    keys: HashMap<String, usize>,
}

impl<E: Immutable> Default for Inner<E> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            by_id: HashMap::new(),
            keys: HashMap::new(),
        }
    }
}

/// Insertion-ordered, append-only log of immutable records.
///
/// There is no code path that rewrites or removes a record once appended.
#[derive(Debug)]
pub struct AppendOnlyLog<E: Immutable> {
    inner: RwLock<Inner<E>>,
}

impl<E: Immutable> Default for AppendOnlyLog<E> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl<E: Immutable> AppendOnlyLog<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner<E>>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned(E::RECORD))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner<E>>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned(E::RECORD))
    }

    pub fn append(&self, record: E) -> StoreResult<u64> {
        self.append_if(record, |_| Ok(()))
    }

    /// Run `guard` over the current log and append `record` if it passes,
    /// both under one write lock.
    pub fn append_if<G>(&self, record: E, guard: G) -> StoreResult<u64>
    where
        G: FnOnce(&[Sequenced<E>]) -> DomainResult<()>,
    {
        let sequences = self.append_all_if(vec![record], guard)?;
        sequences
            .first()
            .copied()
            .ok_or_else(|| StoreError::Database(format!("{} append returned no sequence", E::RECORD)))
    }

    /// Append a batch atomically: either every record lands or none does.
    pub fn append_all_if<G>(&self, records: Vec<E>, guard: G) -> StoreResult<Vec<u64>>
    where
        G: FnOnce(&[Sequenced<E>]) -> DomainResult<()>,
    {
        let mut inner = self.write()?;
        guard(&inner.records)?;

        let mut batch_ids = HashSet::new();
        let mut batch_keys = HashSet::new();
        for record in &records {
            let id = record.id();
            if inner.by_id.contains_key(&id) || !batch_ids.insert(id) {
                return Err(DomainError::duplicate(E::RECORD, id.to_string()).into());
            }
            if let Some(key) = record.natural_key() {
                if inner.keys.contains_key(key) || !batch_keys.insert(key.to_string()) {
                    return Err(DomainError::duplicate(E::RECORD, key).into());
                }
            }
        }

        let mut sequences = Vec::with_capacity(records.len());
        for record in records {
            let index = inner.records.len();
            let sequence = index as u64 + 1;
            inner.by_id.insert(record.id(), index);
            if let Some(key) = record.natural_key() {
                inner.keys.insert(key.to_string(), index);
            }
            inner.records.push(Sequenced { sequence, record });
            sequences.push(sequence);
        }
        Ok(sequences)
    }

    pub fn get_sequenced(&self, id: E::Id) -> StoreResult<Option<Sequenced<E>>> {
        let inner = self.read()?;
        Ok(inner.by_id.get(&id).map(|&i| inner.records[i].clone()))
    }

    pub fn find_by_key(&self, key: &str) -> StoreResult<Option<E>> {
        let inner = self.read()?;
        Ok(inner.keys.get(key).map(|&i| inner.records[i].record.clone()))
    }

    pub fn any<P>(&self, predicate: P) -> StoreResult<bool>
    where
        P: Fn(&E) -> bool,
    {
        Ok(self.read()?.records.iter().any(|s| predicate(&s.record)))
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// All records, oldest first.
    pub fn snapshot(&self) -> StoreResult<Vec<E>> {
        Ok(self.read()?.records.iter().map(|s| s.record.clone()).collect())
    }

    /// Up to `limit` records matching `filter` with a sequence below `before`
    /// (or from the tail when `None`), newest first.
    pub fn scan_back<P>(&self, before: Option<u64>, limit: usize, filter: P) -> StoreResult<Vec<Sequenced<E>>>
    where
        P: Fn(&E) -> bool,
    {
        let inner = self.read()?;
        let end = match before {
            Some(seq) => (seq.saturating_sub(1) as usize).min(inner.records.len()),
            None => inner.records.len(),
        };
        Ok(inner.records[..end]
            .iter()
            .rev()
            .filter(|s| filter(&s.record))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl<E: Immutable> RecordStore<E> for AppendOnlyLog<E> {
    fn insert(&self, record: E) -> StoreResult<E::Id> {
        let id = record.id();
        self.append(record)?;
        Ok(id)
    }

    fn get(&self, id: E::Id) -> StoreResult<Option<E>> {
        Ok(self.get_sequenced(id)?.map(|s| s.record))
    }

    fn update(&self, _record: E) -> StoreResult<()> {
        Err(DomainError::immutable(E::RECORD, "update").into())
    }

    fn delete(&self, _id: E::Id) -> StoreResult<()> {
        Err(DomainError::immutable(E::RECORD, "delete").into())
    }
}
