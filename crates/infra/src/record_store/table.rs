use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use kore_core::{DomainError, Mutable};

use super::r#trait::{lock, RecordStore};
use crate::error::{StoreError, StoreResult};

/// Shared handle to one row; the mutex is the row lock.
pub type Row<E> = Arc<Mutex<E>>;

#[derive(Debug)]
struct Inner<E: Mutable> {
    rows: BTreeMap<E::Id, Row<E>>,
    keys: HashMap<String, E::Id>,
}

impl<E: Mutable> Default for Inner<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            keys: HashMap::new(),
        }
    }
}

/// Keyed table of mutable rows, each behind its own row lock.
///
/// Lock order: a row lock may be held while the table lock is taken, never
/// the other way round. Every method here releases the table lock before it
/// touches a row.
#[derive(Debug)]
pub struct Table<E: Mutable> {
    inner: RwLock<Inner<E>>,
}

impl<E: Mutable> Default for Table<E> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }
}

impl<E: Mutable> Table<E> {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Inner<E>>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned(E::RECORD))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Inner<E>>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned(E::RECORD))
    }

    pub fn contains(&self, id: E::Id) -> StoreResult<bool> {
        Ok(self.read()?.rows.contains_key(&id))
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.rows.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn row(&self, id: E::Id) -> StoreResult<Option<Row<E>>> {
        Ok(self.read()?.rows.get(&id).cloned())
    }

    /// Row handles for `ids`, deduplicated and sorted by id.
    ///
    /// Lock the returned rows front to back (see [`lock_all`]) so that two
    /// callers touching overlapping sets cannot deadlock.
    pub fn rows_sorted<I>(&self, ids: I) -> StoreResult<Vec<(E::Id, Option<Row<E>>)>>
    where
        I: IntoIterator<Item = E::Id>,
    {
        let mut ids: Vec<E::Id> = ids.into_iter().collect();
        ids.sort();
        ids.dedup();
        let inner = self.read()?;
        Ok(ids
            .into_iter()
            .map(|id| (id, inner.rows.get(&id).cloned()))
            .collect())
    }

    /// Fetch the row for `id`, creating it with `init` if it does not exist.
    pub fn row_or_insert_with<F>(&self, id: E::Id, init: F) -> StoreResult<Row<E>>
    where
        F: FnOnce() -> E,
    {
        if let Some(row) = self.row(id)? {
            return Ok(row);
        }
        let mut inner = self.write()?;
        if let Some(row) = inner.rows.get(&id) {
            return Ok(row.clone());
        }
        let record = init();
        if let Some(key) = record.natural_key() {
            if inner.keys.contains_key(key) {
                return Err(DomainError::duplicate(E::RECORD, key).into());
            }
            inner.keys.insert(key.to_string(), id);
        }
        let row = Arc::new(Mutex::new(record));
        inner.rows.insert(id, row.clone());
        Ok(row)
    }

    pub fn find_by_key(&self, key: &str) -> StoreResult<Option<E>> {
        let row = {
            let inner = self.read()?;
            inner.keys.get(key).and_then(|id| inner.rows.get(id)).cloned()
        };
        match row {
            Some(row) => Ok(Some(lock(&row)?.clone())),
            None => Ok(None),
        }
    }

    /// Apply `f` to a copy of the row and store the copy if `f` succeeds.
    ///
    /// The natural key must not change. Returns `None` if the row is missing.
    pub fn modify<F>(&self, id: E::Id, f: F) -> StoreResult<Option<E>>
    where
        F: FnOnce(&mut E) -> Result<(), DomainError>,
    {
        let Some(row) = self.row(id)? else {
            return Ok(None);
        };
        let mut guard = lock(&row)?;
        let mut next = guard.clone();
        f(&mut next)?;
        if next.natural_key() != guard.natural_key() {
            return Err(DomainError::validation(format!("{} key cannot be changed in place", E::RECORD)).into());
        }
        *guard = next.clone();
        Ok(Some(next))
    }

    /// Consistent copy of every row, in id order.
    pub fn values(&self) -> StoreResult<Vec<E>> {
        let rows: Vec<Row<E>> = self.read()?.rows.values().cloned().collect();
        rows.iter().map(|row| Ok(lock(row)?.clone())).collect()
    }

    pub fn filter<P>(&self, mut predicate: P) -> StoreResult<Vec<E>>
    where
        P: FnMut(&E) -> bool,
    {
        Ok(self.values()?.into_iter().filter(|e| predicate(e)).collect())
    }
}

/// Lock every row in slice order.
pub fn lock_all<E: Mutable>(rows: &[Row<E>]) -> StoreResult<Vec<MutexGuard<'_, E>>> {
    rows.iter().map(|row| lock(row)).collect()
}

impl<E: Mutable> RecordStore<E> for Table<E> {
    fn insert(&self, record: E) -> StoreResult<E::Id> {
        let id = record.id();
        let mut inner = self.write()?;
        if inner.rows.contains_key(&id) {
            return Err(DomainError::duplicate(E::RECORD, id.to_string()).into());
        }
        if let Some(key) = record.natural_key() {
            if inner.keys.contains_key(key) {
                return Err(DomainError::duplicate(E::RECORD, key).into());
            }
            inner.keys.insert(key.to_string(), id);
        }
        inner.rows.insert(id, Arc::new(Mutex::new(record)));
        Ok(id)
    }

    fn get(&self, id: E::Id) -> StoreResult<Option<E>> {
        match self.row(id)? {
            Some(row) => Ok(Some(lock(&row)?.clone())),
            None => Ok(None),
        }
    }

    fn update(&self, record: E) -> StoreResult<()> {
        let id = record.id();
        let Some(row) = self.row(id)? else {
            return Err(unknown::<E>(id));
        };
        let mut guard = lock(&row)?;
        let old_key = guard.natural_key().map(str::to_string);
        let new_key = record.natural_key().map(str::to_string);
        if old_key != new_key {
            let mut inner = self.write()?;
            if let Some(key) = &new_key {
                if inner.keys.get(key).is_some_and(|owner| *owner != id) {
                    return Err(DomainError::duplicate(E::RECORD, key.as_str()).into());
                }
            }
            if let Some(key) = &old_key {
                inner.keys.remove(key);
            }
            if let Some(key) = new_key {
                inner.keys.insert(key, id);
            }
        }
        *guard = record;
        Ok(())
    }

    fn delete(&self, id: E::Id) -> StoreResult<()> {
        let mut inner = self.write()?;
        let Some(row) = inner.rows.remove(&id) else {
            return Err(unknown::<E>(id));
        };
        drop(inner);
        let key = lock(&row)?.natural_key().map(str::to_string);
        if let Some(key) = key {
            self.write()?.keys.remove(&key);
        }
        Ok(())
    }
}

fn unknown<E: Mutable>(id: E::Id) -> StoreError {
    DomainError::validation(format!("no {} with id {id}", E::RECORD)).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kore_core::Entity;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: u32,
        code: String,
        qty: i64,
    }

    impl Entity for Item {
        type Id = u32;
        const RECORD: &'static str = "item";

        fn id(&self) -> u32 {
            self.id
        }

        fn natural_key(&self) -> Option<&str> {
            Some(&self.code)
        }
    }

    impl Mutable for Item {}

    fn item(id: u32, code: &str) -> Item {
        Item {
            id,
            code: code.to_string(),
            qty: 0,
        }
    }

    #[test]
    fn natural_keys_are_unique() {
        let t = Table::new();
        t.insert(item(1, "A")).unwrap();
        let err = t.insert(item(2, "A")).unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Duplicate { record: "item", .. })));
        assert_eq!(t.find_by_key("A").unwrap().map(|i| i.id), Some(1));
    }

    #[test]
    fn update_moves_the_key_and_delete_frees_it() {
        let t = Table::new();
        t.insert(item(1, "A")).unwrap();
        t.insert(item(2, "B")).unwrap();
        assert!(t.update(item(1, "B")).is_err());

        t.update(item(1, "C")).unwrap();
        assert!(t.find_by_key("A").unwrap().is_none());
        t.delete(1).unwrap();
        t.insert(item(3, "C")).unwrap();
        assert_eq!(t.len().unwrap(), 2);
    }

    #[test]
    fn modify_is_all_or_nothing() {
        let t = Table::new();
        t.insert(item(1, "A")).unwrap();
        let err = t.modify(1, |i| {
            i.qty = 10;
            Err(DomainError::validation("nope"))
        });
        assert!(err.is_err());
        assert_eq!(t.get(1).unwrap().unwrap().qty, 0);

        let changed = t.modify(1, |i| {
            i.qty = 10;
            Ok(())
        });
        assert_eq!(changed.unwrap().unwrap().qty, 10);
        assert!(t.modify(9, |_| Ok(())).unwrap().is_none());
    }

    #[test]
    fn rows_sorted_dedups_and_orders() {
        let t = Table::new();
        for (id, code) in [(3, "c"), (1, "a"), (2, "b")] {
            t.insert(item(id, code)).unwrap();
        }
        let ids: Vec<u32> = t.rows_sorted([3, 1, 3, 7]).unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 7]);
        let missing = t.rows_sorted([7]).unwrap();
        assert!(missing[0].1.is_none());
    }

    #[test]
    fn row_or_insert_with_creates_once() {
        let t: Table<Item> = Table::new();
        let a = t.row_or_insert_with(5, || item(5, "e")).unwrap();
        let b = t.row_or_insert_with(5, || item(5, "other")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(lock_all(&[a]).unwrap()[0].code, "e");
    }
}
