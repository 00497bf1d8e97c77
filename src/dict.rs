//! Chained hash table with two sub-tables and incremental rehashing.
//!
//! Growing migrates entries from table 0 to table 1 one bucket at a time; a
//! unit of migration work is piggybacked on every lookup and mutation, so no
//! single operation pays for the whole resize. The keyspace, the expiry
//! index, set and hash payloads and the sorted-set score index all sit on
//! this structure.

use std::cell::Cell;

use bytes::Bytes;
use rand::Rng;
use thiserror::Error as ThisError;

const INIT_SIZE: usize = 8;
const FORCE_RATIO: usize = 2;
const RANDOM_RETRY_BUDGET: usize = 1000;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum DictError {
    #[error("key exists")]
    KeyExists,
    #[error("key doesnt exist")]
    NotFound,
}

/// Folds a value into a dict fingerprint. Types without meaningful content
/// (or with interior mutability of their own) fold to zero, matching how the
/// structure summary treats absent values.
pub trait Fold {
    fn fold(&self) -> u64 {
        0
    }
}

impl Fold for () {}

impl Fold for Bytes {
    fn fold(&self) -> u64 {
        fnv1a(self)
    }
}

impl Fold for i64 {
    fn fold(&self) -> u64 {
        *self as u64
    }
}

impl Fold for f64 {
    fn fold(&self) -> u64 {
        self.to_bits()
    }
}

pub(crate) fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Debug)]
pub struct Entry<V> {
    pub key: Bytes,
    pub value: V,
    next: Option<Box<Entry<V>>>,
}

#[derive(Debug)]
struct Table<V> {
    buckets: Vec<Option<Box<Entry<V>>>>,
    size: usize,
    mask: usize,
    used: usize,
}

impl<V> Table<V> {
    fn with_size(size: usize) -> Table<V> {
        let mut buckets = Vec::with_capacity(size);
        buckets.resize_with(size, || None);
        Table {
            buckets,
            size,
            mask: size - 1,
            used: 0,
        }
    }
}

#[derive(Debug)]
pub struct Dict<V> {
    tables: [Option<Table<V>>; 2],
    /// Next bucket of table 0 to migrate; `None` when not rehashing.
    rehash_index: Option<usize>,
    safe_iterators: Cell<u32>,
}

impl<V> Default for Dict<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Dict<V> {
    pub fn new() -> Dict<V> {
        Dict {
            tables: [None, None],
            rehash_index: None,
            safe_iterators: Cell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.tables
            .iter()
            .flatten()
            .map(|table| table.used)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_rehashing(&self) -> bool {
        self.rehash_index.is_some()
    }

    /// One unit of migration work: move every entry of the first non-empty
    /// bucket at the cursor into table 1, then advance. Safe iterators pin
    /// the cursor for their whole lifetime.
    pub fn rehash_step(&mut self) {
        if self.safe_iterators.get() > 0 {
            return;
        }
        let Some(cursor) = self.rehash_index else {
            return;
        };
        if self.tables[0].as_ref().map_or(0, |t| t.used) == 0 {
            self.tables[0] = self.tables[1].take();
            self.rehash_index = None;
            return;
        }

        let (front, back) = self.tables.split_at_mut(1);
        let (Some(table0), Some(table1)) = (front[0].as_mut(), back[0].as_mut()) else {
            return;
        };

        let mut cursor = cursor;
        while cursor < table0.size && table0.buckets[cursor].is_none() {
            cursor += 1;
        }
        if cursor >= table0.size {
            self.rehash_index = Some(cursor);
            return;
        }

        let mut entry = table0.buckets[cursor].take();
        while let Some(mut e) = entry {
            entry = e.next.take();
            let idx = (fnv1a(&e.key) as usize) & table1.mask;
            e.next = table1.buckets[idx].take();
            table1.buckets[idx] = Some(e);
            table0.used -= 1;
            table1.used += 1;
        }
        self.rehash_index = Some(cursor + 1);
    }

    fn expand_if_needed(&mut self) {
        if self.is_rehashing() {
            return;
        }
        match &self.tables[0] {
            None => self.tables[0] = Some(Table::with_size(INIT_SIZE)),
            Some(table0) => {
                if table0.used > table0.size && table0.used > table0.size * FORCE_RATIO {
                    self.tables[1] = Some(Table::with_size(table0.size * 2));
                    self.rehash_index = Some(0);
                }
            }
        }
    }

    fn find_in_tables(&self, key: &[u8]) -> Option<&Entry<V>> {
        let hash = fnv1a(key) as usize;
        for table in self.tables.iter().flatten() {
            let idx = hash & table.mask;
            let mut entry = table.buckets[idx].as_deref();
            while let Some(e) = entry {
                if e.key == key {
                    return Some(e);
                }
                entry = e.next.as_deref();
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    pub fn find(&mut self, key: &[u8]) -> Option<&Entry<V>> {
        self.rehash_step();
        self.find_in_tables(key)
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&V> {
        self.find(key).map(|entry| &entry.value)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut V> {
        self.rehash_step();
        let hash = fnv1a(key) as usize;
        let rehashing = self.is_rehashing();
        for table in self.tables.iter_mut().flatten() {
            let idx = hash & table.mask;
            let mut entry = table.buckets[idx].as_deref_mut();
            while let Some(e) = entry {
                if e.key == key {
                    return Some(&mut e.value);
                }
                entry = e.next.as_deref_mut();
            }
            if !rehashing {
                break;
            }
        }
        None
    }

    /// Peek without performing rehash work; persistence walks use this so a
    /// read-only pass stays read-only.
    pub fn peek(&self, key: &[u8]) -> Option<&V> {
        self.find_in_tables(key).map(|entry| &entry.value)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.find(key).is_some()
    }

    /// Insert a fresh key, refusing duplicates across both sub-tables. New
    /// keys land in table 1 while a rehash is in flight.
    pub fn add(&mut self, key: Bytes, value: V) -> Result<(), DictError> {
        self.rehash_step();
        self.expand_if_needed();
        if self.find_in_tables(&key).is_some() {
            return Err(DictError::KeyExists);
        }
        let hash = fnv1a(&key) as usize;
        let slot = usize::from(self.is_rehashing());
        let table = match self.tables[slot].as_mut() {
            Some(table) => table,
            None => unreachable!("target table exists after expand_if_needed"),
        };
        let idx = hash & table.mask;
        let entry = Box::new(Entry {
            key,
            value,
            next: table.buckets[idx].take(),
        });
        table.buckets[idx] = Some(entry);
        table.used += 1;
        Ok(())
    }

    /// Upsert: insert, or replace the value of an existing key.
    pub fn set(&mut self, key: Bytes, value: V) {
        if self.find(&key).is_some() {
            if let Some(slot) = self.get_mut(&key) {
                *slot = value;
            }
        } else {
            let _ = self.add(key, value);
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Result<V, DictError> {
        self.rehash_step();
        let hash = fnv1a(key) as usize;
        let rehashing = self.is_rehashing();
        for table in self.tables.iter_mut().flatten() {
            let idx = hash & table.mask;
            // Detach the chain and rebuild it without the victim. Order
            // within a bucket carries no meaning.
            let mut chain = table.buckets[idx].take();
            let mut kept: Option<Box<Entry<V>>> = None;
            let mut removed: Option<V> = None;
            while let Some(mut e) = chain {
                chain = e.next.take();
                if removed.is_none() && e.key == key {
                    removed = Some(e.value);
                } else {
                    e.next = kept;
                    kept = Some(e);
                }
            }
            table.buckets[idx] = kept;
            if let Some(value) = removed {
                table.used -= 1;
                return Ok(value);
            }
            if !rehashing {
                break;
            }
        }
        Err(DictError::NotFound)
    }

    /// An arbitrary live entry: pick a non-empty bucket uniformly (bounded
    /// retries), then pick uniformly within its chain.
    pub fn random_entry(&mut self) -> Option<(&Bytes, &V)> {
        self.rehash_step();
        let slot = if self.is_rehashing() {
            // Sample from the better-populated side of an in-flight rehash.
            let used0 = self.tables[0].as_ref().map_or(0, |t| t.used);
            let used1 = self.tables[1].as_ref().map_or(0, |t| t.used);
            usize::from(used1 > used0)
        } else {
            0
        };
        let table = self.tables[slot].as_ref()?;
        if table.used == 0 {
            return None;
        }

        let mut rng = rand::thread_rng();
        let mut idx = rng.gen_range(0..table.size);
        let mut budget = RANDOM_RETRY_BUDGET;
        while table.buckets[idx].is_none() && budget > 0 {
            idx = rng.gen_range(0..table.size);
            budget -= 1;
        }
        let head = table.buckets[idx].as_deref()?;

        let mut chain_len = 0;
        let mut entry = Some(head);
        while let Some(e) = entry {
            chain_len += 1;
            entry = e.next.as_deref();
        }
        let mut pick = rng.gen_range(0..chain_len);
        let mut entry = head;
        while pick > 0 {
            entry = entry.next.as_deref()?;
            pick -= 1;
        }
        Some((&entry.key, &entry.value))
    }

    pub fn iter(&self) -> Iter<'_, V> {
        Iter {
            dict: self,
            table: 0,
            bucket: 0,
            entry: None,
        }
    }
}

impl<V: Fold> Dict<V> {
    /// Deterministic summary of the whole structure: sub-table shapes plus a
    /// DJB2-style fold over every key and value.
    pub fn fingerprint(&self) -> u64 {
        let mut hash: u64 = 5381;
        let mut mix = |x: u64| {
            hash = hash.wrapping_shl(5).wrapping_add(hash).wrapping_add(x);
        };
        for table in self.tables.iter().flatten() {
            mix(table.size as u64);
            mix(table.used as u64);
            for bucket in &table.buckets {
                let mut entry = bucket.as_deref();
                while let Some(e) = entry {
                    mix(fnv1a(&e.key));
                    mix(e.value.fold());
                    entry = e.next.as_deref();
                }
            }
        }
        hash
    }

    /// Iterate while pinning the rehash cursor. Dropping the iterator checks
    /// the fingerprint and panics if the dict was mutated underneath it,
    /// which is a programming error rather than a runtime condition.
    pub fn safe_iter(&self) -> SafeIter<'_, V> {
        self.safe_iterators.set(self.safe_iterators.get() + 1);
        SafeIter {
            fingerprint: self.fingerprint(),
            inner: self.iter(),
        }
    }
}

pub struct Iter<'a, V> {
    dict: &'a Dict<V>,
    table: usize,
    bucket: usize,
    entry: Option<&'a Entry<V>>,
}

impl<'a, V> Iterator for Iter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(e) = self.entry {
                self.entry = e.next.as_deref();
                return Some((&e.key, &e.value));
            }
            // Advance to the next bucket, spilling into table 1 mid-rehash.
            let table = self.dict.tables[self.table].as_ref()?;
            if self.bucket >= table.size {
                if self.table == 0 && self.dict.is_rehashing() {
                    self.table = 1;
                    self.bucket = 0;
                    continue;
                }
                return None;
            }
            self.entry = table.buckets[self.bucket].as_deref();
            self.bucket += 1;
        }
    }
}

pub struct SafeIter<'a, V: Fold> {
    fingerprint: u64,
    inner: Iter<'a, V>,
}

impl<'a, V: Fold> Iterator for SafeIter<'a, V> {
    type Item = (&'a Bytes, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl<V: Fold> Drop for SafeIter<'_, V> {
    fn drop(&mut self) {
        let dict = self.inner.dict;
        dict.safe_iterators.set(dict.safe_iterators.get() - 1);
        if dict.fingerprint() != self.fingerprint {
            panic!("concurrent dictionary modification detected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn add_find_remove() {
        let mut dict: Dict<i64> = Dict::new();
        assert!(dict.get(b"a").is_none());

        dict.add(key("a"), 1).unwrap();
        dict.add(key("b"), 2).unwrap();
        assert_eq!(dict.get(b"a"), Some(&1));
        assert_eq!(dict.get(b"b"), Some(&2));
        assert_eq!(dict.len(), 2);

        assert_eq!(dict.add(key("a"), 9), Err(DictError::KeyExists));

        assert_eq!(dict.remove(b"a"), Ok(1));
        assert!(dict.get(b"a").is_none());
        assert_eq!(dict.remove(b"a"), Err(DictError::NotFound));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn set_replaces_value() {
        let mut dict: Dict<i64> = Dict::new();
        dict.set(key("a"), 1);
        dict.set(key("a"), 2);
        assert_eq!(dict.get(b"a"), Some(&2));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn survives_growth_and_rehash() {
        let mut dict: Dict<i64> = Dict::new();
        for i in 0..1000 {
            dict.add(key(&format!("key:{i}")), i).unwrap();
        }
        assert_eq!(dict.len(), 1000);
        for i in 0..1000 {
            assert_eq!(dict.get(format!("key:{i}").as_bytes()), Some(&i));
        }
        for i in (0..1000).step_by(2) {
            assert_eq!(dict.remove(format!("key:{i}").as_bytes()), Ok(i));
        }
        assert_eq!(dict.len(), 500);
        for i in (1..1000).step_by(2) {
            assert_eq!(dict.get(format!("key:{i}").as_bytes()), Some(&i));
        }
    }

    #[test]
    fn iterator_sees_every_entry_once() {
        let mut dict: Dict<i64> = Dict::new();
        for i in 0..100 {
            dict.add(key(&format!("k{i}")), i).unwrap();
        }
        let mut seen: Vec<i64> = dict.iter().map(|(_, v)| *v).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn random_entry_returns_live_entries() {
        let mut dict: Dict<i64> = Dict::new();
        assert!(dict.random_entry().is_none());
        for i in 0..50 {
            dict.add(key(&format!("k{i}")), i).unwrap();
        }
        for _ in 0..100 {
            let (k, v) = dict.random_entry().expect("dict is not empty");
            assert_eq!(k, &key(&format!("k{v}")));
        }
    }

    #[test]
    fn safe_iterator_fingerprint_is_stable() {
        let mut dict: Dict<i64> = Dict::new();
        for i in 0..100 {
            dict.add(key(&format!("k{i}")), i).unwrap();
        }
        let before = dict.fingerprint();
        let count = dict.safe_iter().count();
        assert_eq!(count, 100);
        assert_eq!(dict.fingerprint(), before);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut dict: Dict<i64> = Dict::new();
        dict.add(key("a"), 1).unwrap();
        let before = dict.fingerprint();
        dict.add(key("b"), 2).unwrap();
        assert_ne!(dict.fingerprint(), before);
        dict.remove(b"b").unwrap();
        assert_eq!(dict.fingerprint(), before);
    }
}
