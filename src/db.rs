//! The keyspace: a data dict plus an expiry index.
//!
//! Every key in `expire` also exists in `data`, and removing a key from
//! `data` drops its deadline. Expiry is enforced lazily on every lookup and
//! actively by a sampling cycle driven from the server cron.

use bytes::Bytes;

use crate::dict::Dict;
use crate::object::{Object, Robj};

/// Entries sampled per active expiry cycle.
pub const EXPIRE_CHECK_COUNT: usize = 100;

#[derive(Debug, Default)]
pub struct Db {
    pub data: Dict<Robj>,
    pub expire: Dict<i64>,
}

impl Db {
    pub fn new() -> Db {
        Db {
            data: Dict::new(),
            expire: Dict::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Evict the key if its deadline has passed. Returns true when the key
    /// was expired (and is now gone).
    pub fn expire_if_needed(&mut self, key: &[u8], now_ms: i64) -> bool {
        let Some(&when) = self.expire.get(key) else {
            return false;
        };
        if when > now_ms {
            return false;
        }
        let _ = self.expire.remove(key);
        let _ = self.data.remove(key);
        true
    }

    pub fn lookup_read(&mut self, key: &[u8], now_ms: i64) -> Option<Robj> {
        if self.expire_if_needed(key, now_ms) {
            return None;
        }
        self.data.get(key).cloned()
    }

    pub fn lookup_write(&mut self, key: &[u8], now_ms: i64) -> Option<Robj> {
        self.lookup_read(key, now_ms)
    }

    /// Plain value store; any previous expiry is cleared, as SET does.
    pub fn set(&mut self, key: Bytes, value: Robj) {
        let _ = self.expire.remove(&key);
        self.data.set(key, value);
    }

    pub fn remove(&mut self, key: &[u8]) -> bool {
        match self.data.remove(key) {
            Ok(_) => {
                let _ = self.expire.remove(key);
                true
            }
            Err(_) => false,
        }
    }

    pub fn set_expire(&mut self, key: Bytes, when_ms: i64) {
        self.expire.set(key, when_ms);
    }

    pub fn expire_time(&mut self, key: &[u8]) -> Option<i64> {
        self.expire.get(key).copied()
    }

    /// One active-expiry cycle: sample up to [`EXPIRE_CHECK_COUNT`] random
    /// deadlines and evict the overdue ones. Returns the eviction count.
    pub fn active_expire_cycle(&mut self, now_ms: i64) -> usize {
        let mut evicted = 0;
        for _ in 0..EXPIRE_CHECK_COUNT {
            let overdue = {
                let Some((key, &when)) = self.expire.random_entry() else {
                    break;
                };
                (when <= now_ms).then(|| key.clone())
            };
            if let Some(key) = overdue {
                let _ = self.data.remove(&key);
                let _ = self.expire.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }

    /// Rough payload accounting for INFO.
    pub fn memory_usage(&self) -> usize {
        let mut total = 0;
        for (key, obj) in self.data.iter() {
            total += key.len();
            total += match &**obj {
                Object::Str(_) => obj.str_bytes().map_or(0, |b| b.len()),
                Object::List(list) => list.borrow().iter().map(Bytes::len).sum(),
                Object::Set(set) => set.borrow().iter().map(|(m, _)| m.len()).sum(),
                Object::Hash(hash) => {
                    hash.borrow().iter().map(|(f, v)| f.len() + v.len()).sum()
                }
                Object::ZSet(zset) => {
                    let zset = zset.borrow();
                    let zsl = zset.skiplist();
                    let mut sum = 0;
                    let mut cursor = zsl.first_id();
                    while let Some(id) = cursor {
                        sum += zsl.entry(id).0.len() + std::mem::size_of::<f64>();
                        cursor = zsl.next_id(id);
                    }
                    sum
                }
            };
        }
        total
    }
}
