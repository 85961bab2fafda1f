//! In-memory keyspace.
//!
//! Each logical database is a lock-free ordered map from binary keys to
//! binary values, with an approximate memory counter that feeds the
//! `maxmemory` accounting consumed by the script OOM latch.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

/// A single logical database.
///
/// Mutating methods take `&self`: the underlying skip list supports
/// concurrent modification, and the server hands out shared references to
/// command handlers.
#[derive(Debug, Default)]
pub struct Database {
    map: SkipMap<Vec<u8>, Bytes>,
    mem_used: AtomicU64,
}

impl Database {
    /// Creates an empty database.
    pub fn new() -> Self {
        Self { map: SkipMap::new(), mem_used: AtomicU64::new(0) }
    }

    /// Returns the value stored at `key`, if any.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    /// Returns true if `key` exists.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Stores `value` at `key`, replacing any previous value.
    pub fn set(&self, key: &[u8], value: Bytes) {
        if let Some(old) = self.map.get(key) {
            self.mem_used.fetch_sub(entry_size(key, old.value()), Ordering::Relaxed);
        }
        self.mem_used.fetch_add(entry_size(key, &value), Ordering::Relaxed);
        self.map.insert(key.to_vec(), value);
    }

    /// Removes `key`. Returns true if it existed.
    pub fn remove(&self, key: &[u8]) -> bool {
        match self.map.remove(key) {
            Some(entry) => {
                self.mem_used.fetch_sub(entry_size(key, entry.value()), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Removes every key.
    pub fn clear(&self) {
        while self.map.pop_front().is_some() {}
        self.mem_used.store(0, Ordering::Relaxed);
    }

    /// Number of keys stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if the database holds no keys.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate memory used by keys and values, in bytes.
    pub fn mem_used(&self) -> u64 {
        self.mem_used.load(Ordering::Relaxed)
    }
}

fn entry_size(key: &[u8], value: &Bytes) -> u64 {
    (key.len() + value.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let db = Database::new();
        db.set(b"k", Bytes::from_static(b"v"));
        assert_eq!(db.get(b"k"), Some(Bytes::from_static(b"v")));
        assert!(db.contains(b"k"));

        assert!(db.remove(b"k"));
        assert!(!db.remove(b"k"));
        assert_eq!(db.get(b"k"), None);
    }

    #[test]
    fn test_overwrite_updates_memory() {
        let db = Database::new();
        db.set(b"key", Bytes::from_static(b"short"));
        let before = db.mem_used();
        db.set(b"key", Bytes::from_static(b"a considerably longer value"));
        assert!(db.mem_used() > before);

        db.remove(b"key");
        assert_eq!(db.mem_used(), 0);
    }

    #[test]
    fn test_clear() {
        let db = Database::new();
        for i in 0..100u32 {
            db.set(format!("key{}", i).as_bytes(), Bytes::from(i.to_string()));
        }
        assert_eq!(db.len(), 100);

        db.clear();
        assert!(db.is_empty());
        assert_eq!(db.mem_used(), 0);
    }
}
