//! Fixed-capacity latest-value table.
//!
//! Backs the QoS, metadata and discovery pollers. Writes are last-write-wins
//! per key; when the table is full the least recently updated entry is
//! replaced. Capacity is a const generic so nothing allocates after start-up.

use crate::error::{TpError, TpResult};
use heapless::Vec as FixedVec;
use std::fmt::Debug;

#[derive(Debug, Clone)]
struct Entry<K, V> {
    key: K,
    value: V,
    updated_ns: u64,
}

/// Bounded map from `K` to the latest `V`.
#[derive(Debug, Clone)]
pub struct LatestTable<K, V, const N: usize> {
    entries: FixedVec<Entry<K, V>, N>,
}

impl<K, V, const N: usize> Default for LatestTable<K, V, N> {
    fn default() -> Self {
        Self {
            entries: FixedVec::new(),
        }
    }
}

impl<K: Copy + PartialEq + Debug, V, const N: usize> LatestTable<K, V, N> {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the evicted key if any.
    pub fn upsert(&mut self, key: K, value: V, now_ns: u64) -> Option<K> {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) {
            entry.value = value;
            entry.updated_ns = now_ns;
            return None;
        }

        let entry = Entry {
            key,
            value,
            updated_ns: now_ns,
        };
        match self.entries.push(entry) {
            Ok(()) => None,
            Err(entry) => {
                let oldest = self
                    .entries
                    .iter_mut()
                    .min_by_key(|e| e.updated_ns)?;
                let evicted = oldest.key;
                *oldest = entry;
                Some(evicted)
            }
        }
    }

    /// Latest value for `key`.
    ///
    /// # Errors
    /// `NotFound` for an unknown key.
    pub fn get(&self, key: K) -> TpResult<&V> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| &e.value)
            .ok_or_else(|| TpError::NotFound {
                what: format!("{key:?}"),
            })
    }

    /// When `key` was last updated.
    pub fn updated_ns(&self, key: K) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.updated_ns)
    }

    /// Remove `key`, returning its value.
    pub fn remove(&mut self, key: K) -> Option<V> {
        let index = self.entries.iter().position(|e| e.key == key)?;
        Some(self.entries.swap_remove(index).value)
    }

    /// Entries in storage order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &V)> {
        self.entries.iter().map(|e| (e.key, &e.value))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn last_write_wins() {
        let mut t: LatestTable<u32, &str, 4> = LatestTable::new();
        t.upsert(1, "a", 10);
        t.upsert(1, "b", 20);
        assert_eq!(*t.get(1).unwrap(), "b");
        assert_eq!(t.updated_ns(1), Some(20));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn full_table_evicts_least_recently_updated() {
        let mut t: LatestTable<u32, u32, 2> = LatestTable::new();
        assert_eq!(t.upsert(1, 1, 10), None);
        assert_eq!(t.upsert(2, 2, 20), None);
        t.upsert(1, 11, 30);
        assert_eq!(t.upsert(3, 3, 40), Some(2));
        assert!(t.get(2).is_err());
        assert_eq!(*t.get(1).unwrap(), 11);
        assert_eq!(*t.get(3).unwrap(), 3);
    }

    #[test]
    fn unknown_key_is_not_found() {
        let t: LatestTable<(u32, u32), u8, 2> = LatestTable::new();
        assert_eq!(t.get((1, 2)).unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn remove_and_clear() {
        let mut t: LatestTable<u16, u8, 3> = LatestTable::new();
        t.upsert(1, 1, 0);
        t.upsert(2, 2, 0);
        assert_eq!(t.remove(1), Some(1));
        assert_eq!(t.remove(1), None);
        t.clear();
        assert!(t.is_empty());
    }
}
