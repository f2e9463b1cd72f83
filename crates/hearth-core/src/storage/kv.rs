//! Key-value store abstraction.
//!
//! Aggregates are stored as serialized documents under string keys. The only
//! write primitive the engine relies on for correctness is
//! [`KeyValueStore::compare_and_swap`]: every state transition is a CAS from
//! the exact document the writer read.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::StoreError;

/// Storage backend for engine aggregates.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional write.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Write `new` only if the current value equals `expected`.
    ///
    /// `expected = None` means "only if the key is absent". Returns whether
    /// the write happened.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Returns whether a value was removed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// In-process store backed by an ordered map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock()?.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .lock()?
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock()?;
        if entries.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        entries.insert(key.to_string(), new.to_string());
        Ok(true)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.entries.lock()?;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.entries.lock()?.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cas_insert_if_absent() {
        let store = MemoryStore::new();
        assert!(store.compare_and_swap("a", None, "1").unwrap());
        assert!(!store.compare_and_swap("a", None, "2").unwrap());
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn cas_requires_exact_previous_value() {
        let store = MemoryStore::new();
        store.put("a", "1").unwrap();
        assert!(!store.compare_and_swap("a", Some("0"), "2").unwrap());
        assert!(store.compare_and_swap("a", Some("1"), "2").unwrap());
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn scan_prefix_stops_at_prefix_boundary() {
        let store = MemoryStore::new();
        store.put("ledger/alice/1", "x").unwrap();
        store.put("ledger/alice/2", "y").unwrap();
        store.put("ledger/alicia/1", "z").unwrap();
        store.put("level/alice", "w").unwrap();

        let rows = store.scan_prefix("ledger/alice/").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "ledger/alice/1");
    }

    #[test]
    fn delete_reports_presence() {
        let store = MemoryStore::new();
        store.put("k", "v").unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.is_empty());
    }
}
