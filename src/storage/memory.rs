//! In-memory [`Storage`] backed by a `DashMap`.
//!
//! Suitable for tests and for hosts that rebuild state on startup. `list`
//! returns keys sorted so callers get a deterministic order.

use async_trait::async_trait;
use dashmap::DashMap;

use super::Storage;
use crate::Result;

/// In-memory key/value store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter_map(|e| e.key().strip_prefix(prefix).map(str::to_string))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_returns_value() {
        // GIVEN: a store with one entry
        let store = MemoryStorage::new();
        store.put("keys/a", b"one".to_vec()).await.unwrap();

        // WHEN: read back
        let found = store.get("keys/a").await.unwrap();

        // THEN: the bytes are returned
        assert_eq!(found.as_deref(), Some(&b"one"[..]));
    }

    #[tokio::test]
    async fn get_absent_key_is_none_not_error() {
        let store = MemoryStorage::new();
        assert!(store.get("keys/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_strips_prefix_and_sorts() {
        // GIVEN: keys under two prefixes
        let store = MemoryStorage::new();
        store.put("keys/b", Vec::new()).await.unwrap();
        store.put("keys/a", Vec::new()).await.unwrap();
        store.put("roles/r", Vec::new()).await.unwrap();

        // WHEN: list one prefix
        let keys = store.list("keys/").await.unwrap();

        // THEN: only that prefix, sorted, prefix removed
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn delete_absent_key_is_ok() {
        let store = MemoryStorage::new();
        store.put("config", Vec::new()).await.unwrap();
        store.delete("config").await.unwrap();
        store.delete("config").await.unwrap();
        assert!(store.is_empty());
    }
}
