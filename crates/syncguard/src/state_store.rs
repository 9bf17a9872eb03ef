//! Minimal key/value state store for surviving process reloads
//!
//! The only datum persisted by this crate is the fallback-mode flag; the
//! trait exists so embedders can back it with whatever storage survives
//! their reload boundary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use syncguard_core::GuardResult;

/// Simplified state store interface
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a value by key
    async fn get(&self, key: &str) -> GuardResult<Option<Value>>;

    /// Store a value under a key, overwriting any previous value
    async fn put(&self, key: &str, value: Value) -> GuardResult<()>;

    /// Remove a key; removing an absent key is not an error
    async fn remove(&self, key: &str) -> GuardResult<()>;
}

/// In-memory state store
///
/// Does not survive a process reload; the default for tests and for
/// embedders that do not need the persisted fallback flag.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl InMemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> GuardResult<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> GuardResult<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> GuardResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.put("k", json!({"active": true})).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!({"active": true})));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);

        // Removing an absent key is fine
        store.remove("k").await.unwrap();
    }
}
