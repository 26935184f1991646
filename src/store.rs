//! Durable key-value persistence contract.
//!
//! The core never talks to a platform store directly; everything durable
//! (cart, pending orders, cache tiers) goes through [`DurableStore`]. Each
//! logical key is owned by exactly one component — `cart` by the cart store,
//! `pending-orders` by the outbox, `cache:<tier>` by the cache manager — and
//! no component writes another's key.
//!
//! Store failures are non-fatal by design: callers log a warning and keep
//! serving from memory for the rest of the session.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{CoreError, CoreResult};

/// Logical key for the persisted cart.
pub const KEY_CART: &str = "cart";
/// Logical key for the persisted outbox queue.
pub const KEY_PENDING_ORDERS: &str = "pending-orders";
/// Key prefix for per-tier cache namespaces.
pub const KEY_CACHE_PREFIX: &str = "cache:";

/// Generic durable key-value store collaborator.
///
/// Implementations are expected to be cheap and synchronous (or
/// fire-and-forget behind the scenes); the core calls `set` from inside
/// synchronous mutation paths.
pub trait DurableStore: Send + Sync {
    /// Read the bytes stored under `key`, or `None` when absent.
    fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &[u8]) -> CoreResult<()>;

    /// Remove `key`. Succeeds silently when the key does not exist.
    fn delete(&self, key: &str) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory reference implementation
// ---------------------------------------------------------------------------

/// Process-local [`DurableStore`] backed by a `HashMap`.
///
/// Used throughout the test suites and by embedders that have no platform
/// store available (state then lives only as long as the process).
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored. Test/diagnostic helper.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| CoreError::Persistence(format!("store lock poisoned: {e}")))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> CoreResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CoreError::Persistence(format!("store lock poisoned: {e}")))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> CoreResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| CoreError::Persistence(format!("store lock poisoned: {e}")))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("cart", b"{}").unwrap();
        assert_eq!(store.get("cart").unwrap(), Some(b"{}".to_vec()));
    }

    #[test]
    fn test_get_missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("absent").unwrap(), None);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", b"v").unwrap();
        store.delete("k").unwrap();
        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_set_replaces_previous_value() {
        let store = MemoryStore::new();
        store.set("k", b"old").unwrap();
        store.set("k", b"new").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(store.len(), 1);
    }
}
