//! Remote register store backing every shared variable.
//!
//! The core only needs atomic single-key `exists`/`get`/`set`; versioning and
//! conflict resolution are layered on top by the register itself.

pub mod etcd;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for key-value store implementations
#[async_trait]
pub trait RegisterStore: Send + Sync {
    /// Whether a value is stored under `key`
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Raw bytes stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite the value stored under `key`
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// Type alias for dynamic store
pub type DynStore = dyn RegisterStore;

/// Flat key for backends without a path hierarchy. `segment` keeps stored
/// values and lock keys apart whatever the key itself contains.
pub(crate) fn namespaced(namespace: &str, segment: &str, key: &str) -> String {
    if namespace.is_empty() {
        format!("{}:{}", segment, key)
    } else {
        format!("{}:{}:{}", namespace, segment, key)
    }
}

pub(crate) const VARS_SEGMENT: &str = "vars";
pub(crate) const LOCKS_SEGMENT: &str = "locks";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_keys_never_collide_with_lock_keys() {
        for namespace in ["", "fleet"] {
            let value_key = namespaced(namespace, VARS_SEGMENT, "lock:speed");
            let lock_key = namespaced(namespace, LOCKS_SEGMENT, "speed");
            assert_ne!(value_key, lock_key);
            assert!(value_key.starts_with(&namespaced(namespace, VARS_SEGMENT, "")));
            assert!(lock_key.starts_with(&namespaced(namespace, LOCKS_SEGMENT, "")));
        }

        assert_eq!(namespaced("fleet", VARS_SEGMENT, "speed"), "fleet:vars:speed");
        assert_eq!(namespaced("", LOCKS_SEGMENT, "Comm_graph"), "locks:Comm_graph");
    }
}
