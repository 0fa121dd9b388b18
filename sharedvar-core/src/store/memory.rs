use crate::error::Result;
use crate::store::RegisterStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-process store, shared by every handle holding the same `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl RegisterStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.contains_key(key))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_overwrites_and_get_reads_back() {
        let store = MemoryStore::new();
        assert!(store.is_empty().await);
        assert!(!store.exists("speed").await.unwrap());
        assert!(store.get("speed").await.unwrap().is_none());

        store.set("speed", b"10").await.unwrap();
        store.set("speed", b"20").await.unwrap();

        assert!(store.exists("speed").await.unwrap());
        assert_eq!(store.get("speed").await.unwrap().as_deref(), Some(&b"20"[..]));
        assert_eq!(store.len().await, 1);
    }
}
