use crate::error::{Result, VarError};
use crate::lock::{LockGuard, LockLease, LockOptions, LockService};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process named locks. Only serialises callers sharing the same service.
#[derive(Default)]
pub struct MemoryLockService {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    options: LockOptions,
}

impl MemoryLockService {
    pub fn new(options: LockOptions) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            options,
        }
    }

    async fn named(&self, name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

struct MemoryLease {
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl LockLease for MemoryLease {
    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }

    fn release_detached(self: Box<Self>) {}
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let mutex = self.named(name).await;
        let timeout = self.options.acquire_timeout;

        let guard = tokio::time::timeout(timeout, mutex.lock_owned())
            .await
            .map_err(|_| VarError::LockTimeout {
                name: name.to_string(),
                waited_ms: timeout.as_millis() as u64,
            })?;

        Ok(LockGuard::new(name, Box::new(MemoryLease { _guard: guard })))
    }
}
