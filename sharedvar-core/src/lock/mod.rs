//! Named mutual exclusion used to serialise read-modify-write cycles on
//! shared keys.
//!
//! Acquisition is bounded by [`LockOptions::acquire_timeout`]; a lock that
//! cannot be taken in time surfaces as [`VarError::LockTimeout`] rather than
//! blocking forever.
//!
//! [`VarError::LockTimeout`]: crate::error::VarError::LockTimeout

pub mod etcd;
pub mod memory;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    /// Longest time `acquire` waits before giving up
    pub acquire_timeout: Duration,
    /// Backends with server-side locks expire a held lock after this long
    pub lease_ttl: Duration,
    /// Poll interval for backends without blocking acquisition
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(30),
            retry_interval: Duration::from_millis(20),
        }
    }
}

/// Trait for lock service implementations
#[async_trait]
pub trait LockService: Send + Sync {
    /// Block until the lock called `name` is held, or the acquire timeout passes
    async fn acquire(&self, name: &str) -> Result<LockGuard>;
}

/// Type alias for dynamic lock service
pub type DynLockService = dyn LockService;

/// Backend-specific handle on a held lock.
#[async_trait]
pub trait LockLease: Send {
    async fn release(self: Box<Self>) -> Result<()>;

    /// Release from a synchronous context, when the guard is dropped.
    fn release_detached(self: Box<Self>);
}

/// A held lock. Prefer [`LockGuard::release`]; dropping the guard releases
/// it in the background.
pub struct LockGuard {
    name: String,
    lease: Option<Box<dyn LockLease>>,
}

impl LockGuard {
    pub fn new(name: &str, lease: Box<dyn LockLease>) -> Self {
        Self {
            name: name.to_string(),
            lease: Some(lease),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn release(mut self) -> Result<()> {
        match self.lease.take() {
            Some(lease) => lease.release().await,
            None => Ok(()),
        }
    }

    /// Release the lock, then surface the first error of `outcome` or of the
    /// release itself.
    pub async fn release_after<T>(self, outcome: Result<T>) -> Result<T> {
        let released = self.release().await;
        let value = outcome?;
        released?;
        Ok(value)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(lease) = self.lease.take() {
            lease.release_detached();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("held", &self.lease.is_some())
            .finish()
    }
}
