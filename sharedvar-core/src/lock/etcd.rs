use crate::error::{Result, VarError};
use crate::lock::{LockGuard, LockLease, LockOptions, LockService};
use async_trait::async_trait;
use etcd_client::Client;
use std::time::{Duration, Instant};

/// Etcd locks, each bound to its own lease so a crashed holder expires.
pub struct EtcdLockService {
    client: Client,
    prefix: String,
    options: LockOptions,
}

impl EtcdLockService {
    pub async fn new(endpoints: &[String], namespace: &str, options: LockOptions) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self::with_client(client, namespace, options))
    }

    pub fn with_client(client: Client, namespace: &str, options: LockOptions) -> Self {
        let prefix = if namespace.is_empty() {
            "/sharedvar".to_string()
        } else {
            format!("/sharedvar/{}", namespace)
        };

        Self {
            client,
            prefix,
            options,
        }
    }

    fn lock_name(&self, name: &str) -> String {
        format!("{}/locks/{}", self.prefix, name)
    }
}

fn lock_timeout(name: &str, waited: Duration) -> VarError {
    VarError::LockTimeout {
        name: name.to_string(),
        waited_ms: waited.as_millis() as u64,
    }
}

struct EtcdLease {
    client: Client,
    key: Vec<u8>,
    lease_id: i64,
}

#[async_trait]
impl LockLease for EtcdLease {
    async fn release(self: Box<Self>) -> Result<()> {
        let EtcdLease {
            mut client,
            key,
            lease_id,
        } = *self;

        // Revoke even if unlock failed.
        let unlocked = client.unlock(key).await;
        let revoked = client.lease_revoke(lease_id).await;
        unlocked?;
        revoked?;

        Ok(())
    }

    fn release_detached(self: Box<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        handle.spawn(async move {
            if let Err(error) = self.release().await {
                tracing::warn!("background lock release failed: {}", error);
            }
        });
    }
}

#[async_trait]
impl LockService for EtcdLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let timeout = self.options.acquire_timeout;
        let started = Instant::now();
        let mut client = self.client.clone();
        let ttl_secs = self.options.lease_ttl.as_secs().max(1) as i64;

        let grant = client.lease_grant(ttl_secs, None);
        let lease_id = match tokio::time::timeout(timeout, grant).await {
            Ok(granted) => granted?.id(),
            Err(_) => return Err(lock_timeout(name, timeout)),
        };

        let request = client.lock(
            self.lock_name(name),
            Some(etcd_client::LockOptions::new().with_lease(lease_id)),
        );
        let remaining = timeout.saturating_sub(started.elapsed());

        match tokio::time::timeout(remaining, request).await {
            Ok(Ok(resp)) => {
                let key = resp.key().to_vec();
                Ok(LockGuard::new(
                    name,
                    Box::new(EtcdLease {
                        client: self.client.clone(),
                        key,
                        lease_id,
                    }),
                ))
            }
            Ok(Err(error)) => {
                let mut client = self.client.clone();
                let _ = client.lease_revoke(lease_id).await;
                Err(error.into())
            }
            Err(_) => {
                // Revoking the lease also drops a lock the server may still grant.
                let mut client = self.client.clone();
                let _ = client.lease_revoke(lease_id).await;
                Err(lock_timeout(name, timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_reports_the_whole_acquire_budget() {
        let err = lock_timeout("speed", Duration::from_millis(1500));
        match err {
            VarError::LockTimeout { name, waited_ms } => {
                assert_eq!(name, "speed");
                assert_eq!(waited_ms, 1500);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
