use crate::error::{Result, VarError};
use crate::lock::{LockGuard, LockLease, LockOptions, LockService};
use crate::store::{namespaced, LOCKS_SEGMENT};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Script;
use std::time::Instant;
use ulid::Ulid;

// Only the holder's token may delete the lock key.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis locks: `SET key token NX PX ttl`, polled until the acquire timeout.
pub struct RedisLockService {
    conn: MultiplexedConnection,
    namespace: String,
    options: LockOptions,
}

impl RedisLockService {
    pub async fn new(url: &str, namespace: &str, options: LockOptions) -> Result<Self> {
        let conn = crate::store::redis::connect(url).await?;
        Ok(Self::with_connection(conn, namespace, options))
    }

    pub fn with_connection(
        conn: MultiplexedConnection,
        namespace: &str,
        options: LockOptions,
    ) -> Self {
        Self {
            conn,
            namespace: namespace.to_string(),
            options,
        }
    }

    fn lock_key(&self, name: &str) -> String {
        namespaced(&self.namespace, LOCKS_SEGMENT, name)
    }
}

struct RedisLease {
    conn: MultiplexedConnection,
    key: String,
    token: String,
}

#[async_trait]
impl LockLease for RedisLease {
    async fn release(self: Box<Self>) -> Result<()> {
        let RedisLease {
            mut conn,
            key,
            token,
        } = *self;

        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| VarError::Redis(format!("Failed to release lock '{}': {}", key, e)))?;

        if released == 0 {
            tracing::warn!("lock '{}' expired before it was released", key);
        }

        Ok(())
    }

    fn release_detached(self: Box<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // The key still expires after its TTL.
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
impl LockService for RedisLockService {
    async fn acquire(&self, name: &str) -> Result<LockGuard> {
        let key = self.lock_key(name);
        let token = Ulid::new().to_string();
        let ttl_ms = self.options.lease_ttl.as_millis() as u64;
        let started = Instant::now();

        loop {
            let mut conn = self.conn.clone();
            let acquired: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| VarError::Redis(format!("Failed to acquire lock '{}': {}", key, e)))?;

            if acquired.is_some() {
                return Ok(LockGuard::new(
                    name,
                    Box::new(RedisLease { conn, key, token }),
                ));
            }

            if started.elapsed() >= self.options.acquire_timeout {
                return Err(VarError::LockTimeout {
                    name: name.to_string(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            tokio::time::sleep(self.options.retry_interval).await;
        }
    }
}
