use crate::error::{Result, VarError};
use crate::store::{namespaced, RegisterStore, VARS_SEGMENT};
use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use tokio::sync::Mutex;

/// Redis-based register store
pub struct RedisStore {
    conn: Mutex<redis::aio::MultiplexedConnection>,
    namespace: String,
}

impl RedisStore {
    /// Connect to Redis and check the connection with a ping
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let conn = connect(url).await?;
        Ok(Self::with_connection(conn, namespace))
    }

    pub fn with_connection(conn: redis::aio::MultiplexedConnection, namespace: &str) -> Self {
        Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        }
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.namespace, VARS_SEGMENT, key)
    }
}

pub(crate) async fn connect(url: &str) -> Result<redis::aio::MultiplexedConnection> {
    let client = Client::open(url)
        .map_err(|e| VarError::Config(format!("Failed to connect to Redis: {}", e)))?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .map_err(|e| VarError::Config(format!("Failed to connect to Redis: {}", e)))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut conn)
        .await
        .map_err(|e| VarError::Config(format!("Redis ping failed: {}", e)))?;

    Ok(conn)
}

#[async_trait]
impl RegisterStore for RedisStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        let key = self.key(key);

        conn.exists(&key)
            .await
            .map_err(|e| VarError::Redis(format!("Failed to check key '{}': {}", key, e)))
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.lock().await;
        let key = self.key(key);

        conn.get(&key)
            .await
            .map_err(|e| VarError::Redis(format!("Failed to get key '{}': {}", key, e)))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let key = self.key(key);

        let _: () = conn
            .set(&key, value)
            .await
            .map_err(|e| VarError::Redis(format!("Failed to set key '{}': {}", key, e)))?;

        Ok(())
    }
}
