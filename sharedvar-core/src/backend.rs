use crate::comm_graph::{CommGraphRegistry, COMM_GRAPH_KEY};
use crate::error::{Result, VarError};
use crate::lock::etcd::EtcdLockService;
use crate::lock::memory::MemoryLockService;
use crate::lock::redis::RedisLockService;
use crate::lock::{DynLockService, LockOptions};
use crate::store::etcd::EtcdStore;
use crate::store::memory::MemoryStore;
use crate::store::redis::RedisStore;
use crate::store::DynStore;
use std::sync::Arc;

/// The store, lock service and comm graph every shared variable talks to.
pub struct Backend {
    store: Arc<DynStore>,
    locks: Arc<DynLockService>,
    comm_graph: CommGraphRegistry,
}

impl Backend {
    pub fn new(store: Arc<DynStore>, locks: Arc<DynLockService>) -> Self {
        Self::with_comm_graph_key(store, locks, COMM_GRAPH_KEY)
    }

    pub fn with_comm_graph_key(
        store: Arc<DynStore>,
        locks: Arc<DynLockService>,
        comm_graph_key: &str,
    ) -> Self {
        let comm_graph = CommGraphRegistry::with_key(store.clone(), locks.clone(), comm_graph_key);

        Self {
            store,
            locks,
            comm_graph,
        }
    }

    /// Fresh in-process backend; handles only see each other through the
    /// same `Arc<Backend>`.
    pub fn in_memory(options: LockOptions) -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryLockService::new(options)),
        )
    }

    pub fn store(&self) -> &Arc<DynStore> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<DynLockService> {
        &self.locks
    }

    pub fn comm_graph(&self) -> &CommGraphRegistry {
        &self.comm_graph
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackendBuilder {
    backend: Option<String>,
    namespace: Option<String>,
    redis_url: Option<String>,
    etcd_endpoints: Option<Vec<String>>,
    lock_options: LockOptions,
    comm_graph_key: Option<String>,
}

impl BackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    pub fn etcd_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.etcd_endpoints = Some(endpoints);
        self
    }

    pub fn lock_options(mut self, options: LockOptions) -> Self {
        self.lock_options = options;
        self
    }

    pub fn comm_graph_key(mut self, key: impl Into<String>) -> Self {
        self.comm_graph_key = Some(key.into());
        self
    }

    fn resolve_namespace(&self) -> String {
        self.namespace
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_string()
    }

    fn resolve_backend(&self) -> Result<String> {
        let backend = self
            .backend
            .as_deref()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if backend.is_empty() {
            return Err(VarError::Config("backend cannot be empty".to_string()));
        }

        Ok(backend)
    }

    fn resolve_comm_graph_key(&self) -> Result<String> {
        let key = self
            .comm_graph_key
            .as_deref()
            .unwrap_or(COMM_GRAPH_KEY)
            .trim()
            .to_string();

        if key.is_empty() {
            return Err(VarError::Config(
                "comm graph key cannot be empty".to_string(),
            ));
        }

        Ok(key)
    }

    pub async fn build(&self) -> Result<Arc<Backend>> {
        let backend = self.resolve_backend()?;
        let namespace = self.resolve_namespace();
        let comm_graph_key = self.resolve_comm_graph_key()?;
        let options = self.lock_options.clone();

        let (store, locks): (Arc<DynStore>, Arc<DynLockService>) = match backend.as_str() {
            "memory" => (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryLockService::new(options)),
            ),
            "redis" => {
                let url = self.redis_url.as_deref().unwrap_or_default().trim();
                if url.is_empty() {
                    return Err(VarError::Config(
                        "redis url is required for redis backend".to_string(),
                    ));
                }

                let conn = crate::store::redis::connect(url).await?;
                (
                    Arc::new(RedisStore::with_connection(conn.clone(), &namespace)),
                    Arc::new(RedisLockService::with_connection(conn, &namespace, options)),
                )
            }
            "etcd" => {
                let endpoints = self.etcd_endpoints.clone().ok_or_else(|| {
                    VarError::Config("etcd endpoints are required for etcd backend".to_string())
                })?;

                if endpoints.is_empty() {
                    return Err(VarError::Config(
                        "etcd endpoints cannot be empty for etcd backend".to_string(),
                    ));
                }

                let client = etcd_client::Client::connect(&endpoints, None).await?;
                (
                    Arc::new(EtcdStore::with_client(client.clone(), &namespace)),
                    Arc::new(EtcdLockService::with_client(client, &namespace, options)),
                )
            }
            other => {
                return Err(VarError::Config(format!(
                    "unsupported backend '{}': expected memory, redis or etcd",
                    other
                )))
            }
        };

        tracing::info!(
            "shared variable backend ready: backend={} namespace='{}' comm_graph_key={}",
            backend,
            namespace,
            comm_graph_key
        );

        Ok(Arc::new(Backend::with_comm_graph_key(
            store,
            locks,
            &comm_graph_key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn builds_memory_backend() {
        let backend = BackendBuilder::new()
            .backend(" Memory ")
            .comm_graph_key("graph")
            .build()
            .await
            .unwrap();

        assert_eq!(backend.comm_graph().key(), "graph");
        assert!(!backend.store().exists("speed").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_missing_or_unknown_backend() {
        let err = BackendBuilder::new().build().await.err().unwrap();
        assert!(matches!(err, VarError::Config(_)));

        let err = BackendBuilder::new().backend("zookeeper").build().await.err().unwrap();
        assert!(err.to_string().contains("zookeeper"));
    }

    #[tokio::test]
    async fn remote_backends_need_their_endpoints() {
        let err = BackendBuilder::new().backend("redis").build().await.err().unwrap();
        assert!(err.to_string().contains("redis url"));

        let err = BackendBuilder::new()
            .backend("etcd")
            .etcd_endpoints(Vec::new())
            .build()
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("etcd endpoints"));
    }

    #[tokio::test]
    async fn rejects_blank_comm_graph_key() {
        let err = BackendBuilder::new()
            .backend("memory")
            .comm_graph_key("  ")
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, VarError::Config(_)));
    }
}
