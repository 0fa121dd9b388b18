use serde::{Deserialize, Serialize};
use sharedvar_core::{
    BackendBuilder, LockOptions, Result, VarError, VariableDeclaration, COMM_GRAPH_KEY,
};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node_ref: String,
    pub backend: BackendConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default = "default_comm_graph_key")]
    pub comm_graph_key: String,
    /// Declared by `run` at startup
    #[serde(default)]
    pub variables: Vec<VariableDeclaration>,
    #[serde(default)]
    pub namespace_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    #[serde(default)]
    pub namespace: Option<String>,
    pub redis: Option<RedisConfig>,
    pub etcd: Option<EtcdConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Redis,
    Etcd,
}

impl BackendKind {
    fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::Etcd => "etcd",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            lease_ttl_ms: default_lease_ttl_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn to_options(&self) -> LockOptions {
        LockOptions {
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
        }
    }
}

fn default_comm_graph_key() -> String {
    COMM_GRAPH_KEY.to_string()
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_lease_ttl_ms() -> u64 {
    30_000
}

fn default_retry_interval_ms() -> u64 {
    20
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(
                ::config::Environment::with_prefix("SHAREDVAR")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| VarError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| VarError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.node_ref.trim().is_empty() {
            return Err(VarError::Config("node_ref cannot be empty".to_string()));
        }

        match self.backend.kind {
            BackendKind::Redis if self.backend.redis.is_none() => Err(VarError::Config(
                "backend.redis is required for the redis backend".to_string(),
            )),
            BackendKind::Etcd if self.backend.etcd.is_none() => Err(VarError::Config(
                "backend.etcd is required for the etcd backend".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn backend_builder(&self) -> BackendBuilder {
        let mut builder = BackendBuilder::new()
            .backend(self.backend.kind.as_str())
            .lock_options(self.locks.to_options())
            .comm_graph_key(self.comm_graph_key.clone());

        if let Some(namespace) = &self.backend.namespace {
            builder = builder.namespace(namespace.clone());
        }

        if let Some(redis) = &self.backend.redis {
            builder = builder.redis_url(redis.url.clone());
        }

        if let Some(etcd) = &self.backend.etcd {
            builder = builder.etcd_endpoints(etcd.endpoints.clone());
        }

        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharedvar_core::{Scope, VariableType};
    use std::io::Write;

    fn write_config(body: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sharedvar.yaml");
        let mut file = std::fs::File::create(&path).expect("create");
        file.write_all(body.as_bytes()).expect("write");
        (dir, path.to_string_lossy().to_string())
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let (_dir, path) = write_config(
            r#"
node_ref: robot-1
backend:
  kind: redis
  namespace: fleet
  redis:
    url: redis://127.0.0.1:6379
variables:
  - name: speed
    value: 10
    variable_type: int
  - name: mode
    value: idle
    scope: local
"#,
        );

        let cfg = Config::from_file(&path).expect("config");
        assert_eq!(cfg.node_ref, "robot-1");
        assert_eq!(cfg.backend.kind, BackendKind::Redis);
        assert_eq!(cfg.comm_graph_key, COMM_GRAPH_KEY);
        assert_eq!(cfg.locks.to_options(), LockOptions::default());
        assert_eq!(cfg.variables.len(), 2);
        assert_eq!(cfg.variables[0].variable_type, VariableType::Int);
        assert_eq!(cfg.variables[1].scope, Scope::Local);
        assert_eq!(cfg.variables[1].value, serde_json::json!("idle"));
    }

    #[test]
    fn lock_settings_override_defaults() {
        let (_dir, path) = write_config(
            r#"
node_ref: robot-1
comm_graph_key: graph
backend:
  kind: memory
locks:
  acquire_timeout_ms: 250
"#,
        );

        let cfg = Config::from_file(&path).expect("config");
        let options = cfg.locks.to_options();
        assert_eq!(options.acquire_timeout, Duration::from_millis(250));
        assert_eq!(options.lease_ttl, Duration::from_millis(30_000));
        assert_eq!(cfg.comm_graph_key, "graph");
    }

    #[test]
    fn rejects_backend_without_its_section() {
        let (_dir, path) = write_config(
            r#"
node_ref: robot-1
backend:
  kind: etcd
"#,
        );

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("backend.etcd"));
    }

    #[test]
    fn rejects_blank_node_ref() {
        let (_dir, path) = write_config(
            r#"
node_ref: "  "
backend:
  kind: memory
"#,
        );

        assert!(Config::from_file(&path).is_err());
    }

    #[tokio::test]
    async fn builder_produces_memory_backend() {
        let (_dir, path) = write_config(
            r#"
node_ref: robot-1
comm_graph_key: graph
backend:
  kind: memory
"#,
        );

        let cfg = Config::from_file(&path).expect("config");
        let backend = cfg.backend_builder().build().await.expect("backend");
        assert_eq!(backend.comm_graph().key(), "graph");
    }
}
