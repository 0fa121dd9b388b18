use thiserror::Error;

pub type Result<T> = std::result::Result<T, VarError>;

#[derive(Error, Debug)]
pub enum VarError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Etcd error: {0}")]
    Etcd(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Timed out after {waited_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, waited_ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for VarError {
    fn from(err: redis::RedisError) -> Self {
        VarError::Redis(err.to_string())
    }
}

impl From<etcd_client::Error> for VarError {
    fn from(err: etcd_client::Error) -> Self {
        VarError::Etcd(err.to_string())
    }
}
