use crate::error::Result;
use crate::store::RegisterStore;
use async_trait::async_trait;
use etcd_client::{Client, GetOptions};

/// Etcd-based register store
pub struct EtcdStore {
    client: Client,
    prefix: String,
}

impl EtcdStore {
    pub async fn new(endpoints: &[String], namespace: &str) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;

        Ok(Self::with_client(client, namespace))
    }

    pub fn with_client(client: Client, namespace: &str) -> Self {
        let prefix = if namespace.is_empty() {
            "/sharedvar".to_string()
        } else {
            format!("/sharedvar/{}", namespace)
        };

        Self { client, prefix }
    }

    fn key(&self, key: &str) -> String {
        format!("{}/vars/{}", self.prefix, key)
    }
}

#[async_trait]
impl RegisterStore for EtcdStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let mut client = self.client.clone();
        let resp = client
            .get(self.key(key), Some(GetOptions::new().with_count_only()))
            .await?;

        Ok(resp.count() > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut client = self.client.clone();
        let resp = client.get(self.key(key), None).await?;

        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut client = self.client.clone();
        client.put(self.key(key), value.to_vec(), None).await?;

        Ok(())
    }
}
