//! Shared directory of declared endpoints, keyed by owning node.
//!
//! The whole directory lives under one store key. Every mutation is a
//! read-modify-write of that document under a lock named after the key, so
//! declarations from different nodes never lose each other's entries.
//! Entries of kinds this crate does not know about are carried through
//! untouched.

use crate::error::Result;
use crate::lock::DynLockService;
use crate::record::{Scope, VariableType};
use crate::store::DynStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const COMM_GRAPH_KEY: &str = "Comm_graph";

/// Raw directory document: owner node ref to its ordered endpoint entries.
pub type CommGraph = BTreeMap<String, Vec<Value>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    SharedVariable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommGraphEntry {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(rename = "type")]
    pub kind: EndpointKind,
    pub name: String,
    pub scope: Scope,
    pub variable_type: VariableType,
    pub descriptor: String,
}

pub struct CommGraphRegistry {
    store: Arc<DynStore>,
    locks: Arc<DynLockService>,
    key: String,
}

impl CommGraphRegistry {
    pub fn new(store: Arc<DynStore>, locks: Arc<DynLockService>) -> Self {
        Self::with_key(store, locks, COMM_GRAPH_KEY)
    }

    pub fn with_key(store: Arc<DynStore>, locks: Arc<DynLockService>, key: &str) -> Self {
        Self {
            store,
            locks,
            key: key.to_string(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Atomically apply `mutate` to the entry list of `owner_ref`.
    ///
    /// A missing document or owner list starts out empty. The document is
    /// only written back when the mutation changed it.
    pub async fn update<T, F>(&self, owner_ref: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Value>) -> T + Send,
        T: Send,
    {
        let guard = self.locks.acquire(&self.key).await?;
        let outcome = self.read_modify_write(owner_ref, mutate).await;
        guard.release_after(outcome).await
    }

    async fn read_modify_write<T, F>(&self, owner_ref: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Value>) -> T + Send,
    {
        let original = self.document().await?;
        let mut graph = original.clone();

        let entries = graph.entry(owner_ref.to_string()).or_default();
        let result = mutate(entries);

        if !original.contains_key(owner_ref) && graph[owner_ref].is_empty() {
            graph.remove(owner_ref);
        }

        if graph != original {
            let payload = serde_json::to_vec(&graph)?;
            self.store.set(&self.key, &payload).await?;
        }

        Ok(result)
    }

    /// Add `entry` under `owner_ref`, replacing an entry with the same ref.
    pub async fn declare(&self, owner_ref: &str, entry: &CommGraphEntry) -> Result<()> {
        let value = serde_json::to_value(entry)?;
        let reference = Value::String(entry.reference.clone());

        self.update(owner_ref, move |entries| {
            match entries
                .iter()
                .position(|existing| existing.get("ref") == Some(&reference))
            {
                Some(index) => entries[index] = value,
                None => entries.push(value),
            }
        })
        .await?;

        tracing::debug!("declared endpoint {} for node {}", entry.reference, owner_ref);
        Ok(())
    }

    /// Remove the entry structurally equal to `entry`.
    ///
    /// Returns `false` and leaves the document alone when there is no match.
    pub async fn undeclare(&self, owner_ref: &str, entry: &CommGraphEntry) -> Result<bool> {
        let value = serde_json::to_value(entry)?;

        let removed = self
            .update(owner_ref, move |entries| {
                match entries.iter().position(|existing| *existing == value) {
                    Some(index) => {
                        entries.remove(index);
                        true
                    }
                    None => false,
                }
            })
            .await?;

        if !removed {
            tracing::debug!(
                "endpoint {} was not declared for node {}, nothing to undeclare",
                entry.reference,
                owner_ref
            );
        }

        Ok(removed)
    }

    /// Current directory document, empty if nothing was ever declared.
    pub async fn document(&self) -> Result<CommGraph> {
        match self.store.get(&self.key).await? {
            Some(payload) => Ok(serde_json::from_slice(&payload)?),
            None => Ok(CommGraph::new()),
        }
    }

    /// Shared variable entries declared by `owner_ref`.
    pub async fn entries(&self, owner_ref: &str) -> Result<Vec<CommGraphEntry>> {
        let graph = self.document().await?;

        Ok(graph
            .get(owner_ref)
            .map(|entries| shared_variable_entries(entries).collect())
            .unwrap_or_default())
    }

    /// Every `(owner_ref, entry)` declaring the variable stored under `name`.
    pub async fn find_variable(&self, name: &str) -> Result<Vec<(String, CommGraphEntry)>> {
        let graph = self.document().await?;

        Ok(graph
            .iter()
            .flat_map(|(owner, entries)| {
                shared_variable_entries(entries)
                    .filter(|entry| entry.name == name)
                    .map(move |entry| (owner.clone(), entry))
            })
            .collect())
    }
}

fn shared_variable_entries(entries: &[Value]) -> impl Iterator<Item = CommGraphEntry> + '_ {
    entries
        .iter()
        .filter_map(|value| serde_json::from_value::<CommGraphEntry>(value.clone()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::memory::MemoryLockService;
    use crate::lock::LockOptions;
    use crate::store::memory::MemoryStore;
    use crate::store::RegisterStore;
    use serde_json::json;

    fn registry() -> (Arc<MemoryStore>, CommGraphRegistry) {
        let store = Arc::new(MemoryStore::new());
        let locks = Arc::new(MemoryLockService::new(LockOptions::default()));
        let registry = CommGraphRegistry::new(store.clone(), locks);
        (store, registry)
    }

    fn entry(reference: &str, name: &str) -> CommGraphEntry {
        CommGraphEntry {
            reference: reference.to_string(),
            kind: EndpointKind::SharedVariable,
            name: name.to_string(),
            scope: Scope::Global,
            variable_type: VariableType::Int,
            descriptor: String::new(),
        }
    }

    #[test]
    fn entry_wire_format() {
        let value = serde_json::to_value(entry("r1", "speed")).unwrap();
        assert_eq!(
            value,
            json!({
                "ref": "r1",
                "type": "shared_variable",
                "name": "speed",
                "scope": "global",
                "variable_type": "int",
                "descriptor": ""
            })
        );
    }

    #[tokio::test]
    async fn declare_then_undeclare_removes_entry() {
        let (_, registry) = registry();
        let speed = entry("r1", "speed");

        registry.declare("node-a", &speed).await.unwrap();
        assert_eq!(registry.entries("node-a").await.unwrap(), vec![speed.clone()]);

        assert!(registry.undeclare("node-a", &speed).await.unwrap());
        assert!(registry.entries("node-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn two_declarations_for_one_owner_both_appear_once() {
        let (_, registry) = registry();
        let speed = entry("r1", "speed");
        let heading = entry("r2", "heading");

        registry.declare("node-a", &speed).await.unwrap();
        registry.declare("node-a", &heading).await.unwrap();
        registry.declare("node-a", &speed).await.unwrap();

        let entries = registry.entries("node-a").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| **e == speed).count(), 1);
        assert_eq!(entries.iter().filter(|e| **e == heading).count(), 1);
    }

    #[tokio::test]
    async fn redeclaring_a_ref_replaces_its_entry() {
        let (_, registry) = registry();
        registry.declare("node-a", &entry("r1", "speed")).await.unwrap();

        let mut renamed = entry("r1", "speed");
        renamed.descriptor = "metres per second".to_string();
        registry.declare("node-a", &renamed).await.unwrap();

        assert_eq!(registry.entries("node-a").await.unwrap(), vec![renamed]);
    }

    #[tokio::test]
    async fn undeclare_without_exact_match_is_a_noop() {
        let (store, registry) = registry();
        let speed = entry("r1", "speed");
        registry.declare("node-a", &speed).await.unwrap();
        let before = store.get(COMM_GRAPH_KEY).await.unwrap();

        let mut different = speed.clone();
        different.variable_type = VariableType::Float;
        assert!(!registry.undeclare("node-a", &different).await.unwrap());
        assert!(!registry.undeclare("node-b", &speed).await.unwrap());

        assert_eq!(store.get(COMM_GRAPH_KEY).await.unwrap(), before);

        assert!(registry.undeclare("node-a", &speed).await.unwrap());
        assert!(!registry.undeclare("node-a", &speed).await.unwrap());
    }

    #[tokio::test]
    async fn undeclare_on_empty_store_writes_nothing() {
        let (store, registry) = registry();
        assert!(!registry.undeclare("node-a", &entry("r1", "speed")).await.unwrap());
        assert!(!store.exists(COMM_GRAPH_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn foreign_entries_survive_updates() {
        let (store, registry) = registry();
        let topic = json!({"ref": "t1", "type": "topic", "name": "/odom"});
        let document = json!({"node-a": [topic.clone()]});
        store
            .set(COMM_GRAPH_KEY, &serde_json::to_vec(&document).unwrap())
            .await
            .unwrap();

        let speed = entry("r1", "speed");
        registry.declare("node-a", &speed).await.unwrap();

        let graph = registry.document().await.unwrap();
        assert_eq!(graph["node-a"].len(), 2);
        assert_eq!(graph["node-a"][0], topic);
        assert_eq!(registry.entries("node-a").await.unwrap(), vec![speed]);
    }

    #[tokio::test]
    async fn find_variable_spans_owners() {
        let (_, registry) = registry();
        registry.declare("node-a", &entry("r1", "speed")).await.unwrap();
        registry.declare("node-b", &entry("r2", "speed")).await.unwrap();
        registry.declare("node-b", &entry("r3", "heading")).await.unwrap();

        let mut owners: Vec<String> = registry
            .find_variable("speed")
            .await
            .unwrap()
            .into_iter()
            .map(|(owner, _)| owner)
            .collect();
        owners.sort();
        assert_eq!(owners, vec!["node-a", "node-b"]);
    }

    #[tokio::test]
    async fn concurrent_declarations_are_not_lost() {
        let (_, registry) = registry();
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let owner = if i % 2 == 0 { "node-a" } else { "node-b" };
                    registry
                        .declare(owner, &entry(&format!("r{}", i), "speed"))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(registry.entries("node-a").await.unwrap().len(), 8);
        assert_eq!(registry.entries("node-b").await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn malformed_document_is_an_error() {
        let (store, registry) = registry();
        store.set(COMM_GRAPH_KEY, b"not json").await.unwrap();

        assert!(registry.declare("node-a", &entry("r1", "speed")).await.is_err());
    }
}
