//! Shared variable register.
//!
//! A [`SharedVariable`] is one process's handle on a value stored under a
//! single key of the remote store. Reads pull the remote record into a local
//! cache through [`SharedVariable::spin`]; writes are either pushed at once or
//! parked in a pending slot that the next spin pushes if, and only if, it is
//! still newer than what the store holds (last writer wins on the record
//! timestamp).
//!
//! Locking always goes handle state first, then the variable's key lock.

use crate::backend::Backend;
use crate::comm_graph::{CommGraphEntry, EndpointKind};
use crate::error::{Result, VarError};
use crate::record::{Scope, VariableRecord, VariableType};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use ulid::Ulid;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableOptions {
    pub scope: Scope,
    pub variable_type: VariableType,
    pub descriptor: String,
    /// Overwrite the stored record even if the key already exists
    pub ignore_override: bool,
}

/// Which branch a [`SharedVariable::spin`] took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinOutcome {
    /// The pending record was newer than the store and was pushed
    Pushed,
    /// The pending record lost to a newer remote record and was dropped
    Discarded,
    /// Nothing was pending; the remote record was adopted
    Pulled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Written to the store immediately
    Written,
    /// Queued for the next spin
    Deferred,
    /// Value did not match the declared type and was dropped
    Rejected,
}

struct RegisterState {
    pending: Option<VariableRecord>,
    synced: VariableRecord,
}

pub struct SharedVariable {
    reference: String,
    name: String,
    scope: Scope,
    variable_type: VariableType,
    descriptor: String,
    parent_node_ref: String,
    backend: Arc<Backend>,
    state: Mutex<RegisterState>,
}

impl SharedVariable {
    /// Attach to (or create) the variable `name` and declare it in the comm
    /// graph.
    ///
    /// When the key already exists and `ignore_override` is unset the stored
    /// record is adopted and `value` is discarded.
    pub async fn declare(
        backend: Arc<Backend>,
        parent_node_ref: &str,
        name: &str,
        value: Value,
        options: VariableOptions,
    ) -> Result<Self> {
        let reference = Ulid::new().to_string();
        let key = options.scope.variable_key(name, parent_node_ref);
        let initial = VariableRecord::stamped(
            value,
            options.variable_type,
            &options.descriptor,
            parent_node_ref,
            &reference,
        );

        let variable = Self {
            reference,
            name: key,
            scope: options.scope,
            variable_type: options.variable_type,
            descriptor: options.descriptor,
            parent_node_ref: parent_node_ref.to_string(),
            backend,
            state: Mutex::new(RegisterState {
                pending: None,
                synced: initial.clone(),
            }),
        };

        let created = variable
            .initialise(&initial, options.ignore_override)
            .await?;
        variable.spin().await?;

        variable
            .backend
            .comm_graph()
            .declare(&variable.parent_node_ref, &variable.comm_graph_entry())
            .await?;

        tracing::info!(
            "declared shared variable {} ({}, {}) on node {}, {}",
            variable.name,
            variable.scope,
            variable.variable_type,
            variable.parent_node_ref,
            if created { "wrote initial value" } else { "attached to existing value" }
        );

        Ok(variable)
    }

    async fn initialise(&self, record: &VariableRecord, force: bool) -> Result<bool> {
        let payload = record.encode()?;
        let store = self.backend.store();

        let guard = self.backend.locks().acquire(&self.name).await?;
        let outcome: Result<bool> = async {
            if force || !store.exists(&self.name).await? {
                store.set(&self.name, &payload).await?;
                Ok(true)
            } else {
                Ok(false)
            }
        }
        .await;

        guard.release_after(outcome).await
    }

    async fn read_remote(&self) -> Result<VariableRecord> {
        let payload = self
            .backend
            .store()
            .get(&self.name)
            .await?
            .ok_or_else(|| VarError::NotFound(self.name.clone()))?;

        VariableRecord::decode(&payload)
    }

    async fn push_if_newer(&self, pending: &VariableRecord) -> Result<bool> {
        let remote = self.read_remote().await?;
        if !pending.is_newer_than(&remote) {
            return Ok(false);
        }

        self.backend
            .store()
            .set(&self.name, &pending.encode()?)
            .await?;
        Ok(true)
    }

    /// Reconcile the local cache with the store.
    ///
    /// A pending record is pushed when its timestamp is strictly greater than
    /// the stored one, otherwise it is dropped and the stored record pulled.
    /// On error the pending record is kept for the next attempt.
    pub async fn spin(&self) -> Result<SpinOutcome> {
        let mut state = self.state.lock().await;
        let mut discarded = false;

        if let Some(pending) = state.pending.clone() {
            let guard = self.backend.locks().acquire(&self.name).await?;
            let pushed = self.push_if_newer(&pending).await;
            let pushed = guard.release_after(pushed).await?;

            state.pending = None;
            if pushed {
                tracing::debug!(
                    "pushed deferred write to {} at {}",
                    self.name,
                    pending.timestamp
                );
                state.synced = pending;
                return Ok(SpinOutcome::Pushed);
            }

            tracing::debug!(
                "dropped deferred write to {} at {}, store holds a newer record",
                self.name,
                pending.timestamp
            );
            discarded = true;
        }

        let guard = self.backend.locks().acquire(&self.name).await?;
        let remote = self.read_remote().await;
        state.synced = guard.release_after(remote).await?;

        Ok(if discarded {
            SpinOutcome::Discarded
        } else {
            SpinOutcome::Pulled
        })
    }

    pub async fn get_value(&self, spin: bool) -> Result<Value> {
        Ok(self.get_raw_value(spin).await?.value)
    }

    pub async fn get_raw_value(&self, spin: bool) -> Result<VariableRecord> {
        if spin {
            self.spin().await?;
        }

        Ok(self.state.lock().await.synced.clone())
    }

    /// Write `value`, immediately when `instant`, else at the next spin.
    ///
    /// A value that does not match the declared type is logged and dropped;
    /// this is not an error.
    pub async fn set_value(&self, value: Value, instant: bool) -> Result<SetOutcome> {
        if !self.variable_type.accepts(&value) {
            tracing::warn!(
                "Trying to set a value of incorrect type to {} shared variable, expected {}, got {}",
                self.name,
                self.variable_type,
                json_kind(&value)
            );
            return Ok(SetOutcome::Rejected);
        }

        let record = VariableRecord::stamped(
            value,
            self.variable_type,
            &self.descriptor,
            &self.parent_node_ref,
            &self.reference,
        );

        let mut state = self.state.lock().await;

        if !instant {
            state.pending = Some(record);
            return Ok(SetOutcome::Deferred);
        }

        let payload = record.encode()?;
        let guard = self.backend.locks().acquire(&self.name).await?;
        let written = self.backend.store().set(&self.name, &payload).await;
        guard.release_after(written).await?;

        state.pending = None;
        state.synced = record;
        Ok(SetOutcome::Written)
    }

    /// Remove this handle's comm graph entry. The stored value stays.
    pub async fn destroy(&self) -> Result<bool> {
        let removed = self
            .backend
            .comm_graph()
            .undeclare(&self.parent_node_ref, &self.comm_graph_entry())
            .await?;

        tracing::info!(
            "destroyed shared variable endpoint {} ({}) on node {}",
            self.name,
            self.reference,
            self.parent_node_ref
        );

        Ok(removed)
    }

    pub fn comm_graph_entry(&self) -> CommGraphEntry {
        CommGraphEntry {
            reference: self.reference.clone(),
            kind: EndpointKind::SharedVariable,
            name: self.name.clone(),
            scope: self.scope,
            variable_type: self.variable_type,
            descriptor: self.descriptor.clone(),
        }
    }

    /// Store key, including the owner prefix for local variables.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn variable_type(&self) -> VariableType {
        self.variable_type
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn parent_node_ref(&self) -> &str {
        &self.parent_node_ref
    }

    pub async fn pending(&self) -> Option<VariableRecord> {
        self.state.lock().await.pending.clone()
    }
}

impl std::fmt::Debug for SharedVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedVariable")
            .field("reference", &self.reference)
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("variable_type", &self.variable_type)
            .field("parent_node_ref", &self.parent_node_ref)
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
