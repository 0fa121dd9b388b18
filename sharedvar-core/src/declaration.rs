use crate::backend::Backend;
use crate::error::{Result, VarError};
use crate::record::{Scope, VariableType};
use crate::variable::{SetOutcome, SharedVariable, VariableOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One variable a node wants to declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDeclaration {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub descriptor: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub variable_type: VariableType,
    #[serde(default)]
    pub ignore_override: bool,
}

impl VariableDeclaration {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            descriptor: String::new(),
            scope: Scope::Global,
            variable_type: VariableType::Unspecified,
            ignore_override: false,
        }
    }

    pub fn descriptor(mut self, descriptor: impl Into<String>) -> Self {
        self.descriptor = descriptor.into();
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn variable_type(mut self, variable_type: VariableType) -> Self {
        self.variable_type = variable_type;
        self
    }

    pub fn ignore_override(mut self, ignore_override: bool) -> Self {
        self.ignore_override = ignore_override;
        self
    }

    fn options(&self) -> VariableOptions {
        VariableOptions {
            scope: self.scope,
            variable_type: self.variable_type,
            descriptor: self.descriptor.clone(),
            ignore_override: self.ignore_override,
        }
    }
}

/// Shared variables declared by one node, deduplicated by store key.
pub struct SharedVariableModule {
    node_ref: String,
    backend: Arc<Backend>,
    variables: Mutex<Vec<Arc<SharedVariable>>>,
}

impl SharedVariableModule {
    pub fn new(node_ref: impl Into<String>, backend: Arc<Backend>) -> Self {
        Self {
            node_ref: node_ref.into(),
            backend,
            variables: Mutex::new(Vec::new()),
        }
    }

    pub fn node_ref(&self) -> &str {
        &self.node_ref
    }

    pub fn backend(&self) -> &Arc<Backend> {
        &self.backend
    }

    /// Return the node's handle for `declaration.name`, creating it if needed.
    ///
    /// An existing handle is returned untouched, unless `ignore_override` is
    /// set, in which case the new value is written through it first.
    pub async fn declare_variable(
        &self,
        declaration: VariableDeclaration,
    ) -> Result<Arc<SharedVariable>> {
        let key = declaration
            .scope
            .variable_key(&declaration.name, &self.node_ref);
        let mut variables = self.variables.lock().await;

        if let Some(existing) = variables.iter().find(|v| v.name() == key) {
            if declaration.ignore_override {
                existing.set_value(declaration.value, true).await?;
            }
            return Ok(existing.clone());
        }

        let options = declaration.options();
        let variable = Arc::new(
            SharedVariable::declare(
                self.backend.clone(),
                &self.node_ref,
                &declaration.name,
                declaration.value,
                options,
            )
            .await?,
        );

        variables.push(variable.clone());
        Ok(variable)
    }

    /// Declare each of `declarations` with `namespace` prefixed to its name.
    pub async fn declare_variables(
        &self,
        declarations: Vec<VariableDeclaration>,
        namespace: &str,
    ) -> Result<Vec<Arc<SharedVariable>>> {
        let mut declared = Vec::with_capacity(declarations.len());
        for mut declaration in declarations {
            declaration.name = format!("{}{}", namespace, declaration.name);
            declared.push(self.declare_variable(declaration).await?);
        }

        Ok(declared)
    }

    /// Drop the node's handle for `name` and remove its comm graph entry.
    ///
    /// The handle is only dropped once its entry is gone, so a failed call can
    /// be retried.
    pub async fn undeclare_variable(&self, name: &str, scope: Scope) -> Result<bool> {
        let key = scope.variable_key(name, &self.node_ref);
        let mut variables = self.variables.lock().await;

        let Some(index) = variables.iter().position(|v| v.name() == key) else {
            return Ok(false);
        };

        variables[index].destroy().await?;
        variables.remove(index);
        Ok(true)
    }

    pub async fn get_variable(&self, name: &str, scope: Scope) -> Option<Arc<SharedVariable>> {
        let key = scope.variable_key(name, &self.node_ref);
        self.variables
            .lock()
            .await
            .iter()
            .find(|v| v.name() == key)
            .cloned()
    }

    /// Declared handles among `names`, in the order given; unknown names are skipped.
    pub async fn get_variables(&self, names: &[&str], scope: Scope) -> Vec<Arc<SharedVariable>> {
        let mut found = Vec::with_capacity(names.len());
        for name in names {
            if let Some(variable) = self.get_variable(name, scope).await {
                found.push(variable);
            }
        }
        found
    }

    pub async fn set_variable(
        &self,
        name: &str,
        scope: Scope,
        value: Value,
        instant: bool,
    ) -> Result<SetOutcome> {
        let variable = self
            .get_variable(name, scope)
            .await
            .ok_or_else(|| VarError::NotFound(scope.variable_key(name, &self.node_ref)))?;

        variable.set_value(value, instant).await
    }

    pub async fn variables(&self) -> Vec<Arc<SharedVariable>> {
        self.variables.lock().await.clone()
    }

    /// Spin every declared handle, stopping at the first failure.
    pub async fn spin_all(&self) -> Result<()> {
        for variable in self.variables().await {
            variable.spin().await?;
        }
        Ok(())
    }

    /// Undeclare every handle of this node; returns how many were removed.
    ///
    /// Every handle is attempted. Handles that could not be undeclared stay
    /// declared and the first error is returned.
    pub async fn shutdown(&self) -> Result<usize> {
        let mut variables = self.variables.lock().await;
        let mut failed = Vec::new();
        let mut first_error = None;
        let mut count = 0;

        for variable in std::mem::take(&mut *variables) {
            match variable.destroy().await {
                Ok(_) => count += 1,
                Err(error) => {
                    tracing::warn!("failed to undeclare {}: {}", variable.name(), error);
                    first_error.get_or_insert(error);
                    failed.push(variable);
                }
            }
        }
        *variables = failed;

        if let Some(error) = first_error {
            return Err(error);
        }

        tracing::info!("node {} undeclared {} shared variables", self.node_ref, count);
        Ok(count)
    }
}
