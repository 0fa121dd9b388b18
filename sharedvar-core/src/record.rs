use crate::error::{Result, VarError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_STAMP_MICROS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock unix seconds, strictly increasing within this process.
///
/// Two stamps taken in the same microsecond are pushed one microsecond apart
/// so that successive writes from one process always compare as ordered.
/// Nothing orders stamps taken by different processes beyond their clocks.
pub fn next_timestamp() -> f64 {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_STAMP_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.max(last + 1);
        match LAST_STAMP_MICROS.compare_exchange_weak(
            last,
            next,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next as f64 / 1_000_000.0,
            Err(actual) => last = actual,
        }
    }
}

/// Declared type of a shared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Int,
    Float,
    Str,
    Bool,
    #[default]
    Unspecified,
}

impl VariableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariableType::Int => "int",
            VariableType::Float => "float",
            VariableType::Str => "str",
            VariableType::Bool => "bool",
            VariableType::Unspecified => "unspecified",
        }
    }

    /// Whether `value` may be stored in a variable of this type.
    ///
    /// `int` takes JSON integers only, `float` takes non-integer numbers.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            VariableType::Int => value.is_i64() || value.is_u64(),
            VariableType::Float => value.is_f64(),
            VariableType::Str => value.is_string(),
            VariableType::Bool => value.is_boolean(),
            VariableType::Unspecified => true,
        }
    }
}

impl fmt::Display for VariableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariableType {
    type Err = VarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(VariableType::Int),
            "float" => Ok(VariableType::Float),
            "str" => Ok(VariableType::Str),
            "bool" => Ok(VariableType::Bool),
            "unspecified" | "" => Ok(VariableType::Unspecified),
            other => Err(VarError::Config(format!(
                "unsupported variable type '{}': expected int, float, str, bool or unspecified",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    Global,
    Local,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Local => "local",
        }
    }

    /// Store key of variable `name` owned by `parent_node_ref` in this scope.
    pub fn variable_key(&self, name: &str, parent_node_ref: &str) -> String {
        match self {
            Scope::Global => name.to_string(),
            Scope::Local => format!("{}{}", parent_node_ref, name),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = VarError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Scope::Global),
            "local" => Ok(Scope::Local),
            other => Err(VarError::Config(format!(
                "unsupported scope '{}': expected global or local",
                other
            ))),
        }
    }
}

/// The unit persisted under a variable's key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub timestamp: f64,
    pub variable_type: VariableType,
    pub descriptor: String,
    pub parent_node_ref: String,
    pub setter_ref: String,
    pub value: Value,
}

impl VariableRecord {
    /// Builds a record stamped with the current time.
    pub fn stamped(
        value: Value,
        variable_type: VariableType,
        descriptor: &str,
        parent_node_ref: &str,
        setter_ref: &str,
    ) -> Self {
        Self {
            timestamp: next_timestamp(),
            variable_type,
            descriptor: descriptor.to_string(),
            parent_node_ref: parent_node_ref.to_string(),
            setter_ref: setter_ref.to_string(),
            value,
        }
    }

    /// Strictly-greater timestamp comparison; ties are not newer.
    pub fn is_newer_than(&self, other: &VariableRecord) -> bool {
        self.timestamp > other.timestamp
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
