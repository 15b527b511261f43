//! Command and result envelopes exchanged with adapters
//!
//! Every backend capability is invoked through the same pair of types:
//! a `ServiceCommand` goes in, a `ServiceResult` comes out. Adapters never
//! surface expected failures as errors; they return `success = false`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, schema-described operation an adapter can perform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: Some(schema),
        }
    }
}

/// The unit of work sent to an adapter. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCommand {
    pub tool: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
}

impl ServiceCommand {
    pub fn new(tool: impl Into<String>, args: Value) -> Self {
        Self {
            tool: tool.into(),
            args,
            project_name: None,
            role_id: None,
        }
    }

    pub fn for_project(
        tool: impl Into<String>,
        args: Value,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            args,
            project_name: Some(project_name.into()),
            role_id: None,
        }
    }
}

/// Adapter execution result; `success` selects which of `data`/`error` is
/// meaningful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ServiceResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }
}

/// Discovery payload describing one registered adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<Capability>,
}
