//! Schema types for parameterized workflow templates.
//!
//! A template file (JSON, or YAML for `.yaml`/`.yml`) wraps a base workflow
//! with typed parameters and prompt slots:
//!
//! ```yaml
//! id: "portrait"
//! name: "Portrait"
//! version: "1.0.0"
//! base_workflow:
//!   nodes:
//!     prompt: { positive: "", negative: "" }
//!     sampler: { steps: "{{.steps}}" }
//! parameters:
//!   subject: { type: string, required: true }
//!   steps:   { type: int, default_value: 20, min_value: 1, max_value: 100 }
//!   mood:    { type: enum, enum_values: ["calm", "angry"], default_value: "calm" }
//! prompt_slots:
//!   - name: "positive"
//!     node_path: "prompt"
//!     field: "positive"
//!     template: "a {{.mood}} portrait of {{.subject}}"
//! output_nodes: ["sampler"]
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::Workflow;

/// A workflow plus the parameters and prompt slots used to instantiate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    /// Template identifier
    #[serde(default)]
    pub id: String,

    /// Human-readable name
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub version: String,

    /// Graph copied on every instantiation; never mutated.
    #[serde(default)]
    pub base_workflow: Option<Workflow>,

    /// Declared parameters by name. The set is closed: unknown keys are
    /// rejected at instantiation.
    #[serde(default)]
    pub parameters: BTreeMap<String, TemplateParameter>,

    /// Prompt injection points, applied in order.
    #[serde(default)]
    pub prompt_slots: Vec<PromptSlot>,

    /// Node ids whose outputs matter to the caller
    #[serde(default)]
    pub output_nodes: Vec<String>,

    #[serde(default)]
    pub metadata: TemplateMetadata,
}

/// Allowed parameter types. Anything else is rejected when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Int,
    Float,
    Bool,
    Enum,
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParameterType::String => "string",
            ParameterType::Int => "int",
            ParameterType::Float => "float",
            ParameterType::Bool => "bool",
            ParameterType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// One typed template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateParameter {
    /// Filled from the map key when blank.
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub param_type: ParameterType,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub required: bool,

    /// Applied when the caller leaves the parameter unset; must pass the
    /// parameter's own rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Inclusive lower bound for numeric types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,

    /// Inclusive upper bound for numeric types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,

    /// Regex a string value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl TemplateParameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            default_value: None,
            min_value: None,
            max_value: None,
            enum_values: Vec::new(),
            validation: None,
        }
    }
}

/// Where a rendered prompt is written inside the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptSlot {
    #[serde(default)]
    pub name: String,

    /// Dot-separated path; the first segment names a node.
    #[serde(default)]
    pub node_path: String,

    /// Key set on the mapping at `node_path`
    #[serde(default)]
    pub field: String,

    /// Text template rendered against the merged parameters
    #[serde(default)]
    pub template: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    /// Server versions the template is known to work with
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compatible: Vec<String>,
}
