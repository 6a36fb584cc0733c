//! Template manager: validates typed templates and instantiates them into
//! submit-ready workflows.
//!
//! Instantiation order:
//!
//! 1. validate caller values (required, type, bounds, enum, pattern, no unknown keys)
//! 2. merge declared defaults for unset parameters
//! 3. deep-copy the base workflow
//! 4. render each prompt slot and write it at `node_path`/`field`
//! 5. replace `{{.NAME}}` tokens in every node string with the merged value

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde_json::{Map, Value};

use super::builtin;
use super::schema::{ParameterType, TemplateParameter, WorkflowTemplate};
use super::text::{value_to_text, TextTemplate};
use crate::error::{ClientError, Result};
use crate::workflow::store::is_yaml;
use crate::workflow::visit::{find_tokens, for_each_string, for_each_string_mut, replace_tokens};
use crate::workflow::Workflow;

/// Validates, instantiates and persists [`WorkflowTemplate`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TemplateManager;

impl TemplateManager {
    pub fn new() -> Self {
        Self
    }

    /// Structural validation of a template definition.
    pub fn validate_template(&self, template: &WorkflowTemplate) -> Result<()> {
        if template.id.is_empty() {
            return Err(invalid("template ID required"));
        }
        if template.name.is_empty() {
            return Err(invalid("template name required"));
        }
        match &template.base_workflow {
            None => return Err(invalid("base workflow required")),
            Some(base) if base.is_empty() => return Err(invalid("base workflow must have nodes")),
            Some(_) => {}
        }

        for (key, param) in &template.parameters {
            let mut param = param.clone();
            if param.name.is_empty() {
                param.name = key.clone();
            }
            validate_parameter(&param)
                .map_err(|e| invalid(&format!("invalid parameter {}: {}", key, e)))?;
        }

        for (i, slot) in template.prompt_slots.iter().enumerate() {
            let check = || -> std::result::Result<(), String> {
                if slot.name.is_empty() {
                    return Err("prompt slot name required".to_string());
                }
                if slot.node_path.is_empty() {
                    return Err("prompt slot node path required".to_string());
                }
                if slot.field.is_empty() {
                    return Err("prompt slot field required".to_string());
                }
                TextTemplate::parse(&slot.template)
                    .map(|_| ())
                    .map_err(|e| format!("invalid template syntax: {}", e))
            };
            check().map_err(|e| invalid(&format!("invalid prompt slot {}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Check caller-supplied values against the declared parameter set.
    pub fn validate_parameters(
        &self,
        template: &WorkflowTemplate,
        values: &HashMap<String, Value>,
    ) -> Result<()> {
        for (name, param) in &template.parameters {
            match values.get(name) {
                None if param.required => {
                    return Err(invalid(&format!("required parameter missing: {}", name)));
                }
                None => {}
                Some(value) => validate_value(param, value).map_err(|e| {
                    invalid(&format!("invalid value for parameter {}: {}", name, e))
                })?,
            }
        }

        let mut unknown: Vec<&String> = values
            .keys()
            .filter(|k| !template.parameters.contains_key(*k))
            .collect();
        unknown.sort();
        if let Some(name) = unknown.first() {
            return Err(invalid(&format!("unknown parameter: {}", name)));
        }
        Ok(())
    }

    /// Build a workflow from `template` and caller `values`.
    pub fn instantiate_template(
        &self,
        template: &WorkflowTemplate,
        values: &HashMap<String, Value>,
    ) -> Result<Workflow> {
        let context = format!("instantiate template {}", template.id);
        self.validate_parameters(template, values)
            .map_err(|e| e.context(context.clone()))?;
        let base = template
            .base_workflow
            .as_ref()
            .ok_or_else(|| invalid("base workflow required").context(context.clone()))?;

        let merged = merge_defaults(template, values);
        let mut workflow = base.clone();
        if workflow.id.is_empty() {
            workflow.id = template.id.clone();
        }

        for slot in &template.prompt_slots {
            let rendered = TextTemplate::parse(&slot.template)
                .and_then(|tmpl| tmpl.render(&merged))
                .map_err(|e| e.context(format!("{}: prompt slot {}", context, slot.name)))?;
            set_node_field(&mut workflow, &slot.node_path, &slot.field, Value::String(rendered))
                .map_err(|e| invalid(&format!("inject prompt {}: {}", slot.name, e)).context(context.clone()))?;
        }

        for node in workflow.nodes.values_mut() {
            for_each_string_mut(node, &mut |s: &mut String| {
                if !s.contains("{{") {
                    return;
                }
                let replaced = replace_tokens(s, |token| {
                    let name = token.trim().strip_prefix('.')?;
                    merged.get(name).map(value_to_text)
                })
                .into_owned();
                *s = replaced;
            });
        }

        tracing::debug!(
            "[TemplateManager] Instantiated template {} with {} parameter(s)",
            template.id,
            merged.len()
        );
        Ok(workflow)
    }

    /// Read, parse and validate a template file.
    pub fn load_template(&self, path: impl AsRef<Path>) -> Result<WorkflowTemplate> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(invalid("template path required"));
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClientError::TemplateNotFound(path.display().to_string())
            } else {
                ClientError::Io(format!("read template '{}': {}", path.display(), e))
            }
        })?;
        let template: WorkflowTemplate = if is_yaml(path) {
            serde_yaml::from_str(&data)
                .map_err(|e| ClientError::Decode(format!("parse template YAML '{}': {}", path.display(), e)))?
        } else {
            serde_json::from_str(&data)
                .map_err(|e| ClientError::Decode(format!("parse template JSON '{}': {}", path.display(), e)))?
        };
        self.validate_template(&template)
            .map_err(|e| e.context(format!("invalid template '{}'", path.display())))?;
        Ok(template)
    }

    /// Validate and write `template` as pretty JSON (or YAML by extension),
    /// stamping `metadata.updated_at`.
    pub fn save_template(&self, template: &WorkflowTemplate, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(invalid("template path required"));
        }
        self.validate_template(template)
            .map_err(|e| e.context(format!("save template '{}'", path.display())))?;

        let mut stamped = template.clone();
        let now = chrono::Utc::now();
        stamped.metadata.created_at.get_or_insert(now);
        stamped.metadata.updated_at = Some(now);

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| {
                ClientError::Io(format!("create template directory '{}': {}", dir.display(), e))
            })?;
        }
        let data = if is_yaml(path) {
            serde_yaml::to_string(&stamped)?
        } else {
            serde_json::to_string_pretty(&stamped)?
        };
        std::fs::write(path, data)
            .map_err(|e| ClientError::Io(format!("write template '{}': {}", path.display(), e)))?;
        tracing::info!("[TemplateManager] Saved template {} to {}", template.id, path.display());
        Ok(())
    }

    /// Load every `*.json`, `*.yaml` and `*.yml` template directly inside
    /// `dir`, sorted by path. Invalid files are logged and skipped.
    pub fn list_templates(&self, dir: impl AsRef<Path>) -> Result<Vec<WorkflowTemplate>> {
        let dir = dir.as_ref();
        if dir.as_os_str().is_empty() {
            return Err(invalid("template directory required"));
        }
        if !dir.is_dir() {
            return Err(ClientError::TemplateNotFound(format!(
                "template directory '{}'",
                dir.display()
            )));
        }

        let escaped = glob::Pattern::escape(&dir.to_string_lossy());
        let mut paths: Vec<PathBuf> = Vec::new();
        for ext in ["json", "yaml", "yml"] {
            let pattern = format!("{}/*.{}", escaped, ext);
            let entries = glob::glob(&pattern)
                .map_err(|e| ClientError::Io(format!("bad template pattern '{}': {}", pattern, e)))?;
            paths.extend(entries.filter_map(|entry| entry.ok()).filter(|p| p.is_file()));
        }
        paths.sort();

        let mut templates = Vec::new();
        for path in paths {
            match self.load_template(&path) {
                Ok(template) => templates.push(template),
                Err(e) => tracing::warn!("[TemplateManager] Skipping {}: {}", path.display(), e),
            }
        }
        Ok(templates)
    }

    /// `{{KEY}}` / `{{.KEY}}` tokens in the base workflow that no parameter
    /// declares, sorted and deduplicated.
    pub fn undeclared_placeholders(&self, template: &WorkflowTemplate) -> Vec<String> {
        let Some(base) = &template.base_workflow else {
            return Vec::new();
        };
        let mut missing = BTreeSet::new();
        let mut check = |s: &str| {
            for token in find_tokens(s) {
                let name = token.trim();
                let name = name.strip_prefix('.').unwrap_or(name);
                if !template.parameters.contains_key(name) {
                    missing.insert(name.to_string());
                }
            }
        };
        for node in base.nodes.values() {
            for_each_string(node, &mut check);
        }
        if let Some(meta) = &base.meta {
            for value in meta.values() {
                for_each_string(value, &mut check);
            }
        }
        missing.into_iter().collect()
    }

    /// The stock character-generation template.
    pub fn builtin_template(&self, id: &str, style: &str) -> WorkflowTemplate {
        builtin::character_template(id, style)
    }
}

fn invalid(message: &str) -> ClientError {
    ClientError::Validation(message.to_string())
}

fn validate_parameter(param: &TemplateParameter) -> std::result::Result<(), String> {
    if param.param_type == ParameterType::Enum && param.enum_values.is_empty() {
        return Err("enum parameter must have enum_values".to_string());
    }
    if let (Some(min), Some(max)) = (param.min_value, param.max_value) {
        if min > max {
            return Err("min_value cannot be greater than max_value".to_string());
        }
    }
    if let Some(pattern) = &param.validation {
        Regex::new(pattern).map_err(|e| format!("invalid validation pattern: {}", e))?;
    }
    if let Some(default) = &param.default_value {
        validate_value(param, default).map_err(|e| format!("invalid default value: {}", e))?;
    }
    Ok(())
}

/// The runtime rule shared by caller values and declared defaults.
fn validate_value(param: &TemplateParameter, value: &Value) -> std::result::Result<(), String> {
    match param.param_type {
        ParameterType::String => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected string, got {}", kind(value)))?;
            if let Some(pattern) = &param.validation {
                let re = Regex::new(pattern).map_err(|e| format!("invalid validation pattern: {}", e))?;
                if !re.is_match(s) {
                    return Err(format!("value {:?} does not match pattern {}", s, pattern));
                }
            }
        }
        ParameterType::Int => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("expected int, got {}", kind(value)))?;
            if n.fract() != 0.0 {
                return Err(format!("expected int, got {}", n));
            }
            check_bounds(param, n)?;
        }
        ParameterType::Float => {
            let n = value
                .as_f64()
                .ok_or_else(|| format!("expected float, got {}", kind(value)))?;
            check_bounds(param, n)?;
        }
        ParameterType::Bool => {
            value
                .as_bool()
                .ok_or_else(|| format!("expected bool, got {}", kind(value)))?;
        }
        ParameterType::Enum => {
            let s = value
                .as_str()
                .ok_or_else(|| format!("expected string for enum, got {}", kind(value)))?;
            if !param.enum_values.iter().any(|v| v == s) {
                return Err(format!(
                    "invalid enum value {}, must be one of: {}",
                    s,
                    param.enum_values.join(", ")
                ));
            }
        }
    }
    Ok(())
}

fn check_bounds(param: &TemplateParameter, n: f64) -> std::result::Result<(), String> {
    if let Some(min) = param.min_value {
        if n < min {
            return Err(format!("value {} below minimum {}", n, min));
        }
    }
    if let Some(max) = param.max_value {
        if n > max {
            return Err(format!("value {} above maximum {}", n, max));
        }
    }
    Ok(())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn merge_defaults(template: &WorkflowTemplate, values: &HashMap<String, Value>) -> HashMap<String, Value> {
    let mut merged = values.clone();
    for (name, param) in &template.parameters {
        if let Some(default) = &param.default_value {
            merged.entry(name.clone()).or_insert_with(|| default.clone());
        }
    }
    merged
}

/// Set `field` on the mapping reached by `node_path`. The first segment must
/// be an existing node; missing deeper levels are created.
fn set_node_field(
    workflow: &mut Workflow,
    node_path: &str,
    field: &str,
    value: Value,
) -> std::result::Result<(), String> {
    let parts: Vec<&str> = node_path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(format!("invalid node path: {}", node_path));
    }
    let mut current = workflow
        .nodes
        .get_mut(parts[0])
        .ok_or_else(|| format!("node not found: {}", parts[0]))?;
    for (depth, part) in parts.iter().enumerate().skip(1) {
        let map = current
            .as_object_mut()
            .ok_or_else(|| format!("node {} is not a map", parts[..depth].join(".")))?;
        current = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    let map = current
        .as_object_mut()
        .ok_or_else(|| format!("node {} is not a map", node_path))?;
    map.insert(field.to_string(), value);
    Ok(())
}
