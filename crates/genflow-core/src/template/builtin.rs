//! Stock templates shipped with the client.

use chrono::Utc;
use serde_json::{json, Value};

use super::schema::{
    ParameterType, PromptSlot, TemplateMetadata, TemplateParameter, WorkflowTemplate,
};
use crate::workflow::Workflow;

pub const SAMPLERS: &[&str] = &[
    "euler_a",
    "euler",
    "dpm_2",
    "dpm_2_ancestral",
    "heun",
    "dpm_pp_2s_ancestral",
];

pub const SCHEDULERS: &[&str] = &["normal", "karras", "exponential", "sgm_uniform"];

/// Character-generation template for the given art `style`.
///
/// Only `positive_prompt` is required; every other parameter has a default.
pub fn character_template(id: &str, style: &str) -> WorkflowTemplate {
    let base = Workflow::new(format!("{}_base", id))
        .with_node(
            "prompt",
            json!({
                "positive": "{{.positive_prompt}}",
                "negative": "{{.negative_prompt}}",
            }),
        )
        .with_node(
            "generation",
            json!({
                "width": "{{.width}}",
                "height": "{{.height}}",
                "steps": "{{.steps}}",
                "cfg_scale": "{{.cfg_scale}}",
                "sampler": "{{.sampler}}",
                "scheduler": "{{.scheduler}}",
                "seed": "{{.seed}}",
            }),
        );

    let parameters = [
        string_param("positive_prompt", "Positive prompt for generation", true, None),
        string_param(
            "negative_prompt",
            "Negative prompt for generation",
            false,
            Some("blurry, low quality, distorted"),
        ),
        string_param(
            "style_prompt",
            "Style phrase appended to the positive prompt",
            false,
            Some(&format!("{} style", style)),
        ),
        string_param("style_negative", "Style phrase appended to the negative prompt", false, None),
        numeric_param("width", ParameterType::Int, "Image width", json!(128), Some(64.0), Some(512.0)),
        numeric_param("height", ParameterType::Int, "Image height", json!(128), Some(64.0), Some(512.0)),
        numeric_param("steps", ParameterType::Int, "Generation steps", json!(20), Some(1.0), Some(100.0)),
        numeric_param("cfg_scale", ParameterType::Float, "CFG scale", json!(7.0), Some(1.0), Some(20.0)),
        enum_param("sampler", "Sampling method", "euler_a", SAMPLERS),
        enum_param("scheduler", "Scheduler type", "normal", SCHEDULERS),
        numeric_param("seed", ParameterType::Int, "Random seed (-1 for random)", json!(-1), Some(-1.0), None),
    ];

    WorkflowTemplate {
        id: id.to_string(),
        name: format!("Basic Character Generation ({})", style),
        description: format!("Basic template for generating {} style character animations", style),
        version: "1.0.0".to_string(),
        base_workflow: Some(base),
        parameters: parameters
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect(),
        prompt_slots: vec![
            PromptSlot {
                name: "positive_prompt".to_string(),
                node_path: "prompt".to_string(),
                field: "positive".to_string(),
                template: "{{.positive_prompt}}{{if .style_prompt}}, {{.style_prompt}}{{end}}".to_string(),
                description: "Main positive prompt".to_string(),
            },
            PromptSlot {
                name: "negative_prompt".to_string(),
                node_path: "prompt".to_string(),
                field: "negative".to_string(),
                template: "{{.negative_prompt}}{{if .style_negative}}, {{.style_negative}}{{end}}"
                    .to_string(),
                description: "Main negative prompt".to_string(),
            },
        ],
        output_nodes: vec!["generation".to_string()],
        metadata: TemplateMetadata {
            category: Some("character_generation".to_string()),
            tags: vec![style.to_string(), "basic".to_string(), "animation".to_string()],
            created_at: Some(Utc::now()),
            ..TemplateMetadata::default()
        },
    }
}

fn string_param(name: &str, description: &str, required: bool, default: Option<&str>) -> TemplateParameter {
    TemplateParameter {
        description: description.to_string(),
        required,
        default_value: default.map(|d| Value::String(d.to_string())),
        ..TemplateParameter::new(name, ParameterType::String)
    }
}

fn numeric_param(
    name: &str,
    param_type: ParameterType,
    description: &str,
    default: Value,
    min: Option<f64>,
    max: Option<f64>,
) -> TemplateParameter {
    TemplateParameter {
        description: description.to_string(),
        default_value: Some(default),
        min_value: min,
        max_value: max,
        ..TemplateParameter::new(name, param_type)
    }
}

fn enum_param(name: &str, description: &str, default: &str, values: &[&str]) -> TemplateParameter {
    TemplateParameter {
        description: description.to_string(),
        default_value: Some(Value::String(default.to_string())),
        enum_values: values.iter().map(|v| v.to_string()).collect(),
        ..TemplateParameter::new(name, ParameterType::Enum)
    }
}
