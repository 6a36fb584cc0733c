//! Text templates for prompt slots, rendered with minijinja.
//!
//! Slots are written with Go-style actions, which are converted to Jinja
//! syntax at parse time:
//!
//! ```text
//! {{.name}}                         → {{ v["name"] }}
//! {{.size.w}}                       → {{ v["size"]["w"] }}
//! {{if .flag}}...{{else}}...{{end}} → {% if v["flag"] %}...{% else %}...{% endif %}
//! {{/* comment */}}                 → (dropped)
//! ```
//!
//! Missing fields render as the empty string and are falsy.

use std::collections::HashMap;
use std::sync::OnceLock;

use minijinja::{Environment, UndefinedBehavior};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{ClientError, Result};

/// Name the data map is bound to inside the converted template.
const DATA_VAR: &str = "v";

#[derive(Debug, Clone, PartialEq)]
pub struct TextTemplate {
    source: String,
}

fn action_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{\{(.*?)\}\}").expect("action pattern is valid"))
}

fn field_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\.[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("field pattern is valid")
    })
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_keep_trailing_newline(true);
    env
}

impl TextTemplate {
    pub fn parse(source: &str) -> Result<Self> {
        let source = convert(source)?;
        environment()
            .template_from_str(&source)
            .map_err(|e| parse_error(&e.to_string()))?;
        Ok(Self { source })
    }

    pub fn render(&self, data: &HashMap<String, Value>) -> Result<String> {
        let data: Map<String, Value> = data
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), normalize(value)))
            .collect();
        let mut context = Map::new();
        context.insert(DATA_VAR.to_string(), Value::Object(data));

        let env = environment();
        let template = env
            .template_from_str(&self.source)
            .map_err(|e| parse_error(&e.to_string()))?;
        template
            .render(Value::Object(context))
            .map_err(|e| ClientError::Validation(format!("template render error: {}", e)))
    }
}

fn parse_error(message: &str) -> ClientError {
    ClientError::Validation(format!("template parse error: {}", message))
}

/// Rewrite Go-style actions into Jinja syntax, rejecting anything else.
fn convert(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len() + 16);
    // One entry per open {{if}}: whether its {{else}} was seen.
    let mut open_ifs: Vec<bool> = Vec::new();
    let mut last = 0;

    for caps in action_pattern().captures_iter(source) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_text(&mut out, &source[last..whole.start()])?;
        last = whole.end();

        let action = inner.as_str().trim();
        if let Some(comment) = action.strip_prefix("/*") {
            if !comment.ends_with("*/") {
                return Err(parse_error("unclosed comment"));
            }
        } else if action == "end" {
            if open_ifs.pop().is_none() {
                return Err(parse_error("unexpected {{end}}"));
            }
            out.push_str("{% endif %}");
        } else if action == "else" {
            match open_ifs.last_mut() {
                Some(seen_else) if !*seen_else => *seen_else = true,
                _ => return Err(parse_error("unexpected {{else}}")),
            }
            out.push_str("{% else %}");
        } else if let Some(cond) = action.strip_prefix("if ") {
            out.push_str(&format!("{{% if {} %}}", field_expr(cond.trim())?));
            open_ifs.push(false);
        } else if action.starts_with('.') {
            out.push_str(&format!("{{{{ {} }}}}", field_expr(action)?));
        } else if action.is_empty() {
            return Err(parse_error("missing value for command"));
        } else {
            return Err(parse_error(&format!("unsupported action \"{}\"", action)));
        }
    }
    push_text(&mut out, &source[last..])?;

    if !open_ifs.is_empty() {
        return Err(parse_error("unexpected EOF in {{if}}"));
    }
    Ok(out)
}

/// Literal text; anything Jinja would read as markup is wrapped in a raw block.
fn push_text(out: &mut String, text: &str) -> Result<()> {
    if text.contains("{{") {
        return Err(parse_error("unclosed action"));
    }
    if text.contains("{%") || text.contains("{#") || text.contains("%}") || text.contains("#}") {
        out.push_str("{% raw %}");
        out.push_str(text);
        out.push_str("{% endraw %}");
    } else {
        out.push_str(text);
    }
    Ok(())
}

/// `.a.b` → `v["a"]["b"]`
fn field_expr(expr: &str) -> Result<String> {
    if !field_pattern().is_match(expr) {
        return Err(parse_error(&format!("bad field name \"{}\"", expr)));
    }
    let mut out = DATA_VAR.to_string();
    for segment in expr[1..].split('.') {
        out.push_str(&format!("[\"{}\"]", segment));
    }
    Ok(out)
}

/// Integral floats become integers and null map entries are dropped, so
/// values print the way they read in a prompt (`7`, not `7.0` or `none`).
fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) if n.as_i64().is_none() && n.as_u64().is_none() => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Render a parameter value the way it appears inside a prompt or node string.
pub fn value_to_text(value: &Value) -> String {
    match normalize(value) {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_fields_and_conditionals() {
        let tmpl = TextTemplate::parse("{{.neg}}{{if .extra}}, {{.extra}}{{end}}").unwrap();
        assert_eq!(
            tmpl.render(&data(&[("neg", json!("blurry")), ("extra", json!("noisy"))])).unwrap(),
            "blurry, noisy"
        );
        assert_eq!(tmpl.render(&data(&[("neg", json!("blurry"))])).unwrap(), "blurry");
    }

    #[test]
    fn test_else_comment_and_nested_path() {
        let tmpl =
            TextTemplate::parse("{{/* note */}}{{if .hd}}{{.size.w}}px{{else}}small{{end}}").unwrap();
        assert_eq!(
            tmpl.render(&data(&[("hd", json!(true)), ("size", json!({"w": 512}))])).unwrap(),
            "512px"
        );
        assert_eq!(tmpl.render(&data(&[("hd", json!(0))])).unwrap(), "small");
    }

    #[test]
    fn test_value_rendering() {
        let tmpl = TextTemplate::parse("{{.a}} {{.b}} {{.c}} {{.missing}} {{.gone.deep}}|").unwrap();
        let out = tmpl
            .render(&data(&[
                ("a", json!(7.0)),
                ("b", json!(2.5)),
                ("c", json!(false)),
                ("gone", Value::Null),
            ]))
            .unwrap();
        assert_eq!(out, "7 2.5 false  |");
    }

    #[test]
    fn test_literal_jinja_markup_is_not_interpreted() {
        let tmpl = TextTemplate::parse("100% {# x #} {%if%} {{.a}}\n").unwrap();
        assert_eq!(
            tmpl.render(&data(&[("a", json!("ok"))])).unwrap(),
            "100% {# x #} {%if%} ok\n"
        );
    }

    #[test]
    fn test_parse_errors() {
        for source in [
            "{{.a",
            "{{end}}",
            "{{else}}",
            "{{if .a}}open",
            "{{if .a}}x{{else}}y{{else}}z{{end}}",
            "{{printf \"%d\" 3}}",
            "{{.bad-name}}",
            "{{}}",
            "{{/* open }}",
        ] {
            let err = TextTemplate::parse(source).unwrap_err();
            assert!(err.to_string().contains("template parse error"), "{} gave {}", source, err);
        }
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&json!(7.0)), "7");
        assert_eq!(value_to_text(&json!(-3)), "-3");
        assert_eq!(value_to_text(&json!(0.25)), "0.25");
        assert_eq!(value_to_text(&json!("s")), "s");
        assert_eq!(value_to_text(&Value::Null), "");
        assert_eq!(value_to_text(&json!(true)), "true");
    }
}
