//! Recursive helpers over JSON-like node graphs and `{{...}}` tokens.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};

/// Build a deep copy of `value`, passing every string through `rewrite`.
///
/// `rewrite` returns `None` to keep a string unchanged. Cancellation is
/// checked at every sequence and mapping so large graphs stop promptly.
pub(crate) fn rewrite_strings<F>(value: &Value, rewrite: &F, cancel: &CancellationToken) -> Result<Value>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => Ok(Value::String(rewrite(s).unwrap_or_else(|| s.clone()))),
        Value::Array(items) => {
            if cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            items
                .iter()
                .map(|item| rewrite_strings(item, rewrite, cancel))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array)
        }
        Value::Object(map) => rewrite_map(map, rewrite, cancel).map(Value::Object),
        other => Ok(other.clone()),
    }
}

pub(crate) fn rewrite_map<F>(
    map: &Map<String, Value>,
    rewrite: &F,
    cancel: &CancellationToken,
) -> Result<Map<String, Value>>
where
    F: Fn(&str) -> Option<String>,
{
    if cancel.is_cancelled() {
        return Err(ClientError::Cancelled);
    }
    let mut out = Map::with_capacity(map.len());
    for (key, value) in map {
        out.insert(key.clone(), rewrite_strings(value, rewrite, cancel)?);
    }
    Ok(out)
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*(\.?[A-Za-z0-9_.\-]+)\s*\}\}").expect("token pattern is valid")
    })
}

/// Replace every `{{key}}` token in one left-to-right pass.
///
/// `lookup` receives the key with surrounding whitespace removed; tokens it
/// returns `None` for are kept verbatim. Replacement text is not re-scanned.
pub(crate) fn replace_tokens<'a, F>(input: &'a str, lookup: F) -> Cow<'a, str>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("{{") {
        return Cow::Borrowed(input);
    }
    token_pattern().replace_all(input, |caps: &Captures| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    })
}

/// Collect the key of every `{{key}}` token in `input`.
pub(crate) fn find_tokens(input: &str) -> Vec<&str> {
    token_pattern()
        .captures_iter(input)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Visit every string in a value tree.
pub(crate) fn for_each_string<'a>(value: &'a Value, f: &mut dyn FnMut(&'a str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|item| for_each_string(item, f)),
        Value::Object(map) => map.values().for_each(|item| for_each_string(item, f)),
        _ => {}
    }
}

/// Rewrite every string in a value tree in place.
pub(crate) fn for_each_string_mut(value: &mut Value, f: &mut dyn FnMut(&mut String)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter_mut().for_each(|item| for_each_string_mut(item, f)),
        Value::Object(map) => map.values_mut().for_each(|item| for_each_string_mut(item, f)),
        _ => {}
    }
}
