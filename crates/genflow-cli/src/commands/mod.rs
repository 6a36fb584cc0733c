//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! genflow-core client. Commands return `Result<(), String>`; `main` prints
//! the error and exits non-zero.

pub mod monitor;
pub mod queue;
pub mod result;
pub mod submit;
pub mod template;

use std::collections::HashMap;

use genflow_core::config::default_config_path;
use genflow_core::{CancellationToken, ClientConfig, HttpClient};
use serde_json::Value;

/// Resolve configuration: defaults → config file → environment → flags.
///
/// An explicit `config_path` must exist; the default location is optional.
pub fn load_config(
    config_path: Option<&str>,
    server_url: Option<String>,
    api_key: Option<String>,
) -> Result<ClientConfig, String> {
    let mut config = match config_path {
        Some(path) => ClientConfig::from_file(path).map_err(|e| e.to_string())?,
        None => match default_config_path().filter(|p| p.is_file()) {
            Some(path) => {
                tracing::debug!("Using config file {}", path.display());
                ClientConfig::from_file(&path).map_err(|e| e.to_string())?
            }
            None => ClientConfig::default(),
        },
    };
    config = config.with_env_overrides();
    if let Some(url) = server_url {
        config.server_url = url;
    }
    if let Some(key) = api_key {
        config.api_key = Some(key);
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

pub fn build_client(config: ClientConfig) -> Result<HttpClient, String> {
    HttpClient::new(config).map_err(|e| e.to_string())
}

/// A token cancelled on Ctrl-C.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            trigger.cancel();
        }
    });
    token
}

/// Parse repeated `KEY=VALUE` flags into string parameters.
pub fn parse_string_params(pairs: &[String]) -> Result<HashMap<String, String>, String> {
    pairs
        .iter()
        .map(|pair| {
            split_pair(pair).map(|(k, v)| (k.to_string(), v.to_string()))
        })
        .collect()
}

/// Parse repeated `KEY=JSON` flags. Values that are not valid JSON are
/// taken as plain strings, so `--param name=knight` works unquoted.
pub fn parse_json_params(pairs: &[String]) -> Result<HashMap<String, Value>, String> {
    pairs
        .iter()
        .map(|pair| {
            let (key, raw) = split_pair(pair)?;
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

fn split_pair(pair: &str) -> Result<(&str, &str), String> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Ok((key.trim(), value)),
        _ => Err(format!("Expected KEY=VALUE, got '{}'", pair)),
    }
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let strings = parse_string_params(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(strings["A"], "1");
        assert_eq!(strings["B"], "x=y");
        assert!(parse_string_params(&["novalue".to_string()]).is_err());
        assert!(parse_string_params(&["=v".to_string()]).is_err());

        let values = parse_json_params(&[
            "steps=30".to_string(),
            "cfg=7.5".to_string(),
            "hd=true".to_string(),
            "name=knight".to_string(),
            "quoted=\"42\"".to_string(),
        ])
        .unwrap();
        assert_eq!(values["steps"], json!(30));
        assert_eq!(values["cfg"], json!(7.5));
        assert_eq!(values["hd"], json!(true));
        assert_eq!(values["name"], json!("knight"));
        assert_eq!(values["quoted"], json!("42"));
    }

    #[test]
    fn test_load_config_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server_url: \"http://file:1\"\nretry_attempts: 4\n").unwrap();

        let config = load_config(
            Some(path.to_str().unwrap()),
            Some("http://flag:2".to_string()),
            Some("k".to_string()),
        )
        .unwrap();
        assert_eq!(config.server_url, "http://flag:2");
        assert_eq!(config.retry_attempts, 4);
        assert_eq!(config.api_key.as_deref(), Some("k"));

        assert!(load_config(Some("/does/not/exist.yaml"), None, None).is_err());
        let bad_url = load_config(Some(path.to_str().unwrap()), Some("not a url".to_string()), None)
            .and_then(build_client);
        assert!(bad_url.is_err());
    }
}
