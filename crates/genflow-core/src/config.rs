//! Client configuration: server address, credentials, timeouts and retry policy.
//!
//! A config file is plain YAML:
//!
//! ```yaml
//! server_url: "http://localhost:8188"
//! api_key: "secret"
//! timeout_ms: 30000
//! retry_attempts: 2
//! retry_backoff_ms: 500
//! stream_path: "/ws"
//! ```
//!
//! Missing keys fall back to [`ClientConfig::default`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

pub const ENV_SERVER_URL: &str = "GENFLOW_SERVER_URL";
pub const ENV_API_KEY: &str = "GENFLOW_API_KEY";

/// Runtime settings for talking to a workflow server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base address of the server (e.g. `http://localhost:8188`).
    pub server_url: String,

    /// Optional bearer token; sent as `Authorization: Bearer <key>` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    /// Retries for transient errors; total attempts are `retry_attempts + 1`.
    pub retry_attempts: u32,

    /// Base for linear backoff, multiplied by the attempt index.
    #[serde(rename = "retry_backoff_ms", with = "duration_ms")]
    pub retry_backoff: Duration,

    /// Path of the progress stream endpoint.
    pub stream_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8188".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            retry_attempts: 2,
            retry_backoff: Duration::from_millis(500),
            stream_path: "/ws".to_string(),
        }
    }
}

impl ClientConfig {
    /// Fail fast before any network call is attempted.
    ///
    /// Negative retry counts and backoffs are unrepresentable (`u32` and
    /// `Duration`), so only the URL and timeout need checking. URL syntax is
    /// checked by [`ClientConfig::endpoint`] when a client is built.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            return Err(ClientError::Config("server URL required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(ClientError::Config("timeout must be positive".to_string()));
        }
        Ok(())
    }

    /// The server URL parsed as an `http`/`https` base for request paths.
    pub fn endpoint(&self) -> Result<Url> {
        let parsed = Url::parse(self.server_url.trim())
            .map_err(|e| ClientError::Config(format!("invalid server URL '{}': {}", self.server_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "server URL must use http or https, got '{}'",
                parsed.scheme()
            )));
        }
        Ok(parsed)
    }

    /// Server URL without a trailing slash, ready for path concatenation.
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// The API key if one is set and non-empty.
    pub fn bearer_token(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }

    /// Parse a config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ClientError::Config(format!("Failed to parse config YAML: {}", e)))
    }

    /// Load a config from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Override fields from `GENFLOW_SERVER_URL` / `GENFLOW_API_KEY` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            if !url.is_empty() {
                self.server_url = url;
            }
        }
        if let Ok(key) = std::env::var(ENV_API_KEY) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        self
    }
}

/// Default config location: `<config dir>/genflow/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("genflow").join("config.yaml"))
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
