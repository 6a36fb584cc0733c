//! Core error type for genflow.
//!
//! `ClientError` is used by every component (transport, progress stream,
//! templates, queue, result retrieval). Variants carry human-readable
//! messages; `Context` wraps an inner error with the operation name and the
//! identifier it concerned (job id, file path).

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Transport error: {message}")]
    Transport { message: String, retryable: bool },

    #[error("server error {status}")]
    ServerError { status: u16 },

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("job {job_id} finished with status {status}")]
    JobFailed { job_id: String, status: String },

    /// An error the server reported for a job on its progress stream.
    #[error("job {job_id} reported error: {message}")]
    JobError { job_id: String, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ClientError>,
    },
}

impl ClientError {
    /// Wrap this error with the operation name and identifier it concerned.
    pub fn context(self, context: impl Into<String>) -> Self {
        ClientError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping any `Context` layers.
    pub fn root(&self) -> &ClientError {
        match self {
            ClientError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Status >= 500 and transport failures that look like timeouts, refused
    /// connections or server errors are retryable. Client errors, decode and
    /// validation failures never are.
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            ClientError::ServerError { .. } => true,
            ClientError::Transport { message, retryable } => {
                *retryable || message_looks_transient(message)
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), ClientError::Cancelled)
    }
}

fn message_looks_transient(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["server error", "timeout", "timed out", "connection refused"]
        .iter()
        .any(|needle| lower.contains(needle))
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        let retryable = e.is_timeout() || e.is_connect();
        let message = if e.is_timeout() {
            format!("request timeout: {}", e)
        } else {
            e.to_string()
        };
        ClientError::Transport { message, retryable }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(e: serde_yaml::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
