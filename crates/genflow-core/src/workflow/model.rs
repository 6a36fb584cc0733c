//! Wire and domain types shared by every component.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ClientError;

/// Statuses after which a job receives no further updates.
pub const TERMINAL_STATUSES: &[&str] = &["completed", "failed", "error", "cancelled"];

/// A graph-structured job description submitted to the server.
///
/// Node contents are arbitrary JSON; this crate never assumes a schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Client-side reference; may be empty.
    #[serde(default)]
    pub id: String,

    /// Node id → node definition. A null or missing mapping becomes empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub nodes: Map<String, Value>,

    /// Supplemental metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Workflow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Builder-style node insertion.
    pub fn with_node(mut self, node_id: impl Into<String>, node: Value) -> Self {
        self.nodes.insert(node_id.into(), node);
        self
    }

    /// A workflow without nodes cannot be submitted.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identifier for log and error messages.
    pub fn label(&self) -> &str {
        if self.id.is_empty() {
            "<unnamed>"
        } else {
            &self.id
        }
    }
}

/// Handle returned by the server after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: String,
}

/// Lightweight queue counters reported by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    #[serde(default)]
    pub pending: u64,
    #[serde(default)]
    pub running: u64,
    #[serde(default)]
    pub finished: u64,
}

/// Raw progress frame as sent over the stream.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ProgressFrame {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One progress update for a monitored job.
#[derive(Debug)]
pub struct JobProgress {
    pub job_id: String,
    pub status: String,
    /// Best-effort completion ratio in `[0, 1]`.
    pub progress: f64,
    pub message: Option<String>,
    pub err: Option<ClientError>,
}

impl JobProgress {
    pub(crate) fn from_frame(frame: ProgressFrame, fallback_job_id: &str) -> Self {
        let job_id = if frame.job_id.is_empty() {
            fallback_job_id.to_string()
        } else {
            frame.job_id
        };
        let err = frame
            .error
            .filter(|e| !e.is_empty())
            .map(|message| ClientError::JobError {
                job_id: job_id.clone(),
                message,
            });
        Self {
            job_id,
            status: frame.status,
            progress: frame.progress.clamp(0.0, 1.0),
            message: frame.message,
            err,
        }
    }

    /// Final frame describing a failure (decode error, transport error, cancellation).
    pub(crate) fn failure(job_id: &str, status: &str, err: ClientError) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: status.to_string(),
            progress: 0.0,
            message: None,
            err: Some(err),
        }
    }

    /// True for terminal statuses or when the frame carries an error.
    pub fn is_terminal(&self) -> bool {
        self.err.is_some() || is_terminal_status(&self.status)
    }
}

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// A completed job's payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "null_as_empty_vec")]
    pub artifacts: Vec<Artifact>,
}

fn null_as_empty_vec<'de, D>(deserializer: D) -> Result<Vec<Artifact>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Artifact>>::deserialize(deserializer)?.unwrap_or_default())
}

/// One generated output file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime: String,
    /// Decoded bytes; never serialized.
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Base64 wire form, cleared once decoded.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub b64: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_nodes_become_empty() {
        let wf: Workflow = serde_json::from_str(r#"{"id":"a","nodes":null}"#).unwrap();
        assert!(wf.nodes.is_empty());
        let wf: Workflow = serde_json::from_str(r#"{"id":"b"}"#).unwrap();
        assert!(wf.nodes.is_empty());
        assert!(wf.meta.is_none());
    }

    #[test]
    fn test_progress_frame_tagging_and_terminal() {
        let frame: ProgressFrame =
            serde_json::from_str(r#"{"status":"running","progress":0.5}"#).unwrap();
        let p = JobProgress::from_frame(frame, "job-1");
        assert_eq!(p.job_id, "job-1");
        assert!(!p.is_terminal());

        let frame: ProgressFrame =
            serde_json::from_str(r#"{"job_id":"x","status":"completed","progress":1}"#).unwrap();
        let p = JobProgress::from_frame(frame, "job-1");
        assert_eq!(p.job_id, "x");
        assert!(p.is_terminal());

        let frame: ProgressFrame =
            serde_json::from_str(r#"{"status":"running","error":"oom"}"#).unwrap();
        let p = JobProgress::from_frame(frame, "job-2");
        assert!(p.is_terminal());
        let err = p.err.unwrap();
        assert!(matches!(
            &err,
            ClientError::JobError { job_id, message } if job_id == "job-2" && message == "oom"
        ));
        assert_eq!(err.to_string(), "job job-2 reported error: oom");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_artifact_serialization_skips_data() {
        let artifact = Artifact {
            filename: "a.png".to_string(),
            mime: "image/png".to_string(),
            data: vec![1, 2, 3],
            b64: String::new(),
        };
        let json = serde_json::to_value(&artifact).unwrap();
        assert!(json.get("data").is_none());
        assert!(json.get("b64").is_none());
    }
}
