//! Result retrieval and artifact persistence.
//!
//! ```text
//! GET {server}/api/results/{job_id}
//! {
//!   "job_id": "abc",
//!   "status": "completed",
//!   "artifacts": [{"filename": "image_0.png", "mime": "image/png", "b64": "..."}]
//! }
//! ```
//!
//! Fetching and saving are separate steps: [`HttpClient::get_result`]
//! decodes artifacts in memory, [`save_artifacts`] writes them to disk.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use reqwest::{Method, StatusCode};
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::transport::{unexpected_status, HttpClient};
use crate::workflow::JobResult;

/// Largest result body accepted; bigger bodies are rejected, not truncated.
pub const MAX_RESULT_SIZE: usize = 10 << 20;

impl HttpClient {
    /// Fetch a job's result and decode every artifact payload.
    pub async fn get_result(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobResult> {
        if job_id.is_empty() {
            return Err(ClientError::Validation("job id required".to_string()).context("get result"));
        }
        let fetch = async {
            let mut response = self
                .request(Method::GET, &["api", "results", job_id])
                .send()
                .await?;
            if response.status() != StatusCode::OK {
                return Err(unexpected_status(response).await);
            }
            if response.content_length().is_some_and(|len| len > MAX_RESULT_SIZE as u64) {
                return Err(too_large());
            }
            let mut body = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if body.len() + chunk.len() > MAX_RESULT_SIZE {
                    return Err(too_large());
                }
                body.extend_from_slice(&chunk);
            }
            decode_result(&body, job_id)
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            res = fetch => res,
        };
        let result = result.map_err(|e| e.context(format!("get result {}", job_id)))?;
        tracing::info!(
            "[Result] Job {} ({}) returned {} artifact(s)",
            result.job_id,
            result.status,
            result.artifacts.len()
        );
        Ok(result)
    }
}

fn too_large() -> ClientError {
    ClientError::PayloadTooLarge(format!("result body exceeds {} bytes", MAX_RESULT_SIZE))
}

/// Parse the envelope and decode artifacts; the base64 field is cleared.
pub(crate) fn decode_result(body: &[u8], job_id: &str) -> Result<JobResult> {
    let mut result: JobResult = serde_json::from_slice(body)
        .map_err(|e| ClientError::Decode(format!("decode result json: {}", e)))?;
    if result.job_id.is_empty() {
        result.job_id = job_id.to_string();
    }
    for (i, artifact) in result.artifacts.iter_mut().enumerate() {
        if artifact.filename.is_empty() {
            return Err(ClientError::Decode(format!("artifact {} missing filename", i)));
        }
        if artifact.b64.is_empty() {
            continue;
        }
        artifact.data = base64::engine::general_purpose::STANDARD
            .decode(artifact.b64.as_bytes())
            .map_err(|e| ClientError::Decode(format!("decode artifact {}: {}", artifact.filename, e)))?;
        artifact.b64.clear();
    }
    Ok(result)
}

/// Write every artifact into `dir`, creating it if needed.
///
/// Names are sanitized with [`sanitize_filename`]. Existing files are never
/// overwritten. Writing stops at the first failure; earlier files stay.
pub fn save_artifacts(result: &JobResult, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if dir.as_os_str().is_empty() {
        return Err(ClientError::Validation("output directory required".to_string()));
    }
    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => {
            return Err(ClientError::Io(format!("{} is not a directory", dir.display())));
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            std::fs::create_dir_all(dir)
                .map_err(|e| ClientError::Io(format!("create directory '{}': {}", dir.display(), e)))?;
        }
        Err(e) => return Err(ClientError::Io(format!("stat '{}': {}", dir.display(), e))),
    }

    let mut written = Vec::with_capacity(result.artifacts.len());
    for artifact in &result.artifacts {
        let name = sanitize_filename(&artifact.filename);
        if name.is_empty() {
            return Err(ClientError::Validation(format!(
                "empty sanitized filename for {:?}",
                artifact.filename
            )));
        }
        let path = dir.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ClientError::Conflict(format!("file exists: {}", name)),
                _ => ClientError::Io(format!("create {}: {}", path.display(), e)),
            })?;
        file.write_all(&artifact.data)
            .map_err(|e| ClientError::Io(format!("write {}: {}", path.display(), e)))?;
        tracing::debug!("[Result] Wrote {} ({} bytes)", path.display(), artifact.data.len());
        written.push(path);
    }
    tracing::info!(
        "[Result] Saved {} artifact(s) for job {} to {}",
        written.len(),
        result.job_id,
        dir.display()
    );
    Ok(written)
}

/// Drop any directory prefix (either separator), surrounding whitespace and
/// leading/trailing dots and spaces.
pub fn sanitize_filename(name: &str) -> &str {
    let name = name.trim();
    let base = match name.rfind(['/', '\\']) {
        Some(idx) => &name[idx + 1..],
        None => name,
    };
    base.trim_matches(|c| c == '.' || c == ' ')
}
