//! End-to-end job runner: submit → monitor → fetch → save.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::queue::QueueManager;
use crate::result::save_artifacts;
use crate::transport::WorkflowClient;
use crate::workflow::{Job, JobProgress, JobResult, Workflow};

/// What a finished run produced.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: Job,
    /// Last status seen on the stream, or the result's status when the
    /// stream closed without a terminal frame.
    pub status: String,
    pub progress: f64,
    pub result: JobResult,
    /// Files written by [`save_artifacts`]; empty when no directory was given.
    pub saved: Vec<PathBuf>,
}

/// Drives one workflow through the queue, the progress stream and result
/// retrieval.
#[derive(Clone)]
pub struct JobRunner {
    queue: QueueManager,
    client: Arc<dyn WorkflowClient>,
}

impl JobRunner {
    pub fn new(queue: QueueManager) -> Self {
        let client = queue.client().clone();
        Self { queue, client }
    }

    /// Run `workflow` to completion, calling `on_progress` for every frame.
    ///
    /// Fails with [`ClientError::JobFailed`] unless the job ends in
    /// `completed`. Artifacts are saved into `out_dir` when given.
    pub async fn run<F>(
        &self,
        workflow: &Workflow,
        out_dir: Option<&Path>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<JobOutcome>
    where
        F: FnMut(&JobProgress) + Send,
    {
        let job = self.queue.submit(workflow, cancel).await?;
        tracing::info!("[Runner] Job {} submitted for {}", job.id, workflow.label());

        let mut stream = self.client.monitor_job(&job.id, cancel).await?;
        let mut last: Option<JobProgress> = None;
        while let Some(frame) = stream.next().await {
            on_progress(&frame);
            last = Some(frame);
        }

        let (mut status, progress) = match last {
            Some(JobProgress { err: Some(err), .. }) => return Err(err),
            Some(frame) if frame.is_terminal() => (frame.status, frame.progress),
            Some(frame) => {
                tracing::debug!("[Runner] Stream for {} closed at status {}", job.id, frame.status);
                (String::new(), frame.progress)
            }
            None => (String::new(), 0.0),
        };
        if !status.is_empty() && status != "completed" {
            return Err(ClientError::JobFailed {
                job_id: job.id.clone(),
                status,
            });
        }

        let result = self.client.get_result(&job.id, cancel).await?;
        if status.is_empty() {
            status = result.status.clone();
            if !status.is_empty() && status != "completed" {
                return Err(ClientError::JobFailed {
                    job_id: job.id.clone(),
                    status,
                });
            }
        }

        let saved = match out_dir {
            Some(dir) => save_artifacts(&result, dir).map_err(|e| e.context(format!("save artifacts for job {}", job.id)))?,
            None => Vec::new(),
        };
        tracing::info!(
            "[Runner] Job {} finished: {} artifact(s), {} saved",
            job.id,
            result.artifacts.len(),
            saved.len()
        );
        Ok(JobOutcome {
            job,
            status,
            progress,
            result,
            saved,
        })
    }
}
