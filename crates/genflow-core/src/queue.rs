//! Client-side submission queue.
//!
//! Wraps a [`WorkflowClient`] with a concurrency limit so a burst of
//! submissions cannot overwhelm the server. The server keeps its own queue;
//! this one only throttles, retries and counts.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::transport::WorkflowClient;
use crate::workflow::{Job, Workflow};

/// Retries applied by the queue on top of the client's own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Accumulated submission counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    pub successes: u64,
    pub failures: u64,
    /// Time spent in the client, summed over completed submissions.
    pub total_latency: Duration,
    /// Submissions that obtained a slot and reached the client
    pub job_count: u64,
}

impl QueueMetrics {
    pub fn average_latency(&self) -> Duration {
        if self.job_count == 0 {
            return Duration::ZERO;
        }
        let avg = self.total_latency.as_nanos() / u128::from(self.job_count);
        Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX))
    }
}

/// Bounded-concurrency submitter. Cheap to clone; clones share slots and metrics.
#[derive(Clone)]
pub struct QueueManager {
    client: Arc<dyn WorkflowClient>,
    slots: Arc<Semaphore>,
    limit: usize,
    retry: RetryPolicy,
    metrics: Arc<Mutex<QueueMetrics>>,
}

impl QueueManager {
    /// `limit` below 1 is raised to 1.
    pub fn new(client: Arc<dyn WorkflowClient>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            client,
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            retry: RetryPolicy::default(),
            metrics: Arc::new(Mutex::new(QueueMetrics::default())),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn client(&self) -> &Arc<dyn WorkflowClient> {
        &self.client
    }

    /// Submit one workflow once a slot is free.
    ///
    /// Cancellation while waiting for a slot counts as a failure but not as
    /// a job. Any other error is retried up to `max_retries` times with a
    /// fixed delay.
    pub async fn submit(&self, workflow: &Workflow, cancel: &CancellationToken) -> Result<Job> {
        let context = format!("queue submit {}", workflow.label());
        if workflow.is_empty() {
            self.update(|m| m.failures += 1);
            return Err(ClientError::Validation("workflow has no nodes".to_string()).context(context));
        }

        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.update(|m| m.failures += 1);
                tracing::debug!("[Queue] {} cancelled while waiting for a slot", workflow.label());
                return Err(ClientError::Cancelled.context(context));
            }
            permit = self.slots.acquire() => permit
                .map_err(|_| ClientError::Cancelled.context(format!("{}: queue closed", context)))?,
        };

        let started = Instant::now();
        let mut retries = 0;
        let outcome = loop {
            let err = match self.client.submit_workflow(workflow, cancel).await {
                Ok(job) => break Ok(job),
                Err(err) => err,
            };
            if err.is_cancelled() || retries >= self.retry.max_retries {
                break Err(err);
            }
            retries += 1;
            tracing::warn!(
                "[Queue] Retry {}/{} for {} after: {}",
                retries,
                self.retry.max_retries,
                workflow.label(),
                err
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.retry.backoff) => {}
            }
        };

        let latency = started.elapsed();
        let ok = outcome.is_ok();
        self.update(|m| {
            m.job_count += 1;
            m.total_latency += latency;
            if ok {
                m.successes += 1;
            } else {
                m.failures += 1;
            }
        });
        outcome.map_err(|e| e.context(context))
    }

    /// Submit every workflow concurrently (bounded by the same slots) and
    /// return jobs in input order. The first failure cancels the rest.
    pub async fn submit_batch(&self, workflows: &[Workflow], cancel: &CancellationToken) -> Result<Vec<Job>> {
        if let Some(idx) = workflows.iter().position(Workflow::is_empty) {
            return Err(ClientError::Validation(format!("batch item {} has no nodes", idx)));
        }
        tracing::info!(
            "[Queue] Submitting batch of {} workflow(s) with limit {}",
            workflows.len(),
            self.limit
        );

        let batch_cancel = cancel.child_token();
        let mut tasks = JoinSet::new();
        for (idx, workflow) in workflows.iter().cloned().enumerate() {
            let queue = self.clone();
            let token = batch_cancel.clone();
            tasks.spawn(async move { (idx, queue.submit(&workflow, &token).await) });
        }

        let mut jobs: Vec<Option<Job>> = vec![None; workflows.len()];
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((idx, Ok(job))) => {
                    jobs[idx] = Some(job);
                    continue;
                }
                Ok((idx, Err(err))) => err.context(format!("batch item {}", idx)),
                Err(join_err) => ClientError::Transport {
                    message: format!("batch task failed: {}", join_err),
                    retryable: false,
                },
            };
            batch_cancel.cancel();
            tasks.abort_all();
            tracing::warn!("[Queue] Batch aborted: {}", failure);
            return Err(failure);
        }
        Ok(jobs.into_iter().flatten().collect())
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> QueueMetrics {
        match self.metrics.lock() {
            Ok(m) => *m,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut QueueMetrics)) {
        match self.metrics.lock() {
            Ok(mut m) => f(&mut m),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::json;

    use crate::progress::ProgressStream;
    use crate::workflow::{JobResult, QueueStatus};

    /// Client double: sleeps `delay` per submit, fails the first `fail_first`
    /// calls with a server error, and always fails workflows named "bad".
    #[derive(Default)]
    pub(crate) struct FakeClient {
        pub delay: Duration,
        pub fail_first: usize,
        pub calls: AtomicUsize,
        pub active: AtomicUsize,
        pub max_active: AtomicUsize,
    }

    #[async_trait]
    impl WorkflowClient for FakeClient {
        async fn submit_workflow(&self, workflow: &Workflow, cancel: &CancellationToken) -> Result<Job> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {
                    if workflow.id == "bad" {
                        Err(ClientError::UnexpectedStatus { status: 400, body: "bad".to_string() })
                    } else if call < self.fail_first {
                        Err(ClientError::ServerError { status: 503 })
                    } else {
                        Ok(Job { id: format!("job-{}", workflow.id), status: "queued".to_string() })
                    }
                }
            };
            self.active.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        async fn get_queue_status(&self, _cancel: &CancellationToken) -> Result<QueueStatus> {
            Ok(QueueStatus::default())
        }

        async fn monitor_job(&self, _job_id: &str, _cancel: &CancellationToken) -> Result<ProgressStream> {
            Err(ClientError::Validation("not implemented".to_string()))
        }

        async fn get_result(&self, _job_id: &str, _cancel: &CancellationToken) -> Result<JobResult> {
            Err(ClientError::Validation("not implemented".to_string()))
        }
    }

    fn wf(id: &str) -> Workflow {
        Workflow::new(id).with_node("n", json!({"v": 1}))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            backoff: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_batch_respects_limit_and_order() {
        let fake = Arc::new(FakeClient {
            delay: Duration::from_millis(30),
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake.clone(), 2);

        let started = Instant::now();
        let jobs = queue
            .submit_batch(&[wf("a"), wf("b"), wf("c")], &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["job-a", "job-b", "job-c"]);
        assert!(fake.max_active.load(Ordering::SeqCst) <= 2);
        assert!(started.elapsed() >= Duration::from_millis(60));

        let metrics = queue.metrics();
        assert_eq!(metrics.successes, 3);
        assert_eq!(metrics.job_count, 3);
        assert!(metrics.average_latency() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_zero_limit_becomes_one() {
        let queue = QueueManager::new(Arc::new(FakeClient::default()), 0);
        assert_eq!(queue.limit(), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let fake = Arc::new(FakeClient {
            fail_first: 2,
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake.clone(), 1).with_retry_policy(fast_retry());
        let job = queue.submit(&wf("x"), &CancellationToken::new()).await.unwrap();
        assert_eq!(job.id, "job-x");
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.metrics().successes, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let fake = Arc::new(FakeClient {
            fail_first: 10,
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake.clone(), 1).with_retry_policy(fast_retry());
        let err = queue.submit(&wf("x"), &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("server error"));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
        let metrics = queue.metrics();
        assert_eq!((metrics.failures, metrics.job_count), (1, 1));
    }

    #[tokio::test]
    async fn test_client_errors_are_retried_too() {
        let fake = Arc::new(FakeClient::default());
        let queue = QueueManager::new(fake.clone(), 1).with_retry_policy(fast_retry());
        let err = queue.submit(&wf("bad"), &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("unexpected status 400"));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
        assert_eq!(queue.metrics().failures, 1);
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_slot() {
        let fake = Arc::new(FakeClient {
            delay: Duration::from_millis(300),
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake.clone(), 1);

        let holder = queue.clone();
        let busy = tokio::spawn(async move { holder.submit(&wf("slow"), &CancellationToken::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = queue.submit(&wf("waiting"), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);

        assert!(busy.await.unwrap().is_ok());
        let metrics = queue.metrics();
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.successes, 1);
        assert_eq!(metrics.job_count, 1);
    }

    #[tokio::test]
    async fn test_batch_fails_on_first_error() {
        let fake = Arc::new(FakeClient {
            delay: Duration::from_millis(10),
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake, 3);
        let err = queue
            .submit_batch(&[wf("a"), wf("bad"), wf("c")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("batch item 1"));
        assert!(err.to_string().contains("unexpected status 400"));
    }

    #[tokio::test]
    async fn test_batch_rejects_empty_workflow_before_launch() {
        let fake = Arc::new(FakeClient::default());
        let queue = QueueManager::new(fake.clone(), 2);
        let err = queue
            .submit_batch(&[wf("a"), Workflow::new("empty")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_cancelled_by_caller() {
        let fake = Arc::new(FakeClient {
            delay: Duration::from_secs(5),
            ..FakeClient::default()
        });
        let queue = QueueManager::new(fake, 2);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = queue
            .submit_batch(&[wf("a"), wf("b"), wf("c")], &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
