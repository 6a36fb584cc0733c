//! HTTP transport: submits workflows and queries the server queue.
//!
//! ```text
//! POST {server}/api/workflows   body: Workflow   → 200/201/202 {"id", "status"}
//! GET  {server}/api/queue                        → 200 {"pending", "running", "finished"}
//! ```
//!
//! Submission retries transient failures (status >= 500, timeouts, refused
//! connections) with linear backoff: the wait before attempt `n + 1` is
//! `retry_backoff × n`. Every request and every wait races the caller's
//! cancellation token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::progress::ProgressStream;
use crate::workflow::{Job, JobResult, QueueStatus, Workflow};

/// Largest response-body excerpt carried in an error message.
pub const ERROR_SNIPPET_LIMIT: usize = 512;

/// Operations against a workflow server.
///
/// [`HttpClient`] is the real implementation; the queue and job runner only
/// depend on this trait so tests can substitute doubles.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Submit a workflow graph and return the server's job handle.
    async fn submit_workflow(&self, workflow: &Workflow, cancel: &CancellationToken) -> Result<Job>;

    /// Current server queue counters.
    async fn get_queue_status(&self, cancel: &CancellationToken) -> Result<QueueStatus>;

    /// Open a progress stream for `job_id`.
    async fn monitor_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<ProgressStream>;

    /// Fetch a finished job's result with decoded artifacts.
    async fn get_result(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobResult>;
}

/// reqwest-backed client for the workflow server.
#[derive(Clone)]
pub struct HttpClient {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) http: reqwest::Client,
    base: Url,
}

impl HttpClient {
    /// Validate `config` and build a client. No network call is made.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let base = config.endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            config: Arc::new(config),
            http,
            base,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// `{server}/seg1/seg2/...` with every segment percent-encoded.
    pub(crate) fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Request builder for `url_for(segments)` carrying the bearer token if any.
    pub(crate) fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let builder = self.http.request(method, self.url_for(segments));
        match self.config.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Submit with retry. See the module docs for the retry policy.
    pub async fn submit_workflow(&self, workflow: &Workflow, cancel: &CancellationToken) -> Result<Job> {
        let label = workflow.label().to_string();
        if workflow.is_empty() {
            return Err(ClientError::Validation("workflow has no nodes".to_string())
                .context(format!("submit workflow {}", label)));
        }
        let body = serde_json::to_vec(workflow)
            .map_err(|e| ClientError::Decode(format!("marshal workflow: {}", e)))?;

        let attempts = self.config.retry_attempts + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                res = self.post_workflow(&body) => res,
            };

            let err = match outcome {
                Ok(job) => {
                    tracing::info!(
                        "[Transport] Workflow {} accepted as job {} (status: {}, attempt {}/{})",
                        label,
                        job.id,
                        job.status,
                        attempt,
                        attempts
                    );
                    return Ok(job);
                }
                Err(err) => err,
            };

            if err.is_cancelled() || !err.is_retryable() || attempt >= attempts {
                return Err(err.context(format!(
                    "submit workflow {} (attempt {}/{})",
                    label, attempt, attempts
                )));
            }

            let delay = self.config.retry_backoff * attempt;
            tracing::warn!(
                "[Transport] Submit of {} failed (attempt {}/{}): {}; retrying in {:?}",
                label,
                attempt,
                attempts,
                err,
                delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ClientError::Cancelled.context(format!("submit workflow {}", label)));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn post_workflow(&self, body: &[u8]) -> Result<Job> {
        let response = self
            .request(Method::POST, &["api", "workflows"])
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::ServerError {
                status: status.as_u16(),
            });
        }
        if !matches!(status, StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED) {
            return Err(unexpected_status(response).await);
        }

        let bytes = response.bytes().await?;
        let job: Job = serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(format!("decode job response: {}", e)))?;
        if job.id.is_empty() {
            return Err(ClientError::Decode("empty job id in response".to_string()));
        }
        Ok(job)
    }

    /// Single GET of the queue counters; never retried.
    pub async fn get_queue_status(&self, cancel: &CancellationToken) -> Result<QueueStatus> {
        let fetch = async {
            let response = self.request(Method::GET, &["api", "queue"]).send().await?;
            if response.status() != StatusCode::OK {
                return Err(unexpected_status(response).await);
            }
            let bytes = response.bytes().await?;
            serde_json::from_slice::<QueueStatus>(&bytes)
                .map_err(|e| ClientError::Decode(format!("decode queue status: {}", e)))
        };
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            res = fetch => res,
        };
        status.map_err(|e| e.context("get queue status"))
    }
}

#[async_trait]
impl WorkflowClient for HttpClient {
    async fn submit_workflow(&self, workflow: &Workflow, cancel: &CancellationToken) -> Result<Job> {
        HttpClient::submit_workflow(self, workflow, cancel).await
    }

    async fn get_queue_status(&self, cancel: &CancellationToken) -> Result<QueueStatus> {
        HttpClient::get_queue_status(self, cancel).await
    }

    async fn monitor_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<ProgressStream> {
        HttpClient::monitor_job(self, job_id, cancel).await
    }

    async fn get_result(&self, job_id: &str, cancel: &CancellationToken) -> Result<JobResult> {
        HttpClient::get_result(self, job_id, cancel).await
    }
}

/// Build an `UnexpectedStatus` error with a bounded body excerpt.
pub(crate) async fn unexpected_status(response: reqwest::Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response.bytes().await.map(|b| snippet(&b)).unwrap_or_default();
    ClientError::UnexpectedStatus { status, body }
}

pub(crate) fn snippet(bytes: &[u8]) -> String {
    let end = bytes.len().min(ERROR_SNIPPET_LIMIT);
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, retry_attempts: u32) -> HttpClient {
        HttpClient::new(ClientConfig {
            server_url: server.uri(),
            retry_attempts,
            retry_backoff: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    fn sample() -> Workflow {
        Workflow::new("wf1").with_node("n", json!({"class": "Sampler"}))
    }

    async fn request_count(server: &MockServer) -> usize {
        server.received_requests().await.unwrap_or_default().len()
    }

    #[tokio::test]
    async fn test_submit_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflows"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"id": "job123", "status": "queued"})))
            .mount(&server)
            .await;

        let job = client_for(&server, 1)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.id, "job123");
        assert_eq!(job.status, "queued");

        let requests = server.received_requests().await.unwrap();
        let sent: Workflow = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(sent, sample());
    }

    #[tokio::test]
    async fn test_submit_retries_server_error_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/workflows"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/workflows"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "job456", "status": "queued"})))
            .mount(&server)
            .await;

        let job = client_for(&server, 1)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.id, "job456");
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_submit_gives_up_after_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server, 3)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("server error"), "{}", err);
        assert_eq!(request_count(&server).await, 4);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .mount(&server)
            .await;

        let err = client_for(&server, 3)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unexpected status 400: bad request"), "{}", err);
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_empty_job_id_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "", "status": "queued"})))
            .mount(&server)
            .await;

        let err = client_for(&server, 2)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty job id"));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_malformed_response_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server, 2)
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ClientError::Decode(_)));
        assert_eq!(request_count(&server).await, 1);
    }

    #[tokio::test]
    async fn test_empty_workflow_rejected_without_request() {
        let server = MockServer::start().await;
        let err = client_for(&server, 0)
            .submit_workflow(&Workflow::new("empty"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err.root(), ClientError::Validation(_)));
        assert_eq!(request_count(&server).await, 0);
    }

    #[tokio::test]
    async fn test_bearer_token_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": "j", "status": "queued"})))
            .mount(&server)
            .await;

        let client = HttpClient::new(ClientConfig {
            server_url: server.uri(),
            api_key: Some("secret".to_string()),
            ..ClientConfig::default()
        })
        .unwrap();
        let job = client
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(job.id, "j");
    }

    #[tokio::test]
    async fn test_cancel_during_backoff_returns_promptly() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = HttpClient::new(ClientConfig {
            server_url: server.uri(),
            retry_attempts: 5,
            retry_backoff: Duration::from_secs(10),
            ..ClientConfig::default()
        })
        .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = client.submit_workflow(&sample(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "slow", "status": "queued"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let client = HttpClient::new(ClientConfig {
            server_url: server.uri(),
            retry_attempts: 1,
            retry_backoff: Duration::from_millis(10),
            timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        })
        .unwrap();

        let err = client
            .submit_workflow(&sample(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "{}", err);
        assert_eq!(request_count(&server).await, 2);
    }

    #[tokio::test]
    async fn test_queue_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/queue"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"pending": 3, "running": 1, "finished": 7})))
            .mount(&server)
            .await;

        let status = client_for(&server, 0)
            .get_queue_status(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, QueueStatus { pending: 3, running: 1, finished: 7 });
    }

    #[tokio::test]
    async fn test_queue_status_error_carries_bounded_snippet() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/queue"))
            .respond_with(ResponseTemplate::new(503).set_body_string("x".repeat(2000)))
            .mount(&server)
            .await;

        let err = client_for(&server, 3)
            .get_queue_status(&CancellationToken::new())
            .await
            .unwrap_err();
        match err.root() {
            ClientError::UnexpectedStatus { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body.len(), ERROR_SNIPPET_LIMIT);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(request_count(&server).await, 1);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        for server_url in ["", "not a url", "ftp://example.com"] {
            let err = HttpClient::new(ClientConfig {
                server_url: server_url.to_string(),
                ..ClientConfig::default()
            })
            .err()
            .unwrap();
            assert!(matches!(err, ClientError::Config(_)), "{:?} gave {:?}", server_url, err);
        }
    }

    #[test]
    fn test_url_for_encodes_segments_and_keeps_prefix() {
        let client = HttpClient::new(ClientConfig {
            server_url: "http://gen.local:8188/prefix/".to_string(),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(
            client.url_for(&["api", "results", "a/b?c#d"]).as_str(),
            "http://gen.local:8188/prefix/api/results/a%2Fb%3Fc%23d"
        );
        assert_eq!(client.url_for(&["api", "queue"]).path(), "/prefix/api/queue");
    }
}
