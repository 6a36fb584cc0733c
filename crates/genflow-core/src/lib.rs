//! genflow core: client for a remote generative-workflow server.
//!
//! The server accepts graph-structured workflows and produces artifacts
//! asynchronously. This crate covers the client side:
//!
//! - `transport`: HTTP submission with retry, queue status
//! - `progress`: per-job WebSocket progress stream with cancellation
//! - `workflow`: workflow model and the `{{KEY}}` template store
//! - `template`: typed templates, prompt slots, `{{.NAME}}` substitution
//! - `queue`: bounded-concurrency submission, batches, metrics
//! - `result`: result retrieval and artifact persistence
//! - `runner`: submit → monitor → fetch → save in one call
//!
//! Every blocking operation takes a `CancellationToken`. The crate logs
//! through `tracing` and never installs a subscriber.

pub mod config;
pub mod error;
pub mod progress;
pub mod queue;
pub mod result;
pub mod runner;
pub mod template;
pub mod transport;
pub mod workflow;

// Convenience re-exports
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use progress::ProgressStream;
pub use queue::{QueueManager, QueueMetrics, RetryPolicy};
pub use result::{sanitize_filename, save_artifacts};
pub use runner::{JobOutcome, JobRunner};
pub use template::{TemplateManager, WorkflowTemplate};
pub use transport::{HttpClient, WorkflowClient};
pub use workflow::{Artifact, Job, JobProgress, JobResult, QueueStatus, TemplateStore, Workflow};

pub use tokio_util::sync::CancellationToken;
