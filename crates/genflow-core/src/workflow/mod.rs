//! Workflow model and template store.
//!
//! ```text
//! wf.json ──► TemplateStore::load ──► cache (Arc<Workflow>)
//!                    │
//!                    └── instantiate(params) ──► deep copy + {{KEY}} substitution
//! ```

pub mod model;
pub mod store;
pub(crate) mod visit;

pub use model::{
    is_terminal_status, Artifact, Job, JobProgress, JobResult, QueueStatus, Workflow,
    TERMINAL_STATUSES,
};
pub use store::TemplateStore;
