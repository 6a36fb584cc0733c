//! Template store: loads workflow files, caches them, and hands out
//! substituted deep copies.
//!
//! Files are JSON unless they end in `.yaml`/`.yml`:
//!
//! ```json
//! {
//!   "id": "portrait",
//!   "nodes": {
//!     "prompt": { "text": "A portrait of {{SUBJECT}}", "tags": ["{{STYLE}}"] }
//!   },
//!   "meta": { "owner": "{{OWNER}}" }
//! }
//! ```
//!
//! `instantiate` replaces `{{KEY}}` tokens in every string under `nodes` and
//! `meta`. Tokens without a value are left in place so callers can run
//! several passes.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::error::{ClientError, Result};
use crate::workflow::model::Workflow;
use crate::workflow::visit::{replace_tokens, rewrite_map};

/// Loads and instantiates workflow templates. Safe for concurrent use.
///
/// Each store owns its cache; two stores never share entries.
pub struct TemplateStore {
    /// Parsed templates keyed by path. Entries are never mutated after insert.
    cache: RwLock<HashMap<PathBuf, Arc<Workflow>>>,
    ids: IdClock,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ids: IdClock::default(),
        }
    }

    /// Load a workflow file, returning the cached copy after the first read.
    ///
    /// The returned value is shared with the cache; use [`instantiate`] for a
    /// private, mutable copy.
    ///
    /// [`instantiate`]: TemplateStore::instantiate
    pub async fn load(&self, path: impl AsRef<Path>, cancel: &CancellationToken) -> Result<Arc<Workflow>> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ClientError::Validation("template path required".to_string()));
        }
        let absolute = std::path::absolute(path)
            .map_err(|e| ClientError::Io(format!("resolve path '{}': {}", path.display(), e)))?;
        if let Some(hit) = self.cached(&absolute) {
            return Ok(hit);
        }

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let canonical = tokio::fs::canonicalize(&absolute)
            .await
            .map_err(|e| read_error(&absolute, e))?;
        if let Some(hit) = self.cached(&canonical) {
            self.insert(absolute, hit.clone());
            return Ok(hit);
        }

        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            read = tokio::fs::read(&canonical) => read.map_err(|e| read_error(&canonical, e))?,
        };
        let workflow = Arc::new(parse_workflow(&canonical, &data)?);

        tracing::debug!(
            "[TemplateStore] Loaded template '{}' ({} nodes)",
            canonical.display(),
            workflow.nodes.len()
        );

        let stored = self.insert(canonical, workflow);
        self.insert(absolute, stored.clone());
        Ok(stored)
    }

    /// Deep-copy the template at `path` and substitute `{{KEY}}` tokens.
    ///
    /// Workflows without an id get a synthesized `tmpl:<n>` id, unique per store.
    pub async fn instantiate(
        &self,
        path: impl AsRef<Path>,
        params: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Workflow> {
        let base = self.load(path, cancel).await?;

        let substitute = |s: &str| match replace_tokens(s, |key| params.get(key).cloned()) {
            Cow::Owned(replaced) => Some(replaced),
            Cow::Borrowed(_) => None,
        };
        let nodes = rewrite_map(&base.nodes, &substitute, cancel)?;
        let meta = base
            .meta
            .as_ref()
            .map(|meta| rewrite_map(meta, &substitute, cancel))
            .transpose()?;

        let id = if base.id.is_empty() {
            format!("tmpl:{}", self.ids.next())
        } else {
            base.id.clone()
        };
        Ok(Workflow { id, nodes, meta })
    }

    /// Whether `path` has already been loaded.
    pub fn is_cached(&self, path: impl AsRef<Path>) -> bool {
        std::path::absolute(path.as_ref())
            .map(|p| self.cached(&p).is_some())
            .unwrap_or(false)
    }

    /// Drop every cached template.
    pub fn clear(&self) {
        match self.cache.write() {
            Ok(mut cache) => cache.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn cached(&self, key: &Path) -> Option<Arc<Workflow>> {
        let cache = match self.cache.read() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.get(key).cloned()
    }

    /// Insert unless another loader won the race; returns the stored entry.
    fn insert(&self, key: PathBuf, workflow: Arc<Workflow>) -> Arc<Workflow> {
        let mut cache = match self.cache.write() {
            Ok(cache) => cache,
            Err(poisoned) => poisoned.into_inner(),
        };
        cache.entry(key).or_insert(workflow).clone()
    }
}

fn read_error(path: &Path, e: std::io::Error) -> ClientError {
    if e.kind() == ErrorKind::NotFound {
        ClientError::TemplateNotFound(path.display().to_string())
    } else {
        ClientError::Io(format!("read template '{}': {}", path.display(), e))
    }
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn parse_workflow(path: &Path, data: &[u8]) -> Result<Workflow> {
    let parsed = if is_yaml(path) {
        serde_yaml::from_slice::<Workflow>(data).map_err(|e| e.to_string())
    } else {
        serde_json::from_slice::<Workflow>(data).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| ClientError::Decode(format!("invalid template '{}': {}", path.display(), e)))
}

/// Strictly increasing nanosecond readings for synthesized ids.
#[derive(Default)]
struct IdClock {
    last: AtomicI64,
}

impl IdClock {
    fn next(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => last = actual,
            }
        }
    }
}
