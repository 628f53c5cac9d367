//! Reloadable handle over the flow source.
//!
//! [`FlowGraphHandle`] owns the current [`FlowGraph`] behind a lock and
//! swaps it atomically on reload. Readers clone an `Arc` and keep working
//! against a consistent table even while a reload is in flight.

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;

use super::graph::FlowGraph;
use super::row::{FlowParseError, parse_rows};
use crate::ports::{FlowSource, FlowSourceError};

/// Errors surfaced by [`FlowGraphHandle::reload`].
#[derive(Debug, Error, Diagnostic)]
pub enum FlowError {
    #[error("flow source failed: {0}")]
    #[diagnostic(
        code(stageflow::flow::source),
        help("Check the flow source credentials and connectivity.")
    )]
    Source(#[from] FlowSourceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] FlowParseError),
}

/// Shared, atomically swappable view of the flow graph.
#[derive(Clone)]
pub struct FlowGraphHandle {
    source: Arc<dyn FlowSource>,
    current: Arc<RwLock<Option<Arc<FlowGraph>>>>,
}

impl FlowGraphHandle {
    /// Create a handle with no graph loaded yet; the first
    /// [`ensure_loaded`](Self::ensure_loaded) pulls from the source.
    pub fn new(source: Arc<dyn FlowSource>) -> Self {
        Self {
            source,
            current: Arc::new(RwLock::new(None)),
        }
    }

    /// Create a handle preloaded with a graph (used by tests and callers
    /// that parse rows themselves).
    pub fn with_graph(source: Arc<dyn FlowSource>, graph: FlowGraph) -> Self {
        Self {
            source,
            current: Arc::new(RwLock::new(Some(Arc::new(graph)))),
        }
    }

    /// The currently loaded graph, if any. Never blocks on the source.
    #[must_use]
    pub fn current(&self) -> Option<Arc<FlowGraph>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Return the current graph, loading from the source first if none is
    /// cached.
    pub async fn ensure_loaded(&self) -> Result<Arc<FlowGraph>, FlowError> {
        if let Some(graph) = self.current() {
            return Ok(graph);
        }
        self.reload().await
    }

    /// Pull fresh rows from the source, parse, and swap the shared graph.
    ///
    /// On failure the previous graph (if any) stays in place, so a flaky
    /// source degrades to stale data rather than an outage.
    pub async fn reload(&self) -> Result<Arc<FlowGraph>, FlowError> {
        let rows = self.source.load().await?;
        let graph = Arc::new(parse_rows(&rows)?);
        tracing::info!(stages = graph.len(), "flow graph reloaded");
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(graph.clone());
        Ok(graph)
    }
}

impl std::fmt::Debug for FlowGraphHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowGraphHandle")
            .field("loaded", &self.current().is_some())
            .finish()
    }
}

/// In-memory [`FlowSource`] serving a fixed set of rows.
///
/// Useful for tests and for embedding a flow table directly in code.
#[derive(Clone, Debug, Default)]
pub struct StaticRows {
    rows: Vec<Vec<String>>,
}

impl StaticRows {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl FlowSource for StaticRows {
    async fn load(&self) -> Result<Vec<Vec<String>>, FlowSourceError> {
        Ok(self.rows.clone())
    }
}
