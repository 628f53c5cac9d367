//! Engine-level error taxonomy.
//!
//! Recoverable conversation conditions (invalid selections, dangling stage
//! references) are not errors here; the state machine answers them with
//! re-prompts and resets. These variants cover the cases where a task
//! cannot make a decision at all, and they are logged by the queue rather
//! than surfaced to users.

use miette::Diagnostic;
use thiserror::Error;

use crate::flow::FlowError;
use crate::ports::{FlowSourceError, OutboundError, PersistenceError};

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    /// No flow graph could be loaded; the event is dropped.
    #[error("flow graph unavailable: {0}")]
    #[diagnostic(
        code(stageflow::engine::graph_unavailable),
        help("Check the flow source credentials and connectivity, then retry the reload.")
    )]
    GraphUnavailable(#[from] FlowError),

    /// Outbound delivery failed after the engine's best effort.
    #[error(transparent)]
    #[diagnostic(code(stageflow::engine::outbound))]
    Outbound(#[from] OutboundError),

    /// A finalized record could not be appended.
    #[error(transparent)]
    #[diagnostic(code(stageflow::engine::persistence))]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    /// Shorthand for a source-level graph failure with a plain message.
    pub fn graph_unavailable(message: impl Into<String>) -> Self {
        Self::GraphUnavailable(FlowError::Source(FlowSourceError::new(message)))
    }
}
