//! Collaborator seams: outbound delivery, record persistence, flow source.
//!
//! The engine never talks to a messaging API, spreadsheet, or database
//! directly; it drives these traits. Implementations live with the
//! transport/bootstrap layer of the host application.

use async_trait::async_trait;
use thiserror::Error;

use crate::finalizer::FinalRecord;

/// Error from an [`Outbound`] delivery attempt.
///
/// Delivery is best-effort: the engine logs these and keeps going, so
/// implementations should fold retries and timeouts in before failing.
#[derive(Debug, Error)]
#[error("outbound send failed: {message}")]
pub struct OutboundError {
    pub message: String,
}

impl OutboundError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error from a [`Persistence`] append.
#[derive(Debug, Error)]
#[error("record persistence failed: {message}")]
pub struct PersistenceError {
    pub message: String,
}

impl PersistenceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error from a [`FlowSource`] load.
#[derive(Debug, Error)]
#[error("flow source unavailable: {message}")]
pub struct FlowSourceError {
    pub message: String,
}

impl FlowSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Outbound message delivery to one user.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), OutboundError>;
}

/// Append-only sink for finalized conversation records.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn append(&self, record: &FinalRecord) -> Result<(), PersistenceError>;
}

/// Provider of raw flow-table rows.
///
/// Each row is `[stage_id, prompt, ...]`; see [`crate::flow::row`] for the
/// full column layout the adapter accepts.
#[async_trait]
pub trait FlowSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Vec<String>>, FlowSourceError>;
}

/// [`Outbound`] that only logs what it would have sent.
///
/// Stands in when delivery credentials are absent (local runs, CI).
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyOutbound;

#[async_trait]
impl Outbound for LogOnlyOutbound {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), OutboundError> {
        tracing::info!(user = %user_id, %text, "outbound (log only)");
        Ok(())
    }
}
