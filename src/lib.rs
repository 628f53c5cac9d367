//! # Stageflow: menu-driven conversational flow engine
//!
//! Stageflow drives menu-based conversations for an inbound messaging
//! channel. Each user walks a directed graph of *stages* (numbered menus,
//! free-text captures, and terminal closings) while the engine accumulates
//! their answers and hands the finished record to a persistence
//! collaborator.
//!
//! ## Core concepts
//!
//! - **Flow graph**: immutable table of stage definitions, built from raw
//!   tabular rows and swapped atomically on reload.
//! - **Session**: one per user, holding the cursor, collected answers, and
//!   pause bookkeeping; destroyed when the conversation ends.
//! - **Transition**: a pure function from `(session, graph, event)` to
//!   `(session', reply, effect)`; all the decidable logic, none of the I/O.
//! - **Per-user queue**: strict FIFO serialization of one user's events, so
//!   webhook retries and rapid double-sends can never corrupt a session.
//! - **Watchdog**: a background tick that pauses idle sessions
//!   ("continue? 1=yes 2=no") and force-ends them on timeout.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stageflow::engine::{Engine, EngineConfig};
//! use stageflow::flow::{FlowGraphHandle, StaticRows};
//! use stageflow::ports::LogOnlyOutbound;
//!
//! # #[derive(Debug)] struct NoopPersistence;
//! # #[async_trait::async_trait]
//! # impl stageflow::ports::Persistence for NoopPersistence {
//! #     async fn append(&self, _: &stageflow::finalizer::FinalRecord)
//! #         -> Result<(), stageflow::ports::PersistenceError> { Ok(()) }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let rows = vec![
//!         vec!["0".into(), "Welcome".into(), "Sales".into(), "1".into()],
//!         vec!["1".into(), "Thanks for reaching out!".into()],
//!     ];
//!     let flow = FlowGraphHandle::new(Arc::new(StaticRows::new(rows)));
//!
//!     let engine = Engine::new(
//!         EngineConfig::default(),
//!         flow,
//!         Arc::new(LogOnlyOutbound),
//!         Arc::new(NoopPersistence),
//!     );
//!     engine.preload().await?;
//!     let _watchdog = stageflow::watchdog::spawn(engine.clone());
//!
//!     // Transport layer calls this once per inbound text message.
//!     engine.handle("12345", "hi");
//!     Ok(())
//! }
//! ```
//!
//! ## Module guide
//!
//! - [`flow`] - stage model, raw-row adapter, reloadable graph handle
//! - [`session`] - per-user session state and the session store
//! - [`engine`] - the facade, configuration, and pure transition function
//! - [`queue`] - per-user FIFO task serialization
//! - [`watchdog`] - idle detection and pause/force-end loop
//! - [`finalizer`] - answer-to-label resolution and persistence hand-off
//! - [`ports`] - collaborator traits (outbound, persistence, flow source)

pub mod engine;
pub mod error;
pub mod finalizer;
pub mod flow;
pub mod ports;
pub mod queue;
pub mod session;
pub mod telemetry;
pub mod watchdog;

pub use engine::{Engine, EngineConfig, EngineEvent, Prompts};
pub use error::EngineError;
pub use finalizer::FinalRecord;
pub use flow::{FlowGraph, FlowGraphHandle, StageDefinition, StageKind};
pub use session::{Cursor, Session, SessionStore};
