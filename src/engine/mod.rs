//! Engine facade: ties the store, graph, queue, and collaborators together.
//!
//! [`Engine::handle`] and [`Engine::tick`] are the only entry points the
//! transport and timer layers call. Both enqueue work on the per-user
//! queue; the queued task computes a pure [`Transition`], performs the
//! sequenced I/O (send, finalize), and commits the session mutation as the
//! last, side-effect-free step.

pub mod config;
pub mod transition;

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::error::EngineError;
use crate::finalizer;
use crate::flow::FlowGraphHandle;
use crate::ports::{Outbound, Persistence};
use crate::queue::TaskQueue;
use crate::session::SessionStore;

pub use config::{DEFAULT_IDLE_THRESHOLD, DEFAULT_TICK_INTERVAL, EngineConfig, Prompts};
pub use transition::{Effect, EngineEvent, Transition, transition};

/// The conversation engine. Cheap to clone; all state is shared.
#[derive(Clone, Debug)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    flow: FlowGraphHandle,
    store: SessionStore,
    queue: TaskQueue,
    outbound: Arc<dyn Outbound>,
    persistence: Arc<dyn Persistence>,
}

impl std::fmt::Debug for EngineInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineInner")
            .field("sessions", &self.store.len())
            .field("active_queues", &self.queue.active_users())
            .finish()
    }
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        flow: FlowGraphHandle,
        outbound: Arc<dyn Outbound>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                flow,
                store: SessionStore::new(),
                queue: TaskQueue::new(),
                outbound,
                persistence,
            }),
        }
    }

    /// Load the flow graph ahead of the first inbound message.
    pub async fn preload(&self) -> Result<(), EngineError> {
        self.inner.flow.ensure_loaded().await?;
        Ok(())
    }

    /// Enqueue one inbound message for a user.
    ///
    /// Events with a blank user id have no one to answer and are dropped.
    #[instrument(skip(self, text), fields(user = %user_id))]
    pub fn handle(&self, user_id: &str, text: &str) {
        if user_id.trim().is_empty() {
            tracing::warn!("dropping inbound message without a sender id");
            return;
        }
        self.dispatch(user_id, EngineEvent::Message(text.to_string()));
    }

    /// Watchdog scan: inject pause prompts and force-ends for stalled
    /// sessions through the per-user queue.
    ///
    /// Uses whatever graph is currently loaded for the threshold; the
    /// queued transition re-validates against fresh state, so a stale or
    /// missing graph only delays prompts, never corrupts sessions.
    #[instrument(skip(self))]
    pub fn tick(&self) {
        let now = Utc::now();
        let graph = self.inner.flow.current();
        let threshold = graph
            .as_deref()
            .map(|g| self.inner.config.effective_idle_threshold(g))
            .unwrap_or(self.inner.config.idle_threshold);

        for view in self.inner.store.activity() {
            match view.pause_sent_at {
                Some(sent_at) => {
                    if now.signed_duration_since(sent_at).to_std().is_ok_and(|d| d > threshold) {
                        self.dispatch(&view.user_id, EngineEvent::PauseExpired);
                    }
                }
                None => {
                    if now
                        .signed_duration_since(view.last_activity)
                        .to_std()
                        .is_ok_and(|d| d > threshold)
                    {
                        self.dispatch(&view.user_id, EngineEvent::IdlePrompt);
                    }
                }
            }
        }
    }

    fn dispatch(&self, user_id: &str, event: EngineEvent) {
        let inner = self.inner.clone();
        let user = user_id.to_string();
        self.inner.queue.enqueue(
            user_id,
            Box::pin(async move { EngineInner::process(inner, user, event).await }),
        );
    }

    /// Number of live sessions (for tests and operational introspection).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.store.len()
    }

    /// The reloadable flow-graph handle, for refresh schedulers.
    #[must_use]
    pub fn flow(&self) -> &FlowGraphHandle {
        &self.inner.flow
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Wait until all queued work has drained (test support).
    pub async fn settled(&self) {
        self.inner.queue.drained().await;
    }
}

impl EngineInner {
    /// Runs on the user's queue: pure transition first, then sequenced I/O,
    /// then the store commit so a failing task leaks no partial mutation.
    async fn process(
        inner: Arc<EngineInner>,
        user_id: String,
        event: EngineEvent,
    ) -> Result<(), EngineError> {
        let graph = inner.flow.ensure_loaded().await?;
        let now = Utc::now();
        let session = inner.store.get(&user_id);

        let step = transition(now, session.as_ref(), &graph, &inner.config, &user_id, &event);

        if let Some(reply) = &step.reply
            && let Err(error) = inner.outbound.send(&user_id, reply).await
        {
            // Best-effort delivery: never blocks the state transition.
            tracing::warn!(user = %user_id, %error, "outbound send failed");
        }

        if let Some(Effect::Finalize { answers }) = step.effect {
            finalizer::finalize(&graph, &user_id, answers, inner.persistence.as_ref()).await;
        }

        inner.store.commit(&user_id, step.update);
        Ok(())
    }
}
