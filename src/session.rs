//! Per-user session state and the store that owns it.
//!
//! A [`Session`] exists from first contact until the conversation reaches a
//! terminal stage (or the watchdog force-ends it). The [`SessionStore`] is
//! the single home for that state; nothing else in the crate keeps session
//! data. Per-user writes are already serialized by the task queue, so the
//! store's lock only guards the map itself and is never held across an
//! await.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Position of a session within the flow graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cursor {
    /// Sitting on a stage; the next inbound message is a menu selection.
    AtStage(String),
    /// A free-text prompt for this stage was sent; the next inbound message
    /// is captured verbatim as that stage's answer.
    AwaitingText(String),
}

impl Cursor {
    /// The stage id under the cursor, ignoring the awaiting-text modifier.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        match self {
            Cursor::AtStage(id) | Cursor::AwaitingText(id) => id,
        }
    }
}

/// Bookkeeping for an outstanding watchdog pause prompt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    /// Cursor to restore if the user chooses to continue.
    pub resume: Cursor,
    /// Stage a declined or timed-out pause finalizes to.
    pub end_stage: String,
    /// When the pause prompt was sent; the force-end clock runs from here.
    pub sent_at: DateTime<Utc>,
}

/// One user's conversation state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub cursor: Cursor,
    /// Collected answers, keyed by free-text field name or menu stage id.
    /// Keys are unique; last write wins.
    pub answers: FxHashMap<String, String>,
    pub last_activity: DateTime<Utc>,
    /// Present only while a pause prompt is outstanding.
    pub pause: Option<PauseState>,
}

impl Session {
    /// Fresh session positioned at the entry stage.
    #[must_use]
    pub fn new(user_id: impl Into<String>, entry_stage: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            cursor: Cursor::AtStage(entry_stage.into()),
            answers: FxHashMap::default(),
            last_activity: now,
            pause: None,
        }
    }
}

/// How a processed event changes the stored session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Upsert the session (creation or mutation).
    Store(Session),
    /// Remove the session (terminal stage or force-end).
    Discard,
    /// Leave the store untouched.
    Unchanged,
}

/// Activity view used by the watchdog scan; cheap to snapshot.
#[derive(Clone, Debug)]
pub struct ActivityView {
    pub user_id: String,
    pub last_activity: DateTime<Utc>,
    pub pause_sent_at: Option<DateTime<Utc>>,
}

/// In-memory mapping from user id to [`Session`].
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<FxHashMap<String, Session>>,
}

impl SessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, Session>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clone the session for a user, if one exists.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<Session> {
        self.lock().get(user_id).cloned()
    }

    /// Apply a transition's session update.
    pub fn commit(&self, user_id: &str, update: SessionUpdate) {
        match update {
            SessionUpdate::Store(session) => {
                self.lock().insert(user_id.to_string(), session);
            }
            SessionUpdate::Discard => {
                self.lock().remove(user_id);
            }
            SessionUpdate::Unchanged => {}
        }
    }

    /// Snapshot the activity timestamps of every live session.
    #[must_use]
    pub fn activity(&self) -> Vec<ActivityView> {
        self.lock()
            .values()
            .map(|s| ActivityView {
                user_id: s.user_id.clone(),
                last_activity: s.last_activity,
                pause_sent_at: s.pause.as_ref().map(|p| p.sent_at),
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
