//! Immutable stage graph and its lookup contract.
//!
//! A [`FlowGraph`] is built once from tabular rows (see [`crate::flow::row`])
//! and shared read-only across all user tasks. Reload replaces the whole
//! graph atomically via [`crate::flow::FlowGraphHandle`]; readers never
//! observe a half-updated table.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Conventional entry stage id for fresh sessions.
pub const ENTRY_STAGE: &str = "0";

/// Reserved sentinel ending a conversation without a dedicated stage row.
pub const TERMINAL_SENTINEL: &str = "final";

/// Returns `true` if a `next` reference is the reserved terminal sentinel.
///
/// The comparison is case-insensitive; hand-edited tables mix
/// `final`/`Final`.
#[must_use]
pub fn is_terminal_sentinel(next: &str) -> bool {
    next.trim().eq_ignore_ascii_case(TERMINAL_SENTINEL)
}

/// One numbered choice on a menu stage.
///
/// Insertion order is display order; options are numbered `1..=N` when
/// rendered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    /// Human-readable label shown to the user.
    pub label: String,
    /// Stage id (or the terminal sentinel) this option routes to.
    pub next: String,
}

/// The behavior of a stage once the conversation reaches it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    /// Numbered options; the next inbound message is parsed as a selection.
    Menu { options: Vec<MenuOption> },
    /// The next inbound message is captured verbatim under `field`.
    FreeText { field: String, next: String },
    /// Closing message only; reaching it destroys the session.
    Terminal,
}

/// One node of the conversation flow graph.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique, opaque stage id (`"0"` is the conventional entry stage).
    pub id: String,
    /// Prompt text; for terminal stages this is the closing message.
    pub prompt: String,
    pub kind: StageKind,
}

impl StageDefinition {
    /// Number of selectable options (zero for free-text and terminal stages).
    #[must_use]
    pub fn option_count(&self) -> usize {
        match &self.kind {
            StageKind::Menu { options } => options.len(),
            _ => 0,
        }
    }

    /// 1-based option access, mirroring how selections are numbered on screen.
    #[must_use]
    pub fn option(&self, index: usize) -> Option<&MenuOption> {
        match &self.kind {
            StageKind::Menu { options } if index >= 1 => options.get(index - 1),
            _ => None,
        }
    }

    /// Render the outbound text for this stage.
    ///
    /// Menu stages produce the prompt followed by one `"{i}. {label}"` line
    /// per option, 1-based, in declaration order. Free-text and terminal
    /// stages render as their bare prompt.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.kind {
            StageKind::Menu { options } => {
                let mut out = String::with_capacity(self.prompt.len() + options.len() * 16);
                out.push_str(&self.prompt);
                for (i, option) in options.iter().enumerate() {
                    out.push('\n');
                    out.push_str(&format!("{}. {}", i + 1, option.label));
                }
                out
            }
            StageKind::FreeText { .. } | StageKind::Terminal => self.prompt.clone(),
        }
    }
}

impl fmt::Display for StageDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            StageKind::Menu { options } => format!("menu({})", options.len()),
            StageKind::FreeText { field, .. } => format!("free_text[{field}]"),
            StageKind::Terminal => "terminal".to_string(),
        };
        write!(f, "{} {kind}", self.id)
    }
}

/// Engine tunables carried inside the flow table itself.
///
/// Settings rows (`@idle_minutes`, `@pause_end_stage`) let operators adjust
/// the watchdog without a redeploy; anything unset falls back to
/// [`crate::engine::EngineConfig`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowSettings {
    /// Inactivity window before the watchdog sends a pause prompt.
    pub idle_threshold: Option<Duration>,
    /// Stage a timed-out or declined pause finalizes to.
    pub pause_end_stage: Option<String>,
}

/// Immutable, shareable table of stage definitions.
#[derive(Clone, Debug, Default)]
pub struct FlowGraph {
    stages: FxHashMap<String, StageDefinition>,
    settings: FlowSettings,
}

impl FlowGraph {
    pub(crate) fn from_parts(
        stages: FxHashMap<String, StageDefinition>,
        settings: FlowSettings,
    ) -> Self {
        Self { stages, settings }
    }

    /// Look up a stage by id. `None` drives the reset-to-entry recovery in
    /// the state machine; it is never a crash.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<&StageDefinition> {
        self.stages.get(id)
    }

    #[must_use]
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Iterate all stages in unspecified order.
    pub fn stages(&self) -> impl Iterator<Item = &StageDefinition> {
        self.stages.values()
    }
}
