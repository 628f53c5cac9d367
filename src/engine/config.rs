//! Engine configuration and user-facing prompt texts.

use std::time::Duration;

use crate::flow::{ENTRY_STAGE, FlowGraph, TERMINAL_SENTINEL};

/// Inactivity window before the watchdog pauses a session, unless the flow
/// table or environment overrides it.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Default watchdog scan interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed user-facing texts the engine sends outside of stage prompts.
///
/// These are deployment-localized strings; the defaults are English.
#[derive(Clone, Debug)]
pub struct Prompts {
    /// Error line prepended to the re-sent menu on an invalid selection.
    pub invalid_option: String,
    /// Line sent (with the entry menu) after a graph-integrity reset.
    pub system_error: String,
    /// Fixed closing message when a conversation hits the terminal sentinel.
    pub closing: String,
    /// Watchdog pause prompt ("continue? 1=yes 2=no").
    pub pause_prompt: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            invalid_option: "That is not a valid option, please choose again.".to_string(),
            system_error: "Something went wrong on our side; let's start over.".to_string(),
            closing: "Thank you for reaching out!".to_string(),
            pause_prompt:
                "Are you still there? Reply 1 to continue or 2 to end the conversation."
                    .to_string(),
        }
    }
}

/// Engine tunables.
///
/// Resolution order for the idle threshold and pause end stage:
/// flow-table settings rows, then this config, where the config itself is
/// seeded from environment variables (`STAGEFLOW_IDLE_SECS`,
/// `STAGEFLOW_TICK_SECS`) with hard-coded fallbacks.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Stage id fresh sessions start at.
    pub entry_stage: String,
    /// Fallback idle threshold when the flow table carries no override.
    pub idle_threshold: Duration,
    /// Watchdog scan interval; a tunable constant, not part of the contract.
    pub tick_interval: Duration,
    /// Fallback stage a declined or timed-out pause finalizes to.
    pub pause_end_stage: String,
    pub prompts: Prompts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            entry_stage: ENTRY_STAGE.to_string(),
            idle_threshold: resolve_env_secs("STAGEFLOW_IDLE_SECS", DEFAULT_IDLE_THRESHOLD),
            tick_interval: resolve_env_secs("STAGEFLOW_TICK_SECS", DEFAULT_TICK_INTERVAL),
            pause_end_stage: TERMINAL_SENTINEL.to_string(),
            prompts: Prompts::default(),
        }
    }
}

fn resolve_env_secs(var: &str, fallback: Duration) -> Duration {
    dotenvy::dotenv().ok();
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

impl EngineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry_stage(mut self, entry_stage: impl Into<String>) -> Self {
        self.entry_stage = entry_stage.into();
        self
    }

    #[must_use]
    pub fn with_idle_threshold(mut self, idle_threshold: Duration) -> Self {
        self.idle_threshold = idle_threshold;
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    #[must_use]
    pub fn with_pause_end_stage(mut self, stage: impl Into<String>) -> Self {
        self.pause_end_stage = stage.into();
        self
    }

    #[must_use]
    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Effective idle threshold for a loaded graph (flow settings win).
    #[must_use]
    pub fn effective_idle_threshold(&self, graph: &FlowGraph) -> Duration {
        graph
            .settings()
            .idle_threshold
            .unwrap_or(self.idle_threshold)
    }

    /// Effective pause end stage for a loaded graph (flow settings win).
    #[must_use]
    pub fn effective_pause_end_stage(&self, graph: &FlowGraph) -> String {
        graph
            .settings()
            .pause_end_stage
            .clone()
            .unwrap_or_else(|| self.pause_end_stage.clone())
    }
}
