//! Session finalization: label resolution and persistence hand-off.
//!
//! When a conversation reaches a terminal stage the engine hands the raw
//! answer map here. Purely numeric answers that were recorded by menu
//! stages are mapped back to their human-readable option labels before the
//! record goes to the persistence collaborator.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flow::FlowGraph;
use crate::ports::Persistence;

/// A completed conversation, ready for external persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalRecord {
    /// Capture id, unique per finalized session.
    pub id: Uuid,
    pub user_id: String,
    pub captured_at: DateTime<Utc>,
    /// Resolved answers: menu selections as option labels, free text verbatim.
    pub fields: FxHashMap<String, String>,
}

/// Map raw answers to a [`FinalRecord`], resolving numeric menu selections
/// to labels.
///
/// For each `(key, value)` pair where `value` is purely numeric and the
/// graph has a menu stage whose id equals `key`, the value is replaced with
/// the label of the value-th visible option. Anything else passes through
/// unchanged, including numeric free-text answers whose key matches no menu
/// stage and selections that no longer fit the (possibly reloaded) menu.
#[must_use]
pub fn resolve(
    graph: &FlowGraph,
    user_id: &str,
    answers: FxHashMap<String, String>,
    captured_at: DateTime<Utc>,
) -> FinalRecord {
    let fields = answers
        .into_iter()
        .map(|(key, value)| {
            let resolved = resolve_value(graph, &key, &value);
            (key, resolved)
        })
        .collect();
    FinalRecord {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        captured_at,
        fields,
    }
}

fn resolve_value(graph: &FlowGraph, key: &str, value: &str) -> String {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return value.to_string();
    }
    let Some(stage) = graph.lookup(key) else {
        return value.to_string();
    };
    let Ok(index) = value.parse::<usize>() else {
        return value.to_string();
    };
    match stage.option(index) {
        Some(option) => option.label.clone(),
        None => value.to_string(),
    }
}

/// Resolve and persist a finished session's answers.
///
/// A persistence failure is logged and swallowed: the session is already
/// gone and is never resurrected for a retry.
pub async fn finalize(
    graph: &FlowGraph,
    user_id: &str,
    answers: FxHashMap<String, String>,
    persistence: &dyn Persistence,
) {
    let record = resolve(graph, user_id, answers, Utc::now());
    match persistence.append(&record).await {
        Ok(()) => {
            tracing::info!(user = %user_id, record = %record.id, fields = record.fields.len(), "session finalized");
        }
        Err(error) => {
            tracing::error!(user = %user_id, record = %record.id, %error, "failed to persist finalized session");
        }
    }
}
