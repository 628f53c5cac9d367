//! Adapter from raw tabular rows to [`FlowGraph`].
//!
//! This is the only place that understands the column layout of the flow
//! source. Row shapes:
//!
//! - `[id, prompt, label1, next1, label2, next2, ...]`: menu stage; cells
//!   come in (label, next) pairs.
//! - `[id, prompt, "[field]", next]`: free-text stage; the bracketed third
//!   cell names the answer key.
//! - `[id, prompt]`: terminal stage; the prompt is the closing message.
//! - `[@setting, value]`: engine tunables, not stages (`@idle_minutes`,
//!   `@pause_end_stage`).
//!
//! The transition logic addresses options by their 1-based visible index,
//! so pairs with a blank label are dropped here rather than carried as
//! unselectable holes. Malformed rows are skipped with a warning; parsing
//! only fails outright when no usable stage remains.

use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use super::graph::{FlowGraph, FlowSettings, MenuOption, StageDefinition, StageKind};

/// Errors raised while adapting raw rows into a [`FlowGraph`].
#[derive(Debug, Error, Diagnostic)]
pub enum FlowParseError {
    /// The source produced no usable stage rows at all.
    #[error("flow table contains no usable stage rows")]
    #[diagnostic(
        code(stageflow::flow::empty_table),
        help("Check the flow source range; at least one stage row [id, prompt, ...] is required.")
    )]
    EmptyTable,
}

/// Parse raw rows into an immutable [`FlowGraph`].
///
/// Duplicate stage ids keep the first definition; later duplicates are
/// skipped with a warning.
pub fn parse_rows(rows: &[Vec<String>]) -> Result<FlowGraph, FlowParseError> {
    let mut stages: FxHashMap<String, StageDefinition> = FxHashMap::default();
    let mut settings = FlowSettings::default();

    for (index, row) in rows.iter().enumerate() {
        let Some(id) = row.first().map(|c| c.trim()) else {
            continue;
        };
        if id.is_empty() {
            tracing::warn!(row = index, "skipping row with blank stage id");
            continue;
        }
        if let Some(name) = id.strip_prefix('@') {
            apply_setting(&mut settings, name, row.get(1).map(|c| c.trim()), index);
            continue;
        }
        let Some(stage) = parse_stage(id, row, index) else {
            continue;
        };
        if stages.contains_key(id) {
            tracing::warn!(row = index, stage = %id, "duplicate stage id; keeping first definition");
            continue;
        }
        stages.insert(id.to_string(), stage);
    }

    if stages.is_empty() {
        return Err(FlowParseError::EmptyTable);
    }
    Ok(FlowGraph::from_parts(stages, settings))
}

fn apply_setting(settings: &mut FlowSettings, name: &str, value: Option<&str>, index: usize) {
    match (name, value) {
        ("idle_minutes", Some(v)) => match v.parse::<u64>() {
            Ok(minutes) if minutes > 0 => {
                settings.idle_threshold = Some(Duration::from_secs(minutes * 60));
            }
            _ => tracing::warn!(row = index, value = %v, "ignoring non-positive @idle_minutes"),
        },
        ("pause_end_stage", Some(v)) if !v.is_empty() => {
            settings.pause_end_stage = Some(v.to_string());
        }
        _ => tracing::warn!(row = index, setting = %name, "ignoring unknown or valueless setting row"),
    }
}

fn parse_stage(id: &str, row: &[String], index: usize) -> Option<StageDefinition> {
    let prompt = row.get(1).map(|c| c.trim()).unwrap_or_default();
    if prompt.is_empty() {
        tracing::warn!(row = index, stage = %id, "skipping stage row without a prompt");
        return None;
    }

    let kind = if row.len() <= 2 {
        StageKind::Terminal
    } else if let Some(field) = free_text_field(row) {
        let next = row.get(3).map(|c| c.trim()).unwrap_or_default();
        if next.is_empty() {
            tracing::warn!(row = index, stage = %id, "skipping free-text stage without a next stage");
            return None;
        }
        StageKind::FreeText {
            field,
            next: next.to_string(),
        }
    } else {
        let options = parse_options(id, row, index);
        if options.is_empty() {
            tracing::warn!(row = index, stage = %id, "menu stage has no selectable options");
        }
        StageKind::Menu { options }
    };

    Some(StageDefinition {
        id: id.to_string(),
        prompt: prompt.to_string(),
        kind,
    })
}

/// A free-text stage marks its third cell as `[field_name]`.
fn free_text_field(row: &[String]) -> Option<String> {
    let cell = row.get(2)?.trim();
    let inner = cell.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() {
        return None;
    }
    Some(inner.to_string())
}

fn parse_options(id: &str, row: &[String], index: usize) -> Vec<MenuOption> {
    let mut options = Vec::new();
    let mut cells = row[2..].chunks_exact(2);
    for pair in cells.by_ref() {
        let label = pair[0].trim();
        let next = pair[1].trim();
        if label.is_empty() {
            // Blank labels are omitted from display and never selectable.
            if !next.is_empty() {
                tracing::warn!(row = index, stage = %id, next = %next, "dropping option with blank label");
            }
            continue;
        }
        if next.is_empty() {
            tracing::warn!(row = index, stage = %id, label = %label, "dropping option without a next stage");
            continue;
        }
        options.push(MenuOption {
            label: label.to_string(),
            next: next.to_string(),
        });
    }
    if !cells.remainder().is_empty() {
        let trailing = cells.remainder()[0].trim();
        if !trailing.is_empty() {
            tracing::warn!(row = index, stage = %id, "ignoring trailing unpaired option cell");
        }
    }
    options
}
