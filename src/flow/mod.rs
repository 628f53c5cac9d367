//! Flow-graph boundary: stage model, raw-row adapter, reloadable handle.

pub mod graph;
pub mod row;
pub mod source;

pub use graph::{
    ENTRY_STAGE, FlowGraph, FlowSettings, MenuOption, StageDefinition, StageKind,
    TERMINAL_SENTINEL, is_terminal_sentinel,
};
pub use row::{FlowParseError, parse_rows};
pub use source::{FlowError, FlowGraphHandle, StaticRows};
