//! Shared fixtures: demo flow tables and recording collaborator doubles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use stageflow::engine::{Engine, EngineConfig};
use stageflow::finalizer::FinalRecord;
use stageflow::flow::FlowGraphHandle;
use stageflow::ports::{
    FlowSource, FlowSourceError, Outbound, OutboundError, Persistence, PersistenceError,
};

pub fn rows(table: &[&[&str]]) -> Vec<Vec<String>> {
    table
        .iter()
        .map(|row| row.iter().map(|cell| (*cell).to_string()).collect())
        .collect()
}

/// The demo flow used across the integration tests:
///
/// ```text
/// 0 Welcome                     -> 1 (Sales) | 2 (Support)
/// 1 Which plan?                 -> 3 (Starter) | 3 (Enterprise)
/// 2 Describe your issue [issue] -> 3
/// 3 Anything else?              -> 4 (Leave email) | final (Finish)
/// 4 Please type your email [email] -> 5
/// 5 terminal: Thanks, we will be in touch.
/// ```
pub fn demo_rows() -> Vec<Vec<String>> {
    rows(&[
        &["0", "Welcome", "Sales", "1", "Support", "2"],
        &["1", "Which plan?", "Starter", "3", "Enterprise", "3"],
        &["2", "Describe your issue", "[issue]", "3"],
        &["3", "Anything else?", "Leave email", "4", "Finish", "final"],
        &["4", "Please type your email", "[email]", "5"],
        &["5", "Thanks, we will be in touch."],
    ])
}

/// Outbound double that records every send; an optional delay lets ordering
/// tests overlap their I/O.
#[derive(Debug, Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl RecordingOutbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts_for(&self, user_id: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn last_for(&self, user_id: &str) -> Option<String> {
        self.texts_for(user_id).pop()
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send(&self, user_id: &str, text: &str) -> Result<(), OutboundError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

/// Outbound double that always fails delivery.
#[derive(Debug, Default)]
pub struct FailingOutbound;

#[async_trait]
impl Outbound for FailingOutbound {
    async fn send(&self, _user_id: &str, _text: &str) -> Result<(), OutboundError> {
        Err(OutboundError::new("delivery rejected"))
    }
}

/// Persistence double collecting finalized records in memory.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: Mutex<Vec<FinalRecord>>,
    fail: AtomicBool,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: AtomicBool::new(true),
        }
    }

    pub fn records(&self) -> Vec<FinalRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn append(&self, record: &FinalRecord) -> Result<(), PersistenceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistenceError::new("storage offline"));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Flow source whose rows can be swapped or failed mid-test to exercise
/// reload behavior.
#[derive(Debug)]
pub struct SwitchableSource {
    rows: Mutex<Vec<Vec<String>>>,
    fail: AtomicBool,
}

impl SwitchableSource {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows: Mutex::new(rows),
            fail: AtomicBool::new(false),
        }
    }

    pub fn set_rows(&self, rows: Vec<Vec<String>>) {
        *self.rows.lock().unwrap() = rows;
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FlowSource for SwitchableSource {
    async fn load(&self) -> Result<Vec<Vec<String>>, FlowSourceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FlowSourceError::new("source offline"));
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

pub struct Harness {
    pub engine: Engine,
    pub outbound: Arc<RecordingOutbound>,
    pub persistence: Arc<MemoryPersistence>,
    pub source: Arc<SwitchableSource>,
}

/// Build an engine over the given rows with recording collaborators.
pub fn harness_with(config: EngineConfig, table: Vec<Vec<String>>) -> Harness {
    let outbound = Arc::new(RecordingOutbound::new());
    let persistence = Arc::new(MemoryPersistence::new());
    let source = Arc::new(SwitchableSource::new(table));
    let flow = FlowGraphHandle::new(source.clone());
    let engine = Engine::new(config, flow, outbound.clone(), persistence.clone());
    Harness {
        engine,
        outbound,
        persistence,
        source,
    }
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default(), demo_rows())
}
