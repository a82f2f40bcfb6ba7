//! Persisted execution state.
//!
//! Document storage beyond this interface is out of scope (§1) — [`ExecutionStore`] is the
//! opaque persistence boundary. [`InMemoryExecutionStore`] is the in-process implementation used
//! by default and by the test suite; a real backing store can be substituted without touching
//! the runner.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::ExecutionEvent;

/// Terminal and non-terminal states an [`ExecutionRecord`] can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created, not yet started.
    Pending,
    /// In flight.
    Running,
    /// Finished with no block failures.
    Completed,
    /// Finished with at least one block failure.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are sticky: `completed`, `failed`, `cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled)
    }
}

/// The stable record persisted per execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique id for this execution.
    pub id: Uuid,
    /// The design this execution ran, if invoked through a design rather than a direct pattern.
    pub design_id: Option<String>,
    /// Current lifecycle status.
    pub status: ExecutionStatus,
    /// When the execution began.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal state, if it has.
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-block results gathered so far. Monotonically growing until a terminal state
    /// (invariant 10) — entries are only ever added, never removed.
    pub results: HashMap<String, serde_json::Value>,
    /// Set while any block has not yet finished.
    pub in_progress: bool,
    /// First error observed, if the execution failed.
    pub error: Option<String>,
    /// Full event history, kept in sync with the execution's [`crate::events::EventBus`].
    pub events: Vec<ExecutionEvent>,
}

impl ExecutionRecord {
    /// Construct a fresh `pending` record.
    pub fn new(design_id: Option<String>) -> Self {
        ExecutionRecord {
            id: Uuid::new_v4(),
            design_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            results: HashMap::new(),
            in_progress: true,
            error: None,
            events: Vec::new(),
        }
    }
}

/// The persistence boundary for execution records. A write failure is logged by the caller and
/// does not abort the execution (§7 `StoreUnavailable`).
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert a brand-new record.
    async fn create(&self, record: ExecutionRecord);
    /// Replace the record for `id` with `record`'s contents. No-op if `id` is unknown.
    async fn update(&self, id: Uuid, record: ExecutionRecord);
    /// Fetch a snapshot of the record for `id`.
    async fn get(&self, id: Uuid) -> Option<ExecutionRecord>;
    /// List the most recent records, newest first, optionally scoped to one design, capped at
    /// `limit`.
    async fn list(&self, design_id: Option<&str>, limit: usize) -> Vec<ExecutionRecord>;
}

/// In-process execution store, guarded by an `RwLock`-protected map. Stands in for the
/// out-of-scope document store (§1).
#[derive(Default)]
pub struct InMemoryExecutionStore {
    records: RwLock<HashMap<Uuid, ExecutionRecord>>,
}

impl InMemoryExecutionStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        InMemoryExecutionStore::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create(&self, record: ExecutionRecord) {
        self.records.write().expect("execution store lock poisoned").insert(record.id, record);
    }

    async fn update(&self, id: Uuid, record: ExecutionRecord) {
        let mut guard = self.records.write().expect("execution store lock poisoned");
        if guard.contains_key(&id) {
            guard.insert(id, record);
        }
    }

    async fn get(&self, id: Uuid) -> Option<ExecutionRecord> {
        self.records.read().expect("execution store lock poisoned").get(&id).cloned()
    }

    async fn list(&self, design_id: Option<&str>, limit: usize) -> Vec<ExecutionRecord> {
        let guard = self.records.read().expect("execution store lock poisoned");
        let mut records: Vec<_> = guard
            .values()
            .filter(|r| design_id.map_or(true, |d| r.design_id.as_deref() == Some(d)))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        records.truncate(limit);
        records
    }
}
