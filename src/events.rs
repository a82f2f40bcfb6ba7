//! The Execution Event Bus: a single append-only event stream per execution, fanned out to a
//! persistent store and to any number of live subscribers.
//!
//! `Emit` is non-blocking for producers — it is a `broadcast::Sender::send`, which never blocks
//! the caller even with no subscribers attached. A dedicated drainer task owned by the runner is
//! the only writer into the persistent store (§5 "Shared resources"). This is a deliberate
//! departure from the trait-dispatch `EventHandler` callback style used elsewhere in this
//! codebase's agent layer: the "snapshot + live tail for joining subscribers" contract this
//! component needs reads as a broadcast-channel architecture, not a callback one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One entry in an execution's append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEvent {
    /// What kind of event this is.
    pub kind: EventKind,
    /// The block this event concerns, if any (absent for execution-wide events).
    pub block_id: Option<String>,
    /// The agent this event concerns, if any.
    pub agent_name: Option<String>,
    /// Kind-specific payload.
    pub payload: EventPayload,
    /// When this event was produced.
    pub timestamp: DateTime<Utc>,
}

/// The kind of an [`ExecutionEvent`]. Mirrors the wire-level `type` tag in the SSE payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The execution has begun.
    Start,
    /// A status transition (e.g. a block started).
    Status,
    /// An incremental text fragment from one agent.
    Chunk,
    /// A block finished (successfully or not).
    BlockComplete,
    /// The whole execution finished successfully.
    Complete,
    /// The execution (or one of its blocks) failed.
    Error,
}

/// Kind-specific event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// A `Chunk` event's text fragment.
    Chunk { data: String },
    /// A `Status` event's free-form status text.
    Status { message: String },
    /// A `BlockComplete` event's outcome summary.
    BlockComplete { success: bool },
    /// A `Complete` event's final result, serialized from the execution's result tree.
    Complete { result: serde_json::Value },
    /// An `Error` event's message.
    Error { error: String },
    /// Events that carry no payload of their own (e.g. `Start`).
    Empty,
}

impl ExecutionEvent {
    /// Construct a `start` event for the whole execution.
    pub fn start() -> Self {
        ExecutionEvent {
            kind: EventKind::Start,
            block_id: None,
            agent_name: None,
            payload: EventPayload::Empty,
            timestamp: Utc::now(),
        }
    }

    /// Construct a `status` event describing a state transition (e.g. a block starting).
    pub fn status(block_id: Option<String>, message: impl Into<String>) -> Self {
        ExecutionEvent {
            kind: EventKind::Status,
            block_id,
            agent_name: None,
            payload: EventPayload::Status { message: message.into() },
            timestamp: Utc::now(),
        }
    }

    /// Construct a `chunk` event for one agent's text fragment.
    pub fn chunk(block_id: impl Into<String>, agent_name: impl Into<String>, data: impl Into<String>) -> Self {
        ExecutionEvent {
            kind: EventKind::Chunk,
            block_id: Some(block_id.into()),
            agent_name: Some(agent_name.into()),
            payload: EventPayload::Chunk { data: data.into() },
            timestamp: Utc::now(),
        }
    }

    /// Construct a `block_complete` event.
    pub fn block_complete(block_id: impl Into<String>, success: bool) -> Self {
        ExecutionEvent {
            kind: EventKind::BlockComplete,
            block_id: Some(block_id.into()),
            agent_name: None,
            payload: EventPayload::BlockComplete { success },
            timestamp: Utc::now(),
        }
    }

    /// Construct a `complete` event carrying the execution's final result.
    pub fn complete(result: serde_json::Value) -> Self {
        ExecutionEvent {
            kind: EventKind::Complete,
            block_id: None,
            agent_name: None,
            payload: EventPayload::Complete { result },
            timestamp: Utc::now(),
        }
    }

    /// Construct an `error` event.
    pub fn error(error: impl Into<String>) -> Self {
        ExecutionEvent {
            kind: EventKind::Error,
            block_id: None,
            agent_name: None,
            payload: EventPayload::Error { error: error.into() },
            timestamp: Utc::now(),
        }
    }

    /// True for the two kinds that legally terminate an event stream (invariant 2).
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, EventKind::Complete | EventKind::Error)
    }
}

/// Per-execution event bus: one broadcast sender, cloned for every live subscriber, plus the
/// full in-order history so a subscriber joining mid-execution can be caught up before tailing.
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
    history: std::sync::Mutex<Vec<ExecutionEvent>>,
}

impl EventBus {
    /// Construct a new bus with the given broadcast buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender, history: std::sync::Mutex::new(Vec::new()) }
    }

    /// Append an event to the history and fan it out to any live subscribers. Never blocks: a
    /// lagging or absent subscriber cannot slow down the producer.
    pub fn emit(&self, event: ExecutionEvent) {
        self.history.lock().expect("event bus history mutex poisoned").push(event.clone());
        // A broadcast send errors only when there are zero receivers, which is a normal
        // condition (no one is watching this execution live) — not a failure to surface.
        let _ = self.sender.send(event);
    }

    /// Snapshot of every event emitted so far, in order.
    pub fn snapshot(&self) -> Vec<ExecutionEvent> {
        self.history.lock().expect("event bus history mutex poisoned").clone()
    }

    /// Subscribe to the live tail. Combine with [`EventBus::snapshot`] (taken first) to give a
    /// joining subscriber "snapshot, then live tail" semantics without a gap: events emitted
    /// between the snapshot call and the subscribe call may be delivered twice by the caller's
    /// own bookkeeping, which the HTTP layer's SSE handler dedupes by event count.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}
