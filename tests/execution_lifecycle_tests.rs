//! Invariants 1, 2, and 10: every terminal execution has `completed_at >= started_at`; every
//! event stream ends with exactly one of `complete`/`error`; and a polling consumer's
//! `results` map only ever grows, never shrinks, until a terminal state — exercised through
//! `Engine`, the façade the HTTP layer itself drives.

use std::sync::Arc;
use std::time::Duration;

use agentmesh::chat_client::scripted::ScriptedChatClient;
use agentmesh::design::{Block, Connection, Design, Pattern};
use agentmesh::events::EventKind;
use agentmesh::{Agent, AgentRole, Engine, EngineConfig, ExecutionStatus};

fn design(id: &str) -> Design {
    Design {
        id: id.to_string(),
        name: "n".to_string(),
        blocks: vec![Block {
            id: "b1".to_string(),
            pattern: Pattern::Sequential,
            agents: vec![Agent::new("x", "sys", AgentRole::Worker)],
            task: "go".to_string(),
            git_repo: None,
        }],
        connections: Vec::<Connection>::new(),
    }
}

async fn poll_until_terminal(engine: &Engine, execution_id: uuid::Uuid) -> agentmesh::ExecutionRecord {
    for _ in 0..200 {
        if let Some(record) = engine.execution_status(execution_id).await {
            if record.status.is_terminal() {
                return record;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("execution never reached a terminal state");
}

#[tokio::test]
async fn terminal_execution_has_completed_at_after_started_at() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_project_root(dir.path());
    let engine = Engine::new(Arc::new(ScriptedChatClient::fixed("x", "done")), config);

    let (execution_id, _status_url) = engine.trigger_design(design("d1"), "go".to_string()).await.unwrap();
    let record = poll_until_terminal(&engine, execution_id).await;

    assert_eq!(record.status, ExecutionStatus::Completed);
    let completed_at = record.completed_at.expect("terminal execution must set completed_at");
    assert!(completed_at >= record.started_at);
}

#[tokio::test]
async fn execution_is_observed_in_the_running_state_before_it_terminates() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_project_root(dir.path());
    let engine = Engine::new(Arc::new(ScriptedChatClient::fixed("x", "done")), config);

    let (execution_id, _status_url) = engine.trigger_design(design("d1"), "go".to_string()).await.unwrap();

    let mut saw_running = false;
    for _ in 0..200 {
        if let Some(record) = engine.execution_status(execution_id).await {
            if record.status == ExecutionStatus::Running {
                saw_running = true;
                break;
            }
            if record.status.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(saw_running, "a polling caller must be able to observe the running state between pending and terminal");
}

#[tokio::test]
async fn event_stream_terminates_with_exactly_one_complete_or_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_project_root(dir.path());
    let engine = Engine::new(Arc::new(ScriptedChatClient::fixed("x", "done")), config);

    let (execution_id, _status_url) = engine.trigger_design(design("d1"), "go".to_string()).await.unwrap();
    let record = poll_until_terminal(&engine, execution_id).await;

    let terminal_events: Vec<_> = record.events.iter().filter(|e| matches!(e.kind, EventKind::Complete | EventKind::Error)).collect();
    assert_eq!(terminal_events.len(), 1, "exactly one terminal event must be emitted");
    assert!(record.events.last().unwrap().kind == EventKind::Complete || record.events.last().unwrap().kind == EventKind::Error);
}

#[tokio::test]
async fn results_only_grow_until_terminal_state() {
    let a = Agent::new("a", "sys", AgentRole::Worker);
    let b = Agent::new("b", "sys", AgentRole::Worker);
    let design = Design {
        id: "d2".to_string(),
        name: "n".to_string(),
        blocks: vec![
            Block { id: "b1".to_string(), pattern: Pattern::Sequential, agents: vec![a], task: "go".to_string(), git_repo: None },
            Block { id: "b2".to_string(), pattern: Pattern::Sequential, agents: vec![b], task: "go".to_string(), git_repo: None },
        ],
        connections: vec![Connection::Block(agentmesh::design::BlockConnection { source_block: "b1".into(), target_block: "b2".into() })],
    };

    let dir = tempfile::tempdir().unwrap();
    let config = EngineConfig::default().with_project_root(dir.path());
    let engine = Engine::new(Arc::new(ScriptedChatClient::echoing("shared", |s| s.to_string())), config);

    let (execution_id, _status_url) = engine.trigger_design(design, "go".to_string()).await.unwrap();

    let mut max_seen = 0usize;
    loop {
        if let Some(record) = engine.execution_status(execution_id).await {
            assert!(record.results.len() >= max_seen, "results must never shrink before a terminal state");
            max_seen = record.results.len();
            if record.status.is_terminal() {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
