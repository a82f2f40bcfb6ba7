//! The Design Graph Runner (§4.3): executes a validated [`Design`] — a DAG of blocks — with a
//! ready-set scheduler under a configurable concurrency cap, per-block credential/workspace
//! isolation via the [`Broker`], and context assembly across block-level and agent-level edges.
//!
//! Nothing upstream has a component like this (`Orchestration` there is single-block); the
//! scheduling shape here is grounded on the DAG-runner design in
//! `other_examples/2f2fefba_pcastone-orca__src-crates-langgraph-core-src-lib.rs.rs`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{Agent, AgentClient};
use crate::broker::Broker;
use crate::design::{Block, Connection, Design, Pattern};
use crate::error::{PatternError, RunnerError};
use crate::events::{EventBus, ExecutionEvent};
use crate::patterns::{self, labelled_join, AgentOutcome, BlockResult, PatternContext};
use crate::store::{ExecutionRecord, ExecutionStatus, ExecutionStore};

/// The outcome of running a design to completion (or to cancellation).
pub struct DesignRunOutcome {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub results: HashMap<String, BlockResult>,
    pub event_bus: Arc<EventBus>,
    pub error: Option<String>,
}

/// Runs designs and standalone pattern blocks against a single shared agent transport.
///
/// A single [`AgentClient`] serves every agent in every block: this engine materializes one
/// active credential profile at a time (§4.4), so there is exactly one vendor identity in play
/// per process: per-agent, per-vendor routing is out of scope here.
pub struct Runner {
    client: Arc<AgentClient>,
    broker: Arc<Broker>,
    store: Arc<dyn ExecutionStore>,
    max_parallel_blocks: usize,
}

impl Runner {
    pub fn new(client: Arc<AgentClient>, broker: Arc<Broker>, store: Arc<dyn ExecutionStore>, max_parallel_blocks: usize) -> Self {
        Runner { client, broker, store, max_parallel_blocks: max_parallel_blocks.max(1) }
    }

    /// Execute one block directly, outside of any design (§6 "pattern endpoints (direct,
    /// non-design)"). No broker-managed workspace beyond the block's own `git_repo`, no
    /// persistence beyond the caller-supplied bus. Blocks until the block settles; the HTTP
    /// layer's non-streaming pattern endpoint awaits this directly, while its streaming endpoint
    /// uses [`Runner::spawn_block_standalone`] instead to get the bus back before completion.
    pub async fn execute_block_standalone(
        &self,
        block: &Block,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<(BlockResult, Arc<EventBus>), PatternError> {
        let bus = Arc::new(EventBus::new(256));
        bus.emit(ExecutionEvent::start());
        let result = run_block(self.client.clone(), self.broker.clone(), block, task, cancel, bus.as_ref()).await;
        emit_block_outcome(&bus, &block.id, &result);
        result.map(|r| (r, bus))
    }

    /// Like [`Runner::execute_block_standalone`], but returns the block's [`EventBus`]
    /// immediately and runs the block in the background — what the HTTP layer's streaming
    /// pattern endpoint needs so it can start relaying chunk events as soon as the first one
    /// arrives instead of waiting for the whole block to settle.
    pub fn spawn_block_standalone(&self, block: Block, task: String, cancel: CancellationToken) -> Arc<EventBus> {
        let bus = Arc::new(EventBus::new(256));
        let bus_task = bus.clone();
        let client = self.client.clone();
        let broker = self.broker.clone();
        tokio::spawn(async move {
            bus_task.emit(ExecutionEvent::start());
            let result = run_block(client, broker, &block, &task, cancel, bus_task.as_ref()).await;
            emit_block_outcome(&bus_task, &block.id, &result);
        });
        bus
    }

    /// Execute a whole design (§4.3), generating a fresh execution id.
    pub async fn execute_design(&self, design: &Design, task: &str, cancel: CancellationToken) -> Result<DesignRunOutcome, RunnerError> {
        self.execute_design_with_id(Uuid::new_v4(), design, task, cancel).await
    }

    /// Execute a whole design (§4.3) under a caller-chosen execution id. Validates first;
    /// persists a record through `self.store`; runs ready blocks concurrently up to
    /// `max_parallel_blocks`; returns once every reachable block has settled or `cancel` has
    /// tripped. The caller-chosen id lets the Deployment Executor (§4.6) hand back
    /// `{execution_id, status_url}` before the run it names has completed.
    pub async fn execute_design_with_id(
        &self,
        execution_id: Uuid,
        design: &Design,
        task: &str,
        cancel: CancellationToken,
    ) -> Result<DesignRunOutcome, RunnerError> {
        design.validate()?;

        let mut record = ExecutionRecord::new(Some(design.id.clone()));
        record.id = execution_id;
        self.store.create(record.clone()).await;

        record.status = ExecutionStatus::Running;
        self.store.update(execution_id, record.clone()).await;

        let bus = Arc::new(EventBus::new(512));
        bus.emit(ExecutionEvent::start());

        let mut in_degree: HashMap<String, usize> =
            design.blocks.iter().map(|b| (b.id.clone(), design.predecessors_of(&b.id).len())).collect();

        let mut completed: HashMap<String, BlockResult> = HashMap::new();
        let mut failed_blocks: HashSet<String> = HashSet::new();
        let mut first_error: Option<String> = None;
        let mut remaining = design.blocks.len();

        // Seed the ready queue from the topological order rather than iterating `in_degree`
        // directly, so launch order is deterministic instead of following `HashMap` iteration.
        let mut pending_launch: VecDeque<String> =
            design.topological_order().into_iter().filter(|id| in_degree.get(id).copied() == Some(0)).collect();

        let mut joinset: tokio::task::JoinSet<(String, Result<BlockResult, PatternError>)> = tokio::task::JoinSet::new();
        let mut in_flight = 0usize;

        loop {
            while in_flight < self.max_parallel_blocks {
                let Some(block_id) = pending_launch.pop_front() else { break };

                let preds = design.predecessors_of(&block_id);
                if preds.iter().any(|p| failed_blocks.contains(*p)) {
                    remaining -= 1;
                    continue;
                }
                if cancel.is_cancelled() {
                    remaining -= 1;
                    continue;
                }

                let block = design.find_block(&block_id).expect("known block id").clone();
                log::debug!("launching block {block_id} with agents [{}]", block.agent_names().collect::<Vec<_>>().join(", "));
                let context = assemble_context(design, &block_id, &completed, task);
                let agent_overrides = assemble_agent_overrides(design, &block_id, &completed);
                let clients = self.clients_for(&block);
                let broker = self.broker.clone();
                let bus_task = bus.clone();
                let block_cancel = cancel.child_token();
                let git_repo = block.git_repo.clone();
                let task_owned = task.to_string();

                joinset.spawn(async move {
                    bus_task.emit(ExecutionEvent::status(Some(block_id.clone()), "block started"));
                    if let Err(e) = broker.restore_active_credentials().await {
                        let err = PatternError::Agent(crate::error::AgentError::Unavailable(e.to_string()));
                        bus_task.emit(ExecutionEvent::error(err.to_string()));
                        return (block_id, Err(err));
                    }
                    let workspace = match broker.acquire_workspace(git_repo.as_deref()).await {
                        Ok(ws) => ws,
                        Err(e) => {
                            let err = PatternError::Agent(crate::error::AgentError::Unavailable(e.to_string()));
                            bus_task.emit(ExecutionEvent::error(err.to_string()));
                            return (block_id, Err(err));
                        }
                    };
                    let cwd: PathBuf = workspace.path().to_path_buf();
                    let ctx = PatternContext {
                        clients: &clients,
                        event_bus: bus_task.as_ref(),
                        block_id: &block_id,
                        cwd: Some(&cwd),
                        agent_context_overrides: agent_overrides,
                    };
                    let result = dispatch(&block, &ctx, &task_owned, context.as_deref(), block_cancel).await;
                    bus_task.emit(ExecutionEvent::block_complete(block_id.clone(), result.is_ok()));
                    (block_id, result)
                });
                in_flight += 1;
            }

            if remaining == 0 {
                break;
            }

            let Some(joined) = joinset.join_next().await else { break };
            let (block_id, result) = joined.expect("block task panicked");
            in_flight -= 1;
            remaining -= 1;

            match result {
                Ok(block_result) => {
                    record.results.insert(block_id.clone(), block_result_json(&block_result));
                    self.store.update(execution_id, record.clone()).await;
                    completed.insert(block_id.clone(), block_result);
                }
                Err(e) => {
                    failed_blocks.insert(block_id.clone());
                    first_error.get_or_insert_with(|| format!("block {block_id} failed: {e}"));
                }
            }

            for successor in &design.blocks {
                if design.predecessors_of(&successor.id).contains(&block_id.as_str()) {
                    let deg = in_degree.get_mut(&successor.id).expect("known block id");
                    *deg -= 1;
                    if *deg == 0 {
                        pending_launch.push_back(successor.id.clone());
                    }
                }
            }
        }

        let status = if cancel.is_cancelled() {
            ExecutionStatus::Cancelled
        } else if !failed_blocks.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        record.status = status;
        record.completed_at = Some(Utc::now());
        record.in_progress = false;
        record.error = first_error.clone();
        record.events = bus.snapshot();
        self.store.update(execution_id, record).await;

        match status {
            ExecutionStatus::Completed => {
                let result_json = serde_json::to_value(
                    completed.iter().map(|(k, v)| (k.clone(), block_result_json(v))).collect::<HashMap<_, _>>(),
                )
                .unwrap_or(serde_json::Value::Null);
                bus.emit(ExecutionEvent::complete(result_json));
            }
            _ => {
                bus.emit(ExecutionEvent::error(first_error.clone().unwrap_or_else(|| "execution cancelled".to_string())));
            }
        }

        Ok(DesignRunOutcome { execution_id, status, results: completed, event_bus: bus, error: first_error })
    }

    fn clients_for(&self, block: &Block) -> HashMap<String, Arc<AgentClient>> {
        block.agents.iter().map(|a| (a.name.clone(), self.client.clone())).collect()
    }
}

/// Dispatch one block to its pattern executor, splitting the block's agent roster into the
/// named special role (manager/aggregator/moderator/router) and the remaining participants.
async fn dispatch(
    block: &Block,
    ctx: &PatternContext<'_>,
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    match &block.pattern {
        Pattern::Sequential => patterns::sequential::execute(ctx, &block.agents, task, context, cancel).await,
        Pattern::Parallel { aggregator } => {
            let agg = aggregator.as_deref().and_then(|name| block.find_agent(name)).cloned();
            let participants = others(block, aggregator.as_deref());
            patterns::parallel::execute(ctx, &participants, agg.as_ref(), task, context, cancel).await
        }
        Pattern::Hierarchical { manager } => {
            let manager_agent = block.find_agent(manager).expect("validated by Design::validate").clone();
            let workers = others(block, Some(manager.as_str()));
            patterns::hierarchical::execute(ctx, &manager_agent, &workers, task, context, cancel).await
        }
        Pattern::Debate { moderator, rounds } => {
            let mod_agent = moderator.as_deref().and_then(|name| block.find_agent(name)).cloned();
            let participants = others(block, moderator.as_deref());
            patterns::debate::execute(ctx, &participants, mod_agent.as_ref(), *rounds, task, context, cancel).await
        }
        Pattern::Routing { router } => {
            let router_agent = block.find_agent(router).expect("validated by Design::validate").clone();
            let specialists = others(block, Some(router.as_str()));
            patterns::routing::execute(ctx, &router_agent, &specialists, task, context, cancel).await
        }
        Pattern::Reflection => unreachable!("reflection blocks are rejected by Design::validate"),
    }
}

fn others(block: &Block, excluded: Option<&str>) -> Vec<Agent> {
    block.agents.iter().filter(|a| Some(a.name.as_str()) != excluded).cloned().collect()
}

/// Acquire a workspace and dispatch one block, shared by [`Runner::execute_block_standalone`] and
/// [`Runner::spawn_block_standalone`] so the two only differ in when they return to the caller.
async fn run_block(
    client: Arc<AgentClient>,
    broker: Arc<Broker>,
    block: &Block,
    task: &str,
    cancel: CancellationToken,
    bus: &EventBus,
) -> Result<BlockResult, PatternError> {
    broker
        .restore_active_credentials()
        .await
        .map_err(|e| PatternError::Agent(crate::error::AgentError::Unavailable(e.to_string())))?;
    let workspace = broker
        .acquire_workspace(block.git_repo.as_deref())
        .await
        .map_err(|e| PatternError::Agent(crate::error::AgentError::Unavailable(e.to_string())))?;
    let clients: HashMap<String, Arc<AgentClient>> = block.agents.iter().map(|a| (a.name.clone(), client.clone())).collect();
    let ctx = PatternContext {
        clients: &clients,
        event_bus: bus,
        block_id: &block.id,
        cwd: Some(workspace.path()),
        agent_context_overrides: HashMap::new(),
    };
    dispatch(block, &ctx, task, None, cancel).await
}

/// Emit the `block_complete` and terminal `complete`/`error` events for a standalone block run.
fn emit_block_outcome(bus: &EventBus, block_id: &str, result: &Result<BlockResult, PatternError>) {
    bus.emit(ExecutionEvent::block_complete(block_id.to_string(), result.is_ok()));
    match result {
        Ok(r) => bus.emit(ExecutionEvent::complete(block_result_json(r))),
        Err(e) => bus.emit(ExecutionEvent::error(e.to_string())),
    }
}

/// Context a block B receives (§4.3 "Context assembly"): the labelled, declared-order join of its
/// predecessors' `final_output` (source block id ascending), or the root invocation task if B has
/// no predecessors at all ("isolated blocks ... still execute; they see the root task").
fn assemble_context(design: &Design, block_id: &str, completed: &HashMap<String, BlockResult>, root_task: &str) -> Option<String> {
    let mut preds = design.predecessors_of(block_id);
    if preds.is_empty() {
        return Some(root_task.to_string());
    }
    preds.sort_unstable();

    let pieces: Vec<(&str, &str)> =
        preds.into_iter().filter_map(|pred| completed.get(pred).map(|r| (pred, r.final_output.as_str()))).collect();
    if pieces.is_empty() {
        None
    } else {
        Some(labelled_join(pieces))
    }
}

/// Per-agent context overrides from agent-level edges targeting block `block_id` (§4.3): the
/// named target agent receives the named source agent's specific output instead of the
/// block-level aggregate. Multiple sources targeting the same agent are labelled-joined, source
/// block id ascending, same as the block-level rule.
fn assemble_agent_overrides(design: &Design, block_id: &str, completed: &HashMap<String, BlockResult>) -> HashMap<String, String> {
    let mut by_target: HashMap<String, Vec<(String, String)>> = HashMap::new();
    for conn in &design.connections {
        if let Connection::Agent(edge) = conn {
            if edge.target_block != block_id {
                continue;
            }
            if let Some(text) =
                completed.get(&edge.source_block).and_then(|r| r.per_agent_outputs.get(&edge.source_agent)).and_then(AgentOutcome::ok_text)
            {
                by_target.entry(edge.target_agent.clone()).or_default().push((edge.source_block.clone(), text.to_string()));
            }
        }
    }

    by_target
        .into_iter()
        .map(|(agent, mut sources)| {
            sources.sort_by(|a, b| a.0.cmp(&b.0));
            let joined = labelled_join(sources.iter().map(|(b, t)| (b.as_str(), t.as_str())));
            (agent, joined)
        })
        .collect()
}

pub(crate) fn block_result_json(result: &BlockResult) -> serde_json::Value {
    let per_agent: serde_json::Map<String, serde_json::Value> = result
        .per_agent_outputs
        .iter()
        .map(|(name, outcome)| {
            let value = match outcome {
                AgentOutcome::Success(text) => serde_json::json!({ "status": "success", "output": text }),
                AgentOutcome::Failed(msg) => serde_json::json!({ "status": "failed", "error": msg }),
            };
            (name.clone(), value)
        })
        .collect();
    serde_json::json!({ "final_output": result.final_output, "per_agent_outputs": per_agent })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::agent::AgentRole;
    use crate::chat_client::scripted::{Script, ScriptedChatClient};
    use crate::design::{AgentConnection, BlockConnection};
    use crate::store::InMemoryExecutionStore;

    fn runner_with(client: ScriptedChatClient) -> (Runner, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        // A short cancel_grace keeps tests against ScriptedChatClient::hanging() fast: the grace
        // window always fully elapses since that client never resolves on its own.
        let agent_client = Arc::new(AgentClient::with_limits(Arc::new(client), Duration::from_secs(5), Duration::from_millis(20), 8));
        let broker = Arc::new(Broker::new(dir.path().join("credentials"), dir.path()));
        let store = Arc::new(InMemoryExecutionStore::new());
        (Runner::new(agent_client, broker, store, 4), dir)
    }

    fn seq_block(id: &str, agent_name: &str) -> Block {
        Block {
            id: id.to_string(),
            pattern: Pattern::Sequential,
            agents: vec![Agent::new(agent_name, "sys", AgentRole::Worker)],
            task: "go".to_string(),
            git_repo: None,
        }
    }

    #[tokio::test]
    async fn s3_design_dag_with_agent_level_rewiring() {
        // B1 (parallel, agents a,b) -> B2 (sequential, agents c,d).
        // Edges: B1.a -> B2.c (agent-level), B1 -> B2 (block-level).
        // c should see a's specific output; d should see B1's block-level aggregate.
        let a = Agent::new("a", "sys", AgentRole::Worker);
        let b = Agent::new("b", "sys", AgentRole::Worker);
        let c = Agent::new("c", "sys", AgentRole::Worker);
        let d = Agent::new("d", "sys", AgentRole::Worker);

        let block1 = Block { id: "b1".to_string(), pattern: Pattern::Parallel { aggregator: None }, agents: vec![a, b], task: "task".to_string(), git_repo: None };
        let block2 = Block { id: "b2".to_string(), pattern: Pattern::Sequential, agents: vec![c, d], task: "task".to_string(), git_repo: None };

        let design = Design {
            id: "d1".to_string(),
            name: "n".to_string(),
            blocks: vec![block1, block2],
            connections: vec![
                Connection::Agent(AgentConnection { source_block: "b1".into(), source_agent: "a".into(), target_block: "b2".into(), target_agent: "c".into() }),
                Connection::Block(BlockConnection { source_block: "b1".into(), target_block: "b2".into() }),
            ],
        };

        // A single shared client (one vendor identity per process, per this runner's own docs)
        // echoes every call's exact input, so each agent's output is a faithful record of the
        // context it actually received — no hand-crafted overrides needed to tell c's and d's
        // inputs apart.
        let client = ScriptedChatClient::echoing("shared", |s| s.to_string());
        let (runner, _dir) = runner_with(client);
        let outcome = runner.execute_design(&design, "task", CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Completed);
        let b2 = &outcome.results["b2"];

        let c_out = match &b2.per_agent_outputs["c"] {
            AgentOutcome::Success(text) => text.clone(),
            other => panic!("unexpected: {other:?}"),
        };
        assert!(c_out.contains("From b1 ==="), "c should see a's output via the agent-level edge: {c_out}");
        assert!(!c_out.contains("From b ==="), "c's agent-level override must not carry b's output: {c_out}");

        let d_out = match &b2.per_agent_outputs["d"] {
            AgentOutcome::Success(text) => text.clone(),
            other => panic!("unexpected: {other:?}"),
        };
        assert!(d_out.contains("From b1 ==="), "d should see b1's block-level aggregate: {d_out}");
        assert!(d_out.contains("From b ==="), "d's block-level context must carry b's output too: {d_out}");
    }

    #[tokio::test]
    async fn s6_cancelling_mid_flight_stops_every_agent_in_the_running_block() {
        let p = Agent::new("p", "sys", AgentRole::Worker);
        let q = Agent::new("q", "sys", AgentRole::Worker);
        let block = Block { id: "b1".to_string(), pattern: Pattern::Parallel { aggregator: None }, agents: vec![p, q], task: "task".to_string(), git_repo: None };
        let design = Design { id: "d1".to_string(), name: "n".to_string(), blocks: vec![block], connections: vec![] };

        let (runner, _dir) = runner_with(ScriptedChatClient::hanging("shared"));
        let cancel = CancellationToken::new();
        let cancel_for_run = cancel.clone();

        let handle = tokio::spawn(async move {
            let design = design;
            runner.execute_design(&design, "task", cancel_for_run).await
        });

        tokio::task::yield_now().await;
        cancel.cancel();

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Cancelled);
        assert!(!outcome.results.contains_key("b1"), "a cancelled block must not leave a completed result behind");
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_store_creates_a_record() {
        let (runner, _dir) = runner_with(ScriptedChatClient::fixed("x", "never runs"));
        let block1 = seq_block("b1", "x");
        let block2 = seq_block("b2", "y");
        let design = Design {
            id: "d1".to_string(),
            name: "n".to_string(),
            blocks: vec![block1, block2],
            connections: vec![
                Connection::Block(BlockConnection { source_block: "b1".into(), target_block: "b2".into() }),
                Connection::Block(BlockConnection { source_block: "b2".into(), target_block: "b1".into() }),
            ],
        };
        let err = runner.execute_design(&design, "task", CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RunnerError::DesignCyclic));
    }

    #[tokio::test]
    async fn failed_predecessor_blocks_its_dependent_but_not_siblings() {
        let failing = seq_block("b1", "f");
        let sibling = seq_block("b_sibling", "s");
        let dependent = seq_block("b2", "dep");

        let design = Design {
            id: "d1".to_string(),
            name: "n".to_string(),
            blocks: vec![failing, sibling, dependent],
            connections: vec![Connection::Block(BlockConnection { source_block: "b1".into(), target_block: "b2".into() })],
        };

        let client = ScriptedChatClient::fixed("f", "_").with_override("task", Script::Fail("vendor down".to_string()));
        // "s" has no override so it falls back to the default Fixed("_") script and succeeds.
        let (runner, _dir) = runner_with(client);
        let outcome = runner.execute_design(&design, "task", CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.results.contains_key("b_sibling"));
        assert!(!outcome.results.contains_key("b2"));
        assert!(!outcome.results.contains_key("b1"));
    }
}
