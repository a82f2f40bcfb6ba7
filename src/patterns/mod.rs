//! Pattern Executors: the five ways agents within one block can interact.
//!
//! Each pattern exposes the same shape — `execute(ctx, task, context, cancel) -> BlockResult` —
//! so the Design Graph Runner (§4.3) can treat a block generically once it knows its pattern.
//! Grounded on this codebase's multi-agent collaboration module, with each pattern generalized
//! per its own section below (see `DESIGN.md` for the full grounding ledger).

pub mod debate;
pub mod hierarchical;
pub mod parallel;
pub mod routing;
pub mod sequential;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentClient;
use crate::events::{EventBus, ExecutionEvent};

/// One agent's outcome within a block: either its final text, or the error it failed with.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The agent completed successfully.
    Success(String),
    /// The agent call failed; the message is the error's `Display` text.
    Failed(String),
}

impl AgentOutcome {
    /// The text this outcome contributes to downstream context, or `None` if it failed —
    /// callers assembling an aggregator's/manager's input must exclude failed agents' error
    /// text (§8 scenario S2).
    pub fn ok_text(&self) -> Option<&str> {
        match self {
            AgentOutcome::Success(text) => Some(text),
            AgentOutcome::Failed(_) => None,
        }
    }
}

/// The structured record a pattern executor produces for its block.
#[derive(Debug, Clone, Default)]
pub struct BlockResult {
    /// Every agent's outcome, keyed by name.
    pub per_agent_outputs: HashMap<String, AgentOutcome>,
    /// The block's terminal output, per the owning pattern's definition of "final".
    pub final_output: String,
}

/// Shared dependencies every pattern executor needs to run one block.
pub struct PatternContext<'a> {
    /// Per-agent-name chat clients. A pattern looks up each agent it invokes by name.
    pub clients: &'a HashMap<String, Arc<AgentClient>>,
    /// Where to publish chunk/status events for this block.
    pub event_bus: &'a EventBus,
    /// The block this execution belongs to, for event tagging.
    pub block_id: &'a str,
    /// Working directory threaded into every agent call (from the Broker, §4.4).
    pub cwd: Option<&'a Path>,
    /// Per-agent context overrides from agent-level design edges (§4.3); absent outside a
    /// design-graph invocation.
    pub agent_context_overrides: HashMap<String, String>,
}

impl<'a> PatternContext<'a> {
    /// The context an agent named `agent_name` should see: its override if one was routed to it
    /// by the Design Graph Runner, else the block-level `default_context`.
    pub fn context_for(&self, agent_name: &str, default_context: Option<&str>) -> Option<String> {
        self.agent_context_overrides
            .get(agent_name)
            .cloned()
            .or_else(|| default_context.map(|s| s.to_string()))
    }
}

/// Run one agent call and relay its chunks through the block's event bus, returning its
/// [`AgentOutcome`]. Shared by every pattern so chunk-relay/error-capture stays uniform.
pub async fn run_agent_relayed(
    ctx: &PatternContext<'_>,
    agent: &crate::agent::Agent,
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> AgentOutcome {
    let Some(client) = ctx.clients.get(&agent.name) else {
        return AgentOutcome::Failed(format!("no chat client configured for agent {}", agent.name));
    };

    let (tx, mut rx) = mpsc::channel(32);
    let block_id = ctx.block_id.to_string();
    let agent_name = agent.name.clone();
    // Drain the channel inline, concurrently with the call via `join!`, so each chunk is
    // published to the bus as soon as it arrives rather than collected and flushed at the end.
    let relay = async {
        while let Some(chunk) = rx.recv().await {
            ctx.event_bus.emit(ExecutionEvent::chunk(block_id.clone(), agent_name.clone(), chunk.content));
        }
    };

    let call = client.run(agent, task, context, ctx.cwd, tx, cancel);
    let (result, ()) = tokio::join!(call, relay);

    match result {
        Ok(outcome) => AgentOutcome::Success(outcome.final_text),
        Err(e) => AgentOutcome::Failed(e.to_string()),
    }
}

/// Labelled concatenation used throughout the patterns/runner: `=== From <name> ===\n<content>`
/// blocks joined by blank lines, in the order `items` is given.
pub fn labelled_join<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    items
        .into_iter()
        .map(|(name, content)| format!("=== From {name} ===\n{content}"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_join_formats_and_separates_entries() {
        let joined = labelled_join([("a", "A-OUT"), ("b", "B-OUT")]);
        assert_eq!(joined, "=== From a ===\nA-OUT\n\n=== From b ===\nB-OUT");
    }

    #[test]
    fn ok_text_excludes_failed_outcomes() {
        assert_eq!(AgentOutcome::Success("x".to_string()).ok_text(), Some("x"));
        assert_eq!(AgentOutcome::Failed("boom".to_string()).ok_text(), None);
    }
}
