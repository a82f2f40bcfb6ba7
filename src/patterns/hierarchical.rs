//! Hierarchical pattern (§4.2): a manager agent delegates to named workers, then synthesizes
//! their outputs. Grounded on this codebase's hierarchical collaboration mode, generalized from
//! a static list-of-layers into a manager-produced dynamic delegation plan, and on its
//! brace-counting technique for pulling a structured fragment out of free-form model text.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::PatternError;

use super::{labelled_join, run_agent_relayed, AgentOutcome, BlockResult, PatternContext};

/// One entry in a manager's delegation plan.
#[derive(Debug, Clone, Deserialize)]
pub struct DelegationStep {
    /// Must name an existing worker in the block; unknown names are a manager error.
    pub worker: String,
    /// The subtask text handed to that worker.
    pub subtask: String,
}

/// Execute a hierarchical block: `manager` plans, named `workers` run (sequentially, per spec
/// default), then `manager` synthesizes. Workers run in declared-plan order; duplicate worker
/// names in the plan are allowed and produce independent invocations.
pub async fn execute(
    ctx: &PatternContext<'_>,
    manager: &Agent,
    workers: &[Agent],
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    let mut result = BlockResult::default();

    let manager_context = ctx.context_for(&manager.name, context);
    let plan_outcome =
        run_agent_relayed(ctx, manager, &plan_prompt(task, workers), manager_context.as_deref(), cancel.clone()).await;
    let plan_text = match &plan_outcome {
        AgentOutcome::Success(text) => text.clone(),
        AgentOutcome::Failed(msg) => {
            let msg = msg.clone();
            result.per_agent_outputs.insert(manager.name.clone(), plan_outcome);
            return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
        }
    };

    let plan = parse_delegation_plan(&plan_text)
        .map_err(PatternError::MalformedDirective)?;

    for step in &plan {
        if !workers.iter().any(|w| w.name == step.worker) {
            return Err(PatternError::UnknownAgent(step.worker.clone()));
        }
    }

    let mut worker_outputs = Vec::with_capacity(plan.len());
    for step in &plan {
        if cancel.is_cancelled() {
            return Err(PatternError::Agent(crate::error::AgentError::Cancelled));
        }
        let worker = workers.iter().find(|w| w.name == step.worker).expect("validated above");
        let worker_context = ctx.context_for(&worker.name, None);
        let outcome = run_agent_relayed(ctx, worker, &step.subtask, worker_context.as_deref(), cancel.clone()).await;
        if let Some(text) = outcome.ok_text() {
            worker_outputs.push((step.worker.as_str(), text.to_string()));
        }
        result.per_agent_outputs.insert(format!("{}#{}", step.worker, worker_outputs.len()), outcome);
    }

    let synthesis_input =
        labelled_join(worker_outputs.iter().map(|(name, text)| (*name, text.as_str())));
    let synth_prompt = format!("Synthesize the following worker outputs into a final answer.\n\n{synthesis_input}");
    let synth_outcome = run_agent_relayed(ctx, manager, &synth_prompt, None, cancel).await;
    result.final_output = match &synth_outcome {
        AgentOutcome::Success(text) => text.clone(),
        AgentOutcome::Failed(msg) => {
            let msg = msg.clone();
            result.per_agent_outputs.insert(format!("{}#synthesis", manager.name), synth_outcome);
            return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
        }
    };
    result.per_agent_outputs.insert(format!("{}#synthesis", manager.name), synth_outcome);

    Ok(result)
}

fn plan_prompt(task: &str, workers: &[Agent]) -> String {
    let names: Vec<_> = workers.iter().map(|w| w.name.as_str()).collect();
    format!(
        "Task: {task}\n\nAvailable workers: {}\n\nRespond with a JSON array of delegation steps, \
         each shaped like {{\"worker\": \"<name>\", \"subtask\": \"<text>\"}}.",
        names.join(", ")
    )
}

/// Extract the first balanced `[...]` fragment from free-form text and parse it as a delegation
/// plan. The same brace/bracket-counting scan this codebase already uses to pull structured
/// fragments (tool calls) out of model prose, generalized to array fragments.
fn parse_delegation_plan(text: &str) -> Result<Vec<DelegationStep>, String> {
    let fragment = extract_balanced(text, '[', ']')
        .ok_or_else(|| "no JSON array found in manager's delegation plan".to_string())?;
    serde_json::from_str(&fragment).map_err(|e| format!("could not parse delegation plan: {e}"))
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    for (offset, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                let end = start + offset + ch.len_utf8();
                return Some(text[start..end].to_string());
            }
        }
    }
    None
}
