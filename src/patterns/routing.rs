//! Routing pattern (§4.2): a router agent picks exactly one specialist to handle the task.
//! Grounded on this codebase's moderated-session dispatch mode, tightened from "moderator settles
//! a multi-party exchange" to a single-hop router → specialist handoff.

use crate::agent::Agent;
use crate::error::PatternError;
use tokio_util::sync::CancellationToken;

use super::{run_agent_relayed, AgentOutcome, BlockResult, PatternContext};

/// Execute a routing block: `router` picks one of `specialists` by name, that specialist alone
/// runs on `task`, and its output becomes `final_output`. The router's own output never appears
/// in `final_output` — only its routing decision is consulted.
pub async fn execute(
    ctx: &PatternContext<'_>,
    router: &Agent,
    specialists: &[Agent],
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    let mut result = BlockResult::default();

    let router_context = ctx.context_for(&router.name, context);
    let decision_outcome =
        run_agent_relayed(ctx, router, &routing_prompt(task, specialists), router_context.as_deref(), cancel.clone())
            .await;
    let decision_text = match &decision_outcome {
        AgentOutcome::Success(text) => text.clone(),
        AgentOutcome::Failed(msg) => {
            let msg = msg.clone();
            result.per_agent_outputs.insert(router.name.clone(), decision_outcome);
            return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
        }
    };
    result.per_agent_outputs.insert(router.name.clone(), decision_outcome);

    let chosen_name = extract_specialist_name(&decision_text, specialists)
        .ok_or_else(|| PatternError::MalformedDirective(format!("no known specialist named in: {decision_text}")))?;
    let specialist = specialists
        .iter()
        .find(|s| s.name == chosen_name)
        .ok_or_else(|| PatternError::UnknownAgent(chosen_name.clone()))?;

    let specialist_context = ctx.context_for(&specialist.name, context);
    let outcome = run_agent_relayed(ctx, specialist, task, specialist_context.as_deref(), cancel).await;
    result.final_output = match outcome.ok_text() {
        Some(text) => text.to_string(),
        None => {
            let msg = match &outcome {
                AgentOutcome::Failed(msg) => msg.clone(),
                _ => unreachable!(),
            };
            result.per_agent_outputs.insert(specialist.name.clone(), outcome);
            return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
        }
    };
    result.per_agent_outputs.insert(specialist.name.clone(), outcome);

    Ok(result)
}

fn routing_prompt(task: &str, specialists: &[Agent]) -> String {
    let names: Vec<_> = specialists.iter().map(|s| s.name.as_str()).collect();
    format!(
        "Task: {task}\n\nAvailable specialists: {}\n\nRespond with only the name of the specialist \
         that should handle this task.",
        names.join(", ")
    )
}

/// The router is expected to answer with (close to) just a specialist's name; match the first
/// specialist whose name appears as a whole word in the decision text, to tolerate minor
/// surrounding prose without requiring a structured-output contract from the router.
fn extract_specialist_name(decision_text: &str, specialists: &[Agent]) -> Option<String> {
    let trimmed = decision_text.trim();
    specialists
        .iter()
        .find(|s| trimmed == s.name || trimmed.split_whitespace().any(|w| w.trim_matches(|c: char| !c.is_alphanumeric()) == s.name))
        .map(|s| s.name.clone())
}
