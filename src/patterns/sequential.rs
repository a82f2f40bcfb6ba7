//! Sequential pattern (§4.2): agents run strictly in declared order, each seeing the previous
//! agent's output appended to its own task. Grounded on this codebase's round-robin multi-agent
//! collaboration mode, narrowed from "many rounds" to a single pass.

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::PatternError;

use super::{labelled_join, run_agent_relayed, AgentOutcome, BlockResult, PatternContext};

/// Execute a sequential block. One failure aborts the block and propagates (per spec); earlier
/// agents' outputs remain visible in `per_agent_outputs` even though the block as a whole fails.
pub async fn execute(
    ctx: &PatternContext<'_>,
    agents: &[Agent],
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    let mut result = BlockResult::default();
    let mut prior_output: Option<String> = None;

    for agent in agents {
        if cancel.is_cancelled() {
            return Err(PatternError::Agent(crate::error::AgentError::Cancelled));
        }

        let agent_context = ctx.context_for(&agent.name, context);

        // §4.2: the previous agent's output is concatenated after this agent's own task, not
        // folded into the leading context like an inbound design edge would be.
        let effective_task = match &prior_output {
            Some(prev) => format!("{task}\n\n{}", labelled_join([("previous", prev.as_str())])),
            None => task.to_string(),
        };

        let outcome = run_agent_relayed(ctx, agent, &effective_task, agent_context.as_deref(), cancel.clone()).await;
        let failure = match &outcome {
            AgentOutcome::Success(text) => {
                prior_output = Some(text.clone());
                None
            }
            AgentOutcome::Failed(msg) => Some(msg.clone()),
        };
        result.per_agent_outputs.insert(agent.name.clone(), outcome);
        if let Some(msg) = failure {
            return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
        }
    }

    result.final_output = prior_output.unwrap_or_default();
    Ok(result)
}
