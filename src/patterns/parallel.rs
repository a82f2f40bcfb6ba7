//! Parallel pattern (§4.2), with an optional aggregator. All agents run concurrently on the
//! same task with no cross-visibility; a single failure is tolerated. Grounded on this
//! codebase's parallel collaboration mode, generalized with an aggregator stage and
//! partial-failure tolerance neither of which the source implements.

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::PatternError;

use super::{labelled_join, run_agent_relayed, AgentOutcome, BlockResult, PatternContext};

/// Execute a parallel block.
///
/// Every agent in `agents` runs concurrently on `task`. If `aggregator` is given, it receives
/// the joined, labelled outputs of every agent that *succeeded* (§8 S2: a failed agent's error
/// text never reaches the aggregator) and its output becomes `final_output`; otherwise
/// `final_output` is the same labelled join in declared order. The block fails only if every
/// agent failed.
pub async fn execute(
    ctx: &PatternContext<'_>,
    agents: &[Agent],
    aggregator: Option<&Agent>,
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    let mut result = BlockResult::default();

    let futures = agents.iter().map(|agent| {
        let agent_context = ctx.context_for(&agent.name, context);
        run_agent_relayed(ctx, agent, task, agent_context.as_deref(), cancel.clone())
    });
    let outcomes = futures_util::future::join_all(futures).await;

    let mut any_succeeded = false;
    for (agent, outcome) in agents.iter().zip(outcomes.into_iter()) {
        if matches!(outcome, AgentOutcome::Success(_)) {
            any_succeeded = true;
        }
        result.per_agent_outputs.insert(agent.name.clone(), outcome);
    }

    if !any_succeeded {
        return Err(PatternError::AllAgentsFailed);
    }

    // Declared-order, labelled-by-name join of the surviving (successful) agents (invariant 7).
    let survivors: Vec<(&str, &str)> = agents
        .iter()
        .filter_map(|a| result.per_agent_outputs.get(&a.name).and_then(AgentOutcome::ok_text).map(|t| (a.name.as_str(), t)))
        .collect();
    let joined = labelled_join(survivors);

    result.final_output = match aggregator {
        Some(agg) => {
            let agg_context = ctx.context_for(&agg.name, Some(joined.as_str()));
            let agg_outcome = run_agent_relayed(ctx, agg, task, agg_context.as_deref(), cancel).await;
            let text = match &agg_outcome {
                AgentOutcome::Success(text) => text.clone(),
                AgentOutcome::Failed(msg) => {
                    result.per_agent_outputs.insert(agg.name.clone(), agg_outcome);
                    return Err(PatternError::Agent(crate::error::AgentError::Internal(msg.clone())));
                }
            };
            result.per_agent_outputs.insert(agg.name.clone(), agg_outcome);
            text
        }
        None => joined,
    };

    Ok(result)
}
