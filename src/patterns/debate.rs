//! Debate pattern (§4.2): a fixed number of rounds where every agent sees every other agent's
//! previous-round output, optionally closed out by a moderator. Grounded on this codebase's
//! debate collaboration mode, with its similarity-based early-convergence cutoff dropped in
//! favor of a fixed round count (§9 decision, recorded in `DESIGN.md`).

use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::error::PatternError;

use super::{labelled_join, run_agent_relayed, AgentOutcome, BlockResult, PatternContext};

/// Execute a debate block over exactly `rounds` rounds. In round 1 every agent sees the root
/// `context`; from round 2 on, every agent sees the previous round's labelled outputs from every
/// agent, itself included, in declared order. If `moderator` is given, it runs once after the final round over
/// the last round's labelled outputs and its text becomes `final_output`; otherwise `final_output`
/// is the labelled join of the final round's outputs.
///
/// A round aborts the block if any participant fails in it (debate has no partial-failure
/// tolerance: every voice must be present for the next round's cross-pollination to be
/// meaningful).
pub async fn execute(
    ctx: &PatternContext<'_>,
    agents: &[Agent],
    moderator: Option<&Agent>,
    rounds: u32,
    task: &str,
    context: Option<&str>,
    cancel: CancellationToken,
) -> Result<BlockResult, PatternError> {
    if agents.is_empty() {
        return Err(PatternError::MissingRole("debate participant".to_string()));
    }
    let rounds = rounds.max(1);
    let mut result = BlockResult::default();
    let mut previous_round: Vec<(String, String)> = Vec::new();

    for round in 0..rounds {
        if cancel.is_cancelled() {
            return Err(PatternError::Agent(crate::error::AgentError::Cancelled));
        }

        let mut this_round = Vec::with_capacity(agents.len());
        for agent in agents {
            let round_context = if round == 0 {
                ctx.context_for(&agent.name, context)
            } else {
                let all: Vec<(&str, &str)> = previous_round
                    .iter()
                    .map(|(name, text)| (name.as_str(), text.as_str()))
                    .collect();
                ctx.context_for(&agent.name, Some(labelled_join(all).as_str()))
            };

            let outcome = run_agent_relayed(ctx, agent, task, round_context.as_deref(), cancel.clone()).await;
            let key = format!("{}#round{}", agent.name, round + 1);
            match &outcome {
                AgentOutcome::Success(text) => this_round.push((agent.name.clone(), text.clone())),
                AgentOutcome::Failed(msg) => {
                    let msg = msg.clone();
                    result.per_agent_outputs.insert(key, outcome);
                    return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
                }
            }
            result.per_agent_outputs.insert(key, outcome);
        }
        previous_round = this_round;
    }

    let final_round_join =
        labelled_join(previous_round.iter().map(|(name, text)| (name.as_str(), text.as_str())));

    result.final_output = match moderator {
        Some(mod_agent) => {
            let mod_context = ctx.context_for(&mod_agent.name, Some(final_round_join.as_str()));
            let outcome = run_agent_relayed(ctx, mod_agent, task, mod_context.as_deref(), cancel).await;
            let text = match &outcome {
                AgentOutcome::Success(text) => text.clone(),
                AgentOutcome::Failed(msg) => {
                    let msg = msg.clone();
                    result.per_agent_outputs.insert(format!("{}#close", mod_agent.name), outcome);
                    return Err(PatternError::Agent(crate::error::AgentError::Internal(msg)));
                }
            };
            result.per_agent_outputs.insert(format!("{}#close", mod_agent.name), outcome);
            text
        }
        None => final_round_join,
    };

    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::agent::{AgentClient, AgentRole};
    use crate::chat_client::scripted::{Script, ScriptedChatClient};
    use crate::events::EventBus;

    #[tokio::test]
    async fn s4_two_rounds_with_moderator_makes_exactly_five_calls() {
        // Two debaters, two rounds, plus one moderator close = 5 agent calls total.
        let p = Agent::new("P", "Pro", AgentRole::Specialist);
        let q = Agent::new("Q", "Con", AgentRole::Specialist);
        let m = Agent::new("M", "Moderator", AgentRole::Moderator);

        let p_client = Arc::new(ScriptedChatClient::echoing("P", |s| format!("P says about [{s}]")));
        let q_client = Arc::new(ScriptedChatClient::echoing("Q", |s| format!("Q says about [{s}]")));
        let m_client = Arc::new(ScriptedChatClient::fixed("M", "final verdict"));

        let clients: HashMap<_, _> = [
            ("P".to_string(), Arc::new(AgentClient::new(p_client.clone(), std::time::Duration::from_secs(5)))),
            ("Q".to_string(), Arc::new(AgentClient::new(q_client.clone(), std::time::Duration::from_secs(5)))),
            ("M".to_string(), Arc::new(AgentClient::new(m_client.clone(), std::time::Duration::from_secs(5)))),
        ]
        .into_iter()
        .collect();

        let bus = EventBus::new(64);
        let ctx = PatternContext {
            clients: &clients,
            event_bus: &bus,
            block_id: "b4",
            cwd: None,
            agent_context_overrides: HashMap::new(),
        };

        let result = execute(&ctx, &[p, q], Some(&m), 2, "topic", None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(p_client.call_count(), 2);
        assert_eq!(q_client.call_count(), 2);
        assert_eq!(m_client.call_count(), 1);
        assert_eq!(result.final_output, "final verdict");
        assert_eq!(result.per_agent_outputs.len(), 5);
    }

    #[tokio::test]
    async fn second_round_sees_own_and_other_agents_first_round_output() {
        let p = Agent::new("P", "Pro", AgentRole::Specialist);
        let q = Agent::new("Q", "Con", AgentRole::Specialist);

        let round2_context = "=== From P ===\nP-R1\n\n=== From Q ===\nQ-R1\n\ntopic";
        let p_client = ScriptedChatClient::echoing("P", |_| "P-R1".to_string())
            .with_override(round2_context, Script::Fixed("P-R2".to_string()));
        let q_client = ScriptedChatClient::echoing("Q", |_| "Q-R1".to_string())
            .with_override(round2_context, Script::Fixed("Q-R2".to_string()));

        let clients: HashMap<_, _> = [
            ("P".to_string(), Arc::new(AgentClient::new(Arc::new(p_client), std::time::Duration::from_secs(5)))),
            ("Q".to_string(), Arc::new(AgentClient::new(Arc::new(q_client), std::time::Duration::from_secs(5)))),
        ]
        .into_iter()
        .collect();

        let bus = EventBus::new(64);
        let ctx = PatternContext {
            clients: &clients,
            event_bus: &bus,
            block_id: "b4",
            cwd: None,
            agent_context_overrides: HashMap::new(),
        };

        let result = execute(&ctx, &[p, q], None, 2, "topic", None, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.final_output, "=== From P ===\nP-R2\n\n=== From Q ===\nQ-R2");
    }
}
