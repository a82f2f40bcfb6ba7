//! S2: parallel block with a failing participant and an aggregator that must never see the
//! failure's error text. Exercised directly against the pattern executor's public API (as opposed
//! to through a design), since per-agent-distinguishable scripted responses require per-agent
//! clients, and `Runner` intentionally shares one chat transport across a whole process (§4.4:
//! one vendor identity in play at a time).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use agentmesh::agent::AgentClient;
use agentmesh::chat_client::scripted::{Script, ScriptedChatClient};
use agentmesh::events::EventBus;
use agentmesh::patterns::{parallel, AgentOutcome, PatternContext};
use agentmesh::{Agent, AgentRole};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn s2_parallel_with_aggregator_excludes_failed_agent_text() {
    let x = Agent::new("X", "sys", AgentRole::Worker);
    let y = Agent::new("Y", "sys", AgentRole::Worker);
    let z = Agent::new("Z", "List successful outputs", AgentRole::Moderator);

    let clients: HashMap<_, _> = [
        ("X".to_string(), Arc::new(AgentClient::new(Arc::new(ScriptedChatClient::fixed("X", "X-OUT")), Duration::from_secs(5)))),
        ("Y".to_string(), Arc::new(AgentClient::new(Arc::new(ScriptedChatClient::failing("Y", "vendor down")), Duration::from_secs(5)))),
        (
            "Z".to_string(),
            Arc::new(AgentClient::new(
                Arc::new(
                    ScriptedChatClient::fixed("Z", "_")
                        .with_override("=== From X ===\nX-OUT\n\ntask", Script::Fixed("synthesis: X-OUT only".to_string())),
                ),
                Duration::from_secs(5),
            )),
        ),
    ]
    .into_iter()
    .collect();

    let bus = EventBus::new(64);
    let ctx = PatternContext { clients: &clients, event_bus: &bus, block_id: "b2", cwd: None, agent_context_overrides: HashMap::new() };

    let result = parallel::execute(&ctx, &[x, y], Some(&z), "task", None, CancellationToken::new()).await.unwrap();

    assert!(matches!(result.per_agent_outputs["X"], AgentOutcome::Success(_)));
    assert!(matches!(result.per_agent_outputs["Y"], AgentOutcome::Failed(_)));
    assert_eq!(result.final_output, "synthesis: X-OUT only");
    assert!(!result.final_output.contains("vendor down"));
}

#[tokio::test]
async fn block_completes_even_though_one_participant_failed() {
    let x = Agent::new("X", "sys", AgentRole::Worker);
    let y = Agent::new("Y", "sys", AgentRole::Worker);
    let clients: HashMap<_, _> = [
        ("X".to_string(), Arc::new(AgentClient::new(Arc::new(ScriptedChatClient::fixed("X", "X-OUT")), Duration::from_secs(5)))),
        ("Y".to_string(), Arc::new(AgentClient::new(Arc::new(ScriptedChatClient::failing("Y", "boom")), Duration::from_secs(5)))),
    ]
    .into_iter()
    .collect();
    let bus = EventBus::new(64);
    let ctx = PatternContext { clients: &clients, event_bus: &bus, block_id: "b2", cwd: None, agent_context_overrides: HashMap::new() };

    let result = parallel::execute(&ctx, &[x, y], None, "task", None, CancellationToken::new()).await.unwrap();
    assert_eq!(result.final_output, "=== From X ===\nX-OUT");
}
