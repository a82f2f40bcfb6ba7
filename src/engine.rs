//! The `Engine` facade: one process-wide handle bundling the agent transport, broker, execution
//! store, Design Graph Runner, and Deployment Executor behind a single `Arc`-shareable type.
//!
//! Nothing upstream wires its pieces together quite this way (the prior entry points construct
//! an `LLMSession` or `Orchestration` directly per call site); this facade exists because §2's
//! data-flow narrative describes one long-lived process serving many concurrent HTTP requests
//! against shared runner/store/broker state, which needs somewhere to live. It is grounded on the
//! same "one struct owns the shared `Arc`s, cheap to clone, passed as `State`" idiom
//! `mcp_http_adapter.rs` uses for its own adapter state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::AgentClient;
use crate::broker::Broker;
use crate::chat_client::ChatClient;
use crate::config::EngineConfig;
use crate::deployment::DeploymentRegistry;
use crate::design::Design;
use crate::error::RunnerError;
use crate::runner::Runner;
use crate::store::{ExecutionRecord, ExecutionStore, InMemoryExecutionStore};

/// Process-wide engine state. Cheap to clone (every field is an `Arc`); construct once per
/// process and share it across every HTTP worker thread.
pub struct Engine {
    pub config: EngineConfig,
    pub client: Arc<AgentClient>,
    pub broker: Arc<Broker>,
    pub store: Arc<dyn ExecutionStore>,
    pub runner: Arc<Runner>,
    pub deployments: Arc<DeploymentRegistry>,
    /// Cancellation tokens for executions started directly against a design (as opposed to
    /// through a registered deployment, which [`DeploymentRegistry`] tracks itself).
    executions: Arc<AsyncMutex<HashMap<Uuid, CancellationToken>>>,
}

impl Engine {
    /// Build a fresh engine around one chat transport, wiring up an in-memory execution store.
    pub fn new(chat: Arc<dyn ChatClient>, config: EngineConfig) -> Self {
        let client = Arc::new(AgentClient::with_limits(chat, config.agent_timeout, config.cancel_grace, config.max_parallel_agents));
        let broker = Arc::new(Broker::from_config(&config));
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let runner = Arc::new(Runner::new(client.clone(), broker.clone(), store.clone(), config.max_parallel_blocks));
        let deployments = Arc::new(DeploymentRegistry::new(runner.clone(), store.clone()));
        Engine { config, client, broker, store, runner, deployments, executions: Arc::new(AsyncMutex::new(HashMap::new())) }
    }

    /// `POST /designs/{id}/execute` (§6): validate and start a design run in the background,
    /// returning its execution id and status URL immediately.
    pub async fn trigger_design(&self, design: Design, task: String) -> Result<(Uuid, String), RunnerError> {
        design.validate()?;

        let execution_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.executions.lock().await.insert(execution_id, cancel.clone());

        let runner = self.runner.clone();
        let executions = self.executions.clone();
        tokio::spawn(async move {
            let _ = runner.execute_design_with_id(execution_id, &design, &task, cancel).await;
            executions.lock().await.remove(&execution_id);
        });

        Ok((execution_id, format!("/executions/{execution_id}")))
    }

    /// `POST /executions/{execution_id}/cancel` (§6). A no-op success for an unknown or
    /// already-terminal execution id, mirroring [`DeploymentRegistry::cancel`].
    pub async fn cancel_execution(&self, execution_id: Uuid) -> bool {
        if let Some(token) = self.executions.lock().await.get(&execution_id) {
            token.cancel();
        }
        true
    }

    /// `GET /executions/{execution_id}` (§6).
    pub async fn execution_status(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.store.get(execution_id).await
    }
}
