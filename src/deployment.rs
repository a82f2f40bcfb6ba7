//! The Deployment Executor (§4.6): wraps a registered [`Design`] so it can be triggered
//! repeatedly — on demand over HTTP, or on a fixed interval — without a caller re-submitting the
//! design body each time.
//!
//! Nothing upstream has a component like this; its background-trigger-plus-poll shape is
//! grounded on the daemon lifecycle pattern in
//! `other_examples/80c54ebe_groblegark-oddjobs__crates-daemon-src-lifecycle-mod.rs.rs`, adapted
//! from a single long-lived daemon loop to one `tokio::spawn`ed run per trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::design::Design;
use crate::error::RunnerError;
use crate::runner::Runner;
use crate::store::{ExecutionRecord, ExecutionStore};

/// What [`DeploymentRegistry::trigger`] hands back immediately, before the run it names has
/// necessarily completed.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub execution_id: Uuid,
    pub status_url: String,
}

/// A running interval schedule. Dropping or calling [`ScheduleHandle::stop`] ends it; it is not
/// otherwise persisted (§9: schedules are in-memory only, restarting the process clears them).
pub struct ScheduleHandle {
    task: tokio::task::JoinHandle<()>,
}

impl ScheduleHandle {
    /// Stop this schedule. Any run already in flight continues to completion.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Registry of deployments plus the trigger/status/cancel/schedule machinery (§4.6).
pub struct DeploymentRegistry {
    runner: Arc<Runner>,
    store: Arc<dyn ExecutionStore>,
    deployments: StdRwLock<HashMap<String, Arc<Design>>>,
    cancels: Arc<AsyncMutex<HashMap<Uuid, CancellationToken>>>,
}

impl DeploymentRegistry {
    pub fn new(runner: Arc<Runner>, store: Arc<dyn ExecutionStore>) -> Self {
        DeploymentRegistry { runner, store, deployments: StdRwLock::new(HashMap::new()), cancels: Arc::new(AsyncMutex::new(HashMap::new())) }
    }

    /// Register (or replace) a deployment. `deployment_id` is the path segment callers will use
    /// against `GET|POST /deployed/{deployment_id}`; it need not equal `design.id`.
    pub fn register(&self, deployment_id: impl Into<String>, design: Design) {
        self.deployments.write().expect("deployment registry lock poisoned").insert(deployment_id.into(), Arc::new(design));
    }

    /// Remove a deployment. Executions it already triggered are unaffected.
    pub fn unregister(&self, deployment_id: &str) {
        self.deployments.write().expect("deployment registry lock poisoned").remove(deployment_id);
    }

    fn design_for(&self, deployment_id: &str) -> Option<Arc<Design>> {
        self.deployments.read().expect("deployment registry lock poisoned").get(deployment_id).cloned()
    }

    /// `Trigger(design_id, input)` (§4.6): start a background run of the deployment's design and
    /// return `{execution_id, status_url}` immediately, without waiting for it to complete.
    pub async fn trigger(&self, deployment_id: &str, input: &str) -> Result<TriggerOutcome, RunnerError> {
        let design = self
            .design_for(deployment_id)
            .ok_or_else(|| RunnerError::InvalidDesign(format!("no deployment registered for {deployment_id}")))?;
        design.validate()?;

        let execution_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        self.cancels.lock().await.insert(execution_id, cancel.clone());

        let runner = self.runner.clone();
        let input_owned = input.to_string();
        let cancels = self.cancels.clone();
        tokio::spawn(async move {
            let _ = runner.execute_design_with_id(execution_id, &design, &input_owned, cancel).await;
            cancels.lock().await.remove(&execution_id);
        });

        Ok(TriggerOutcome { execution_id, status_url: format!("/deployments/{deployment_id}/logs/{execution_id}") })
    }

    /// `Status(execution_id)` (§4.6): the current persisted snapshot, safe to poll repeatedly.
    pub async fn status(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.store.get(execution_id).await
    }

    /// `Cancel(execution_id)` (§4.6). Trips the execution's cancellation token if it is still
    /// running; a no-op reported as success for an unknown or already-terminal execution id, so
    /// callers never need to race a poll against a cancel.
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        if let Some(token) = self.cancels.lock().await.get(&execution_id) {
            token.cancel();
        }
        true
    }

    /// Recent executions of one deployment's design, for `GET /deployments/{id}/logs`.
    pub async fn logs(&self, deployment_id: &str, limit: usize) -> Vec<ExecutionRecord> {
        let Some(design) = self.design_for(deployment_id) else { return Vec::new() };
        self.store.list(Some(design.id.as_str()), limit).await
    }

    /// Start a fixed-interval schedule for `deployment_id` (§4.6, §9 "drop-on-active"). Each tick
    /// triggers a fresh run with `input`, unless `skip_if_active` is set and the previous tick's
    /// run has not yet reached a terminal state, in which case the tick is dropped rather than
    /// queued. Uses `tokio::time::interval` directly; no cron-expression syntax is supported, by
    /// design (§9).
    pub fn schedule(
        self: &Arc<Self>,
        deployment_id: impl Into<String>,
        input: impl Into<String>,
        interval: Duration,
        skip_if_active: bool,
    ) -> ScheduleHandle {
        let deployment_id = deployment_id.into();
        let input = input.into();
        let registry = self.clone();
        let active = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately; the first *scheduled* run is one interval out
            loop {
                ticker.tick().await;

                if skip_if_active {
                    if active.swap(true, Ordering::SeqCst) {
                        log::debug!("schedule for {deployment_id} skipped tick: previous run still active");
                        continue;
                    }
                } else {
                    active.store(true, Ordering::SeqCst);
                }

                match registry.trigger(&deployment_id, &input).await {
                    Ok(outcome) => {
                        let store = registry.store.clone();
                        let active = active.clone();
                        tokio::spawn(async move {
                            wait_for_terminal(store.as_ref(), outcome.execution_id).await;
                            active.store(false, Ordering::SeqCst);
                        });
                    }
                    Err(e) => {
                        log::warn!("scheduled trigger of {deployment_id} failed: {e}");
                        active.store(false, Ordering::SeqCst);
                    }
                }
            }
        });

        ScheduleHandle { task }
    }
}

async fn wait_for_terminal(store: &dyn ExecutionStore, execution_id: Uuid) {
    loop {
        match store.get(execution_id).await {
            Some(record) if record.status.is_terminal() => return,
            Some(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            None => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::{Agent, AgentClient, AgentRole};
    use crate::broker::Broker;
    use crate::chat_client::scripted::ScriptedChatClient;
    use crate::design::{Block, Pattern};
    use crate::store::{ExecutionStatus, InMemoryExecutionStore};

    fn registry_with(client: ScriptedChatClient) -> (Arc<DeploymentRegistry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let agent_client = Arc::new(AgentClient::new(Arc::new(client), Duration::from_secs(5)));
        let broker = Arc::new(Broker::new(dir.path().join("credentials"), dir.path()));
        let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
        let runner = Arc::new(Runner::new(agent_client, broker, store.clone(), 4));
        (Arc::new(DeploymentRegistry::new(runner, store)), dir)
    }

    fn one_block_design(id: &str) -> Design {
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
            connections: vec![],
        }
    }

    #[tokio::test]
    async fn trigger_returns_immediately_and_status_reaches_completed() {
        let (registry, _dir) = registry_with(ScriptedChatClient::fixed("x", "done"));
        registry.register("my-deployment", one_block_design("d1"));

        let outcome = registry.trigger("my-deployment", "input").await.unwrap();
        assert!(outcome.status_url.contains(&outcome.execution_id.to_string()));

        for _ in 0..50 {
            if let Some(record) = registry.status(outcome.execution_id).await {
                if record.status.is_terminal() {
                    assert_eq!(record.status, ExecutionStatus::Completed);
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("execution never reached a terminal state");
    }

    #[tokio::test]
    async fn trigger_on_unknown_deployment_fails() {
        let (registry, _dir) = registry_with(ScriptedChatClient::fixed("x", "done"));
        let err = registry.trigger("nope", "input").await.unwrap_err();
        assert!(matches!(err, RunnerError::InvalidDesign(_)));
    }

    #[tokio::test]
    async fn cancel_is_a_success_no_op_for_unknown_execution_id() {
        let (registry, _dir) = registry_with(ScriptedChatClient::fixed("x", "done"));
        assert!(registry.cancel(Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn logs_lists_recent_executions_for_the_deployments_design() {
        let (registry, _dir) = registry_with(ScriptedChatClient::fixed("x", "done"));
        registry.register("my-deployment", one_block_design("d1"));
        let first = registry.trigger("my-deployment", "input").await.unwrap();

        for _ in 0..50 {
            if registry.status(first.execution_id).await.is_some_and(|r| r.status.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let logs = registry.logs("my-deployment", 10).await;
        assert!(logs.iter().any(|r| r.id == first.execution_id));
    }
}
