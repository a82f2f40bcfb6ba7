//! Invariant 9 (idempotent credential restore) plus the wiring check from §4.1/§4.4: running a
//! block through `Runner` actually restores credentials from the active profile before the first
//! agent call, rather than leaving `Broker::restore_credentials` reachable only from its own unit
//! tests.

use std::sync::Arc;
use std::time::Duration;

use agentmesh::agent::AgentClient;
use agentmesh::broker::{Broker, CREDENTIAL_PROFILE_ENV_VAR};
use agentmesh::chat_client::scripted::ScriptedChatClient;
use agentmesh::design::{Block, Pattern};
use agentmesh::runner::Runner;
use agentmesh::store::InMemoryExecutionStore;
use agentmesh::{Agent, AgentRole};
use tokio_util::sync::CancellationToken;

// Serializes tests in this file that touch the process-wide credential profile env var, since
// `std::env::set_var` affects the whole process.
static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[tokio::test]
async fn running_a_block_restores_the_active_credential_profile() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cred_path = dir.path().join("credentials");

    unsafe { std::env::set_var(CREDENTIAL_PROFILE_ENV_VAR, "test-profile-bytes") };

    let client = Arc::new(AgentClient::new(Arc::new(ScriptedChatClient::fixed("x", "done")), Duration::from_secs(5)));
    let broker = Arc::new(Broker::new(&cred_path, dir.path()));
    let store = Arc::new(InMemoryExecutionStore::new());
    let runner = Runner::new(client, broker, store, 4);

    let block = Block { id: "b1".to_string(), pattern: Pattern::Sequential, agents: vec![Agent::new("x", "sys", AgentRole::Worker)], task: "go".to_string(), git_repo: None };
    runner.execute_block_standalone(&block, "go", CancellationToken::new()).await.unwrap();

    unsafe { std::env::remove_var(CREDENTIAL_PROFILE_ENV_VAR) };

    let contents = tokio::fs::read(&cred_path).await.expect("block execution must restore credentials before running any agent");
    assert_eq!(contents, b"test-profile-bytes");
}

#[tokio::test]
async fn restore_is_idempotent_for_identical_content() {
    let dir = tempfile::tempdir().unwrap();
    let cred_path = dir.path().join("credentials");
    let broker = Broker::new(&cred_path, dir.path());

    broker.restore_credentials(Some(b"same-token")).await.unwrap();
    let first_mtime = tokio::fs::metadata(&cred_path).await.unwrap().modified().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    broker.restore_credentials(Some(b"same-token")).await.unwrap();
    let second_mtime = tokio::fs::metadata(&cred_path).await.unwrap().modified().unwrap();

    assert_eq!(first_mtime, second_mtime, "identical profile content must produce exactly one write after the first");
}
