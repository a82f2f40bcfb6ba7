//! The Agent Client: executes one agent's turn against a [`ChatClient`], with streaming,
//! cancellation, timeout, and usage accounting.
//!
//! Agents here are stateless between calls — each [`AgentClient::run`] takes the full
//! `(system_prompt, task, context)` it needs rather than accumulating a hidden session. That
//! mirrors the lower-level "build a fresh message list every call" path this engine's chat
//! transport is grounded on, generalized so a fresh [`AgentClient`] is cheap to spin up per
//! concurrent call rather than cloned from a shared mutable session.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::chat_client::{ChatClient, Message, MessageChunk, Role, TokenUsage};
use crate::error::AgentError;

/// The role an [`Agent`] plays within its block. Interpreted by pattern executors; carries no
/// behavior of its own — polymorphism here is data, not a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Directs other agents (hierarchical manager).
    Manager,
    /// Executes a delegated subtask.
    Worker,
    /// One of several candidates a router or debate dispatches to.
    Specialist,
    /// Synthesizes or closes out a multi-agent interaction (debate closer, parallel aggregator).
    Moderator,
}

/// A named LLM configuration: a system prompt and a role, immutable for the lifetime of an
/// execution. Owned by the [`crate::design::Block`] that declares it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    /// Unique within the owning block.
    pub name: String,
    /// Primes the agent's behavior for every call it participates in.
    pub system_prompt: String,
    /// Interpreted by the pattern executor running this agent's block.
    pub role: AgentRole,
}

impl Agent {
    /// Construct a new agent.
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>, role: AgentRole) -> Self {
        Agent { name: name.into(), system_prompt: system_prompt.into(), role }
    }
}

/// Tokens in/out and an optional final assembled text, returned by a completed call.
#[derive(Debug, Clone, Default)]
pub struct AgentUsage {
    /// Input/output/total token counts, if the backing [`ChatClient`] reports them.
    pub tokens: Option<TokenUsage>,
}

/// The result of draining an [`AgentClient::run`] chunk stream to completion.
pub struct AgentRunOutcome {
    /// Concatenation of every text-bearing chunk, in order.
    pub final_text: String,
    /// Usage accounting for the call, if available.
    pub usage: AgentUsage,
}

/// Executes one agent turn against a [`ChatClient`].
///
/// `cwd` is accepted for forward compatibility with vendor-side tool use (§4.1): this client
/// does not itself enforce or interpret it, it is handed to callers that build workspace-aware
/// prompts. Isolation of on-disk effects is the Broker's responsibility, not this one's.
///
/// A single `semaphore` shared by every call this client makes enforces `max_parallel_agents`
/// (§5 "a second cap limits in-flight agent calls across the process") independently of however
/// many blocks or patterns are fanning out concurrently.
pub struct AgentClient {
    chat: Arc<dyn ChatClient>,
    timeout: Duration,
    cancel_grace: Duration,
    semaphore: Arc<Semaphore>,
}

impl AgentClient {
    /// Construct a client wrapping the given chat transport with a per-call timeout. No
    /// process-wide concurrency cap and the spec's default cancel grace window (a few seconds);
    /// use [`AgentClient::with_limits`] to apply §6's `max_parallel_agents`/`cancel_grace` knobs.
    pub fn new(chat: Arc<dyn ChatClient>, timeout: Duration) -> Self {
        AgentClient { chat, timeout, cancel_grace: Duration::from_secs(5), semaphore: Arc::new(Semaphore::new(Semaphore::MAX_PERMITS)) }
    }

    /// Construct a client with an explicit cancellation grace window and process-wide
    /// concurrency cap, per the §6 configuration table.
    pub fn with_limits(chat: Arc<dyn ChatClient>, timeout: Duration, cancel_grace: Duration, max_parallel_agents: usize) -> Self {
        AgentClient { chat, timeout, cancel_grace, semaphore: Arc::new(Semaphore::new(max_parallel_agents.max(1))) }
    }

    /// Run one agent turn.
    ///
    /// Sends `(system_prompt, task, context)` as a `[System, User]` message pair (context, when
    /// present, is prefixed onto the task per the block/agent-level edge concatenation format).
    /// `cwd` is accepted per the §4.1 contract and threaded through for vendor-side tool use;
    /// this client does not itself read or enforce it. Streams chunks onto `chunk_tx` as they
    /// arrive; the channel is closed when the call terminates, whether by completion, error,
    /// timeout, or cancellation. Returns the final assembled text and usage once the stream is
    /// fully drained.
    ///
    /// Every call first polls `cancel` so that an already-cancelled token never starts a new
    /// vendor request (invariant 5: no new agent calls start after the cancel token trips).
    pub async fn run(
        &self,
        agent: &Agent,
        task: &str,
        context: Option<&str>,
        _cwd: Option<&std::path::Path>,
        chunk_tx: mpsc::Sender<MessageChunk>,
        cancel: CancellationToken,
    ) -> Result<AgentRunOutcome, AgentError> {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        // Wait for a process-wide slot (§5 max_parallel_agents) before issuing the request;
        // an already-cancelled wait must not start a new vendor call either.
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            permit = self.semaphore.acquire() => permit.expect("agent call semaphore is never closed"),
        };

        let user_content = match context {
            Some(ctx) if !ctx.is_empty() => format!("{ctx}\n\n{task}"),
            _ => task.to_string(),
        };
        let messages = vec![
            Message::new(Role::System, agent.system_prompt.clone()),
            Message::new(Role::User, user_content),
        ];

        // Run the call on its own task so cancellation can race it: the call keeps running
        // while we wait out the grace window, instead of being dropped the instant `cancel`
        // trips.
        let mut call = tokio::spawn(run_call(self.chat.clone(), messages, chunk_tx));

        let final_text = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Grace window to acknowledge cancellation (§5) before the call is abandoned.
                let _ = tokio::time::timeout(self.cancel_grace, &mut call).await;
                call.abort();
                return Err(AgentError::Cancelled);
            }
            result = tokio::time::timeout(self.timeout, &mut call) => match result {
                Ok(Ok(inner)) => inner?,
                Ok(Err(_)) => return Err(AgentError::Internal("agent call task panicked".to_string())),
                Err(_) => {
                    call.abort();
                    return Err(AgentError::Timeout);
                }
            },
        };

        let usage = AgentUsage { tokens: self.chat.get_last_usage().await };
        Ok(AgentRunOutcome { final_text, usage })
    }
}

/// The actual vendor call, run on its own task so [`AgentClient::run`] can race it against
/// cancellation/timeout without losing the ability to keep waiting on it afterward.
async fn run_call(
    chat: Arc<dyn ChatClient>,
    messages: Vec<Message>,
    chunk_tx: mpsc::Sender<MessageChunk>,
) -> Result<String, AgentError> {
    match chat.send_stream(&messages).await {
        Ok(Some(mut stream)) => {
            let mut final_text = String::new();
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(chunk) => {
                        final_text.push_str(&chunk.content);
                        // Backpressure: a full channel stalls this call rather than buffering
                        // unboundedly, per §4.1.
                        if chunk_tx.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => return Err(AgentError::Internal(e.to_string())),
                }
            }
            Ok(final_text)
        }
        Ok(None) => {
            // Non-streaming transport: fall back to a single request/response call and relay
            // it as one chunk so downstream consumers see a uniform chunk stream.
            let response = chat.send(&messages).await.map_err(|e| AgentError::Internal(e.to_string()))?;
            let text = response.content.to_string();
            let _ = chunk_tx.send(MessageChunk { content: text.clone(), finish_reason: Some("stop".to_string()) }).await;
            Ok(text)
        }
        Err(e) => Err(AgentError::Internal(e.to_string())),
    }
}
