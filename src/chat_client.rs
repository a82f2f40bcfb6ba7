//! Provider-agnostic transport for a single agent turn.
//!
//! The vendor wire protocol is treated as an opaque capability: this module defines the
//! [`ChatClient`] trait applications implement (or pick one of the two provided
//! implementations) and the shared message/usage types every other component builds on.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use agentmesh::chat_client::{ChatClient, Message, Role};
//! use agentmesh::chat_client::openai::OpenAiChatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAiChatClient::new(&key, "gpt-4.1-nano");
//!
//!     let response = client
//!         .send(&[Message { role: Role::User, content: Arc::from("Who are you?") }])
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```

pub mod openai;
pub mod scripted;

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::error::Error;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The role a [`Message`] was authored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A system authored message that primes or constrains the agent's behavior.
    System,
    /// A user authored message — typically the block's task or propagated context.
    User,
    /// An assistant authored message (model responses or prior-turn exemplars).
    Assistant,
}

/// How many tokens a single call spent on prompt vs. completion.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// A single message exchanged with a [`ChatClient`].
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body. `Arc<str>` so histories can be cheaply cloned across agent calls.
    pub content: Arc<str>,
}

impl Message {
    /// Construct a message from any string-like value.
    pub fn new(role: Role, content: impl Into<Arc<str>>) -> Self {
        Message { role, content: content.into() }
    }
}

/// An incremental piece of a streamed completion.
#[derive(Clone, Debug)]
pub struct MessageChunk {
    /// The incremental content delta in this chunk. May be empty on finish-reason-only chunks.
    pub content: String,
    /// Provider-reported completion reason, mirrored verbatim (e.g. `"stop"`).
    pub finish_reason: Option<String>,
}

/// Stream of message chunks produced by [`ChatClient::send_stream`].
pub type MessageChunkStream =
    Pin<Box<dyn Stream<Item = Result<MessageChunk, Box<dyn Error + Send + Sync>>> + Send>>;

/// Future returned by [`ChatClient::send_stream`].
pub type MessageStreamFuture<'a> = Pin<
    Box<
        dyn std::future::Future<
                Output = Result<Option<MessageChunkStream>, Box<dyn Error + Send + Sync>>,
            > + Send
            + 'a,
    >,
>;

/// Abstraction over one LLM vendor's chat-completion surface.
///
/// Implementations must be `Send + Sync` so a single client can be shared across the
/// concurrent agent calls a block or design may issue. The trait carries no conversation
/// bookkeeping of its own — callers assemble the exact `messages` slice for each call, which is
/// what lets the Agent Client stay stateless between turns (see [`crate::agent::Agent::run`]).
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a full request/response style chat completion.
    async fn send(&self, messages: &[Message]) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Request a streaming response from the provider.
    ///
    /// Implementations that front a non-streaming provider can inherit the default, which
    /// resolves to `Ok(None)`; callers fall back to a single non-streaming `send` in that case.
    fn send_stream<'a>(&'a self, _messages: &'a [Message]) -> MessageStreamFuture<'a> {
        Box::pin(async { Ok(None) })
    }

    /// Identifier of the upstream model (e.g. `"gpt-4.1-nano"`).
    fn model_name(&self) -> &str;

    /// Most recent token usage, if this implementation tracks it.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Shared slot an implementation can persist usage into. Default: no usage reported.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}
