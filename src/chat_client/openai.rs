//! Chat-completions client for OpenAI and OpenAI-compatible HTTP endpoints.
//!
//! This talks the vendor's `/v1/chat/completions` surface directly over [`reqwest`] — the wire
//! protocol itself is an implementation detail the rest of the engine never sees.

use std::error::Error;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::{ChatClient, Message, MessageChunk, MessageChunkStream, MessageStreamFuture, Role, TokenUsage};

/// Shared HTTP client with persistent connection pooling.
///
/// A single client instance keeps TLS sessions and DNS lookups warm, which matters when many
/// concurrent agent calls are in flight against the same upstream.
fn shared_http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build shared HTTP client")
    })
}

fn role_str(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

/// Client wrapper for OpenAI's Chat Completions API (or any OpenAI-compatible deployment).
pub struct OpenAiChatClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    usage: Mutex<Option<TokenUsage>>,
}

impl OpenAiChatClient {
    /// Construct a client against the official OpenAI endpoint.
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::new_with_base_url(api_key, model, "https://api.openai.com/v1")
    }

    /// Construct a client against a custom OpenAI-compatible base URL (no trailing slash).
    pub fn new_with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        OpenAiChatClient {
            http: shared_http_client().clone(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            usage: Mutex::new(None),
        }
    }

    fn body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        let formatted: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": role_str(&m.role), "content": m.content.as_ref()}))
            .collect();
        json!({
            "model": self.model,
            "messages": formatted,
            "stream": stream,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageBody,
}

#[derive(Deserialize)]
struct ChatMessageBody {
    content: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
    total_tokens: usize,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChatStreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn send(&self, messages: &[Message]) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.body(messages, false))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("chat completion request failed ({status}): {text}").into());
        }

        let parsed: ChatCompletionResponse = resp.json().await?;
        if let Some(usage) = parsed.usage {
            *self.usage.lock().await = Some(TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        Ok(Message::new(Role::Assistant, content))
    }

    fn send_stream<'a>(&'a self, messages: &'a [Message]) -> MessageStreamFuture<'a> {
        Box::pin(async move {
            let resp = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&self.body(messages, true))
                .send()
                .await?;

            if !resp.status().is_success() {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                return Err(format!("chat completion stream request failed ({status}): {text}").into());
            }

            let byte_stream = resp.bytes_stream();
            let stream = byte_stream.flat_map(|chunk_result| {
                let lines: Vec<Result<MessageChunk, Box<dyn Error + Send + Sync>>> = match chunk_result {
                    Ok(bytes) => parse_sse_lines(&bytes),
                    Err(e) => vec![Err(Box::new(e) as Box<dyn Error + Send + Sync>)],
                };
                futures_util::stream::iter(lines)
            });

            Ok(Some(Box::pin(stream) as MessageChunkStream))
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

/// Parse one `bytes` frame of an OpenAI `text/event-stream` body into zero or more chunks.
///
/// A single frame may carry multiple `data: ...` lines; `[DONE]` is filtered out.
fn parse_sse_lines(bytes: &[u8]) -> Vec<Result<MessageChunk, Box<dyn Error + Send + Sync>>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(data) = line.strip_prefix("data: ") else { continue };
        if data == "[DONE]" {
            continue;
        }
        match serde_json::from_str::<ChatStreamChunk>(data) {
            Ok(parsed) => {
                for choice in parsed.choices {
                    out.push(Ok(MessageChunk {
                        content: choice.delta.content.unwrap_or_default(),
                        finish_reason: choice.finish_reason,
                    }));
                }
            }
            Err(e) => out.push(Err(Box::new(e) as Box<dyn Error + Send + Sync>)),
        }
    }
    out
}
