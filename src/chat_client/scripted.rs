//! A deterministic [`ChatClient`] double used by the test suite.
//!
//! Scripted responses are keyed by an exact match against the last `User` message's content, or
//! fall back to a per-instance template that echoes the input. This is what lets the pattern and
//! runner tests assert exact call counts, exact content propagation, and exact ordering without
//! talking to a live vendor.

use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChatClient, Message, Role, TokenUsage};

/// What a [`ScriptedChatClient`] does with one call.
#[derive(Clone)]
pub enum Script {
    /// Always return this exact text.
    Fixed(String),
    /// Apply `f` to the content of the last `User` message in the request.
    Echo(fn(&str) -> String),
    /// Fail every call with this message, as an `AgentInternal`-flavored error.
    Fail(String),
    /// Never resolve. Exercises cancellation/timeout races against a call genuinely in flight,
    /// as opposed to an already-cancelled token short-circuiting before any call starts.
    Hang,
}

/// A fake agent backend with exact, inspectable call accounting.
pub struct ScriptedChatClient {
    name: String,
    default_script: Script,
    /// Overrides keyed by exact last-user-message content.
    overrides: HashMap<String, Script>,
    calls: AtomicUsize,
    /// Every request this client has seen, in call order — for assertions on propagated context.
    received: StdMutex<Vec<String>>,
    usage: Mutex<Option<TokenUsage>>,
}

impl ScriptedChatClient {
    /// A client that echoes the last user message through `f` (e.g. `|s| format!("A: {s}")`).
    pub fn echoing(name: impl Into<String>, f: fn(&str) -> String) -> Self {
        ScriptedChatClient {
            name: name.into(),
            default_script: Script::Echo(f),
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
            received: StdMutex::new(Vec::new()),
            usage: Mutex::new(None),
        }
    }

    /// A client that always returns a fixed string, regardless of input.
    pub fn fixed(name: impl Into<String>, output: impl Into<String>) -> Self {
        ScriptedChatClient {
            name: name.into(),
            default_script: Script::Fixed(output.into()),
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
            received: StdMutex::new(Vec::new()),
            usage: Mutex::new(None),
        }
    }

    /// A client that always fails.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        ScriptedChatClient {
            name: name.into(),
            default_script: Script::Fail(message.into()),
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
            received: StdMutex::new(Vec::new()),
            usage: Mutex::new(None),
        }
    }

    /// A client that never responds, for exercising cancellation/timeout while a call is
    /// genuinely in flight.
    pub fn hanging(name: impl Into<String>) -> Self {
        ScriptedChatClient {
            name: name.into(),
            default_script: Script::Hang,
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
            received: StdMutex::new(Vec::new()),
            usage: Mutex::new(None),
        }
    }

    /// Add an exact-match override: when the last user message equals `input`, run `script`
    /// instead of the default.
    pub fn with_override(mut self, input: impl Into<String>, script: Script) -> Self {
        self.overrides.insert(input.into(), script);
        self
    }

    /// Number of `send` calls observed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The last-user-message content of every call, in order.
    pub fn received_inputs(&self) -> Vec<String> {
        self.received.lock().expect("scripted client mutex poisoned").clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn send(&self, messages: &[Message]) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.to_string())
            .unwrap_or_default();
        self.received
            .lock()
            .expect("scripted client mutex poisoned")
            .push(last_user.clone());

        let script = self.overrides.get(&last_user).unwrap_or(&self.default_script);
        match script {
            Script::Fixed(s) => Ok(Message::new(Role::Assistant, s.clone())),
            Script::Echo(f) => Ok(Message::new(Role::Assistant, f(&last_user))),
            Script::Fail(msg) => Err(format!("scripted failure for {}: {msg}", self.name).into()),
            Script::Hang => std::future::pending().await,
        }
    }

    fn model_name(&self) -> &str {
        "scripted-test-model"
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn echo_script_formats_last_user_message() {
        let client = ScriptedChatClient::echoing("a", |s| format!("A: {s}"));
        let resp = client
            .send(&[Message::new(Role::User, "hello")])
            .await
            .unwrap();
        assert_eq!(resp.content.as_ref(), "A: hello");
        assert_eq!(client.call_count(), 1);
        assert_eq!(client.received_inputs(), vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn failing_script_returns_error() {
        let client = ScriptedChatClient::failing("y", "boom");
        let err = client.send(&[Message::new(Role::User, "x")]).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn override_matches_exact_input() {
        let client = ScriptedChatClient::fixed("r", "default")
            .with_override("route me", Script::Fixed("specialist_b".to_string()));
        let resp = client
            .send(&[Message::new(Role::User, "route me")])
            .await
            .unwrap();
        assert_eq!(resp.content.as_ref(), "specialist_b");
    }
}
