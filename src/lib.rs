// src/lib.rs

//! `agentmesh`: a multi-agent orchestration engine. Composes LLM agents into cooperative
//! computational graphs (the five pattern executors, and arbitrary DAGs of them via the Design
//! Graph Runner), with streaming, cancellation, credential isolation, and execution persistence.

pub mod agent;
pub mod broker;
pub mod chat_client;
pub mod config;
pub mod design;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod events;
pub mod http;
pub mod patterns;
pub mod runner;
pub mod store;

pub use agent::{Agent, AgentClient, AgentRole, AgentRunOutcome};
pub use chat_client::{ChatClient, Message, Role};
pub use config::EngineConfig;
pub use design::{Block, Design, Pattern};
pub use engine::Engine;
pub use error::{AgentError, BrokerError, EngineError, PatternError, RunnerError};
pub use events::{EventBus, ExecutionEvent};
pub use runner::Runner;
pub use store::{ExecutionRecord, ExecutionStatus, ExecutionStore};
