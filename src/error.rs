//! The engine's error taxonomy.
//!
//! Every fallible step returns a typed `Result` — no panics, no exceptions-as-control-flow.
//! Component errors convert into [`EngineError`] via `From` so call sites can use `?` freely;
//! the HTTP layer maps [`EngineError`] variants onto the status codes in the interface surface.
//!
//! # Example
//!
//! ```rust
//! use agentmesh::error::EngineError;
//!
//! let err = EngineError::DesignCyclic;
//! assert_eq!(err.to_string(), "design connections form a cycle");
//! ```

use std::error::Error;
use std::fmt;

/// Errors surfaced by a [`crate::agent::Agent`] call.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// No credentials, or the vendor rejected the ones presented.
    Unavailable(String),
    /// The call exceeded its configured timeout.
    Timeout,
    /// The call was cancelled cooperatively before it completed.
    Cancelled,
    /// The vendor returned a malformed or unexpected response.
    Internal(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Unavailable(msg) => write!(f, "agent unavailable: {msg}"),
            AgentError::Timeout => write!(f, "agent call timed out"),
            AgentError::Cancelled => write!(f, "agent call cancelled"),
            AgentError::Internal(msg) => write!(f, "agent internal error: {msg}"),
        }
    }
}

impl Error for AgentError {}

/// Errors surfaced while executing a single block under a pattern.
#[derive(Debug, Clone)]
pub enum PatternError {
    /// An agent name referenced by a manager plan / router decision does not exist in the block.
    UnknownAgent(String),
    /// A manager's delegation plan or a router's decision could not be parsed.
    MalformedDirective(String),
    /// A named role (manager, router, moderator, aggregator) was required but absent.
    MissingRole(String),
    /// One or more agent calls failed and the pattern's failure policy aborts the block.
    Agent(AgentError),
    /// All agents in the block failed (applies to patterns tolerant of partial failure).
    AllAgentsFailed,
}

impl fmt::Display for PatternError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternError::UnknownAgent(name) => write!(f, "unknown agent referenced: {name}"),
            PatternError::MalformedDirective(msg) => write!(f, "malformed directive: {msg}"),
            PatternError::MissingRole(role) => write!(f, "missing required role: {role}"),
            PatternError::Agent(e) => write!(f, "{e}"),
            PatternError::AllAgentsFailed => write!(f, "all agents in block failed"),
        }
    }
}

impl Error for PatternError {}

impl From<AgentError> for PatternError {
    fn from(e: AgentError) -> Self {
        PatternError::Agent(e)
    }
}

/// Errors surfaced by the credential/workspace broker.
#[derive(Debug, Clone)]
pub enum BrokerError {
    /// The git clone (or other workspace preparation step) failed.
    WorkspaceUnavailable(String),
    /// Credential restore failed to write the materialized profile.
    CredentialWriteFailed(String),
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerError::WorkspaceUnavailable(msg) => write!(f, "workspace unavailable: {msg}"),
            BrokerError::CredentialWriteFailed(msg) => {
                write!(f, "credential restore failed: {msg}")
            }
        }
    }
}

impl Error for BrokerError {}

/// Errors surfaced while executing a design graph.
#[derive(Debug, Clone)]
pub enum RunnerError {
    /// Design validation found a cycle among block connections.
    DesignCyclic,
    /// Design validation found a dangling edge endpoint or duplicate block id.
    InvalidDesign(String),
    /// A block failed; carries the block id and the first underlying cause.
    BlockFailed(String, String),
    /// Workspace/credential preparation failed for a block.
    Broker(BrokerError),
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::DesignCyclic => write!(f, "design connections form a cycle"),
            RunnerError::InvalidDesign(msg) => write!(f, "invalid design: {msg}"),
            RunnerError::BlockFailed(block_id, cause) => {
                write!(f, "block {block_id} failed: {cause}")
            }
            RunnerError::Broker(e) => write!(f, "{e}"),
        }
    }
}

impl Error for RunnerError {}

impl From<BrokerError> for RunnerError {
    fn from(e: BrokerError) -> Self {
        RunnerError::Broker(e)
    }
}

/// Top-level error aggregating every component error family, used at the HTTP boundary.
#[derive(Debug, Clone)]
pub enum EngineError {
    /// Malformed design/pattern payload; rejected before an execution is created.
    InvalidRequest(String),
    /// Design connections form a cycle; rejected before an execution is created.
    DesignCyclic,
    /// No credentials, or the vendor rejected the ones presented.
    AgentUnavailable(String),
    /// An agent call exceeded its configured timeout.
    AgentTimeout,
    /// An agent call was cancelled cooperatively.
    AgentCancelled,
    /// The vendor returned a malformed or unexpected response.
    AgentInternal(String),
    /// Workspace preparation (e.g. git clone) failed.
    WorkspaceUnavailable(String),
    /// A block failed; carries the block id and first underlying cause.
    BlockFailed(String, String),
    /// A design execution failed; aggregates one or more block failures.
    ExecutionFailed(String),
    /// Event/result persistence failed. Logged, non-fatal to the execution itself.
    StoreUnavailable(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::DesignCyclic => write!(f, "design connections form a cycle"),
            EngineError::AgentUnavailable(msg) => write!(f, "agent unavailable: {msg}"),
            EngineError::AgentTimeout => write!(f, "agent call timed out"),
            EngineError::AgentCancelled => write!(f, "agent call cancelled"),
            EngineError::AgentInternal(msg) => write!(f, "agent internal error: {msg}"),
            EngineError::WorkspaceUnavailable(msg) => write!(f, "workspace unavailable: {msg}"),
            EngineError::BlockFailed(block_id, cause) => {
                write!(f, "block {block_id} failed: {cause}")
            }
            EngineError::ExecutionFailed(msg) => write!(f, "execution failed: {msg}"),
            EngineError::StoreUnavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl Error for EngineError {}

impl From<AgentError> for EngineError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::Unavailable(msg) => EngineError::AgentUnavailable(msg),
            AgentError::Timeout => EngineError::AgentTimeout,
            AgentError::Cancelled => EngineError::AgentCancelled,
            AgentError::Internal(msg) => EngineError::AgentInternal(msg),
        }
    }
}

impl From<PatternError> for EngineError {
    fn from(e: PatternError) -> Self {
        match e {
            PatternError::Agent(agent_err) => agent_err.into(),
            other => EngineError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<BrokerError> for EngineError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::WorkspaceUnavailable(msg) => EngineError::WorkspaceUnavailable(msg),
            BrokerError::CredentialWriteFailed(msg) => EngineError::AgentUnavailable(msg),
        }
    }
}

impl From<RunnerError> for EngineError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::DesignCyclic => EngineError::DesignCyclic,
            RunnerError::InvalidDesign(msg) => EngineError::InvalidRequest(msg),
            RunnerError::BlockFailed(block_id, cause) => EngineError::BlockFailed(block_id, cause),
            RunnerError::Broker(broker_err) => broker_err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_converts_into_engine_error() {
        let e: EngineError = AgentError::Timeout.into();
        assert!(matches!(e, EngineError::AgentTimeout));
    }

    #[test]
    fn runner_error_converts_into_engine_error() {
        let e: EngineError = RunnerError::DesignCyclic.into();
        assert!(matches!(e, EngineError::DesignCyclic));
    }

    #[test]
    fn pattern_error_display_matches_variant() {
        let e = PatternError::UnknownAgent("ghost".to_string());
        assert_eq!(e.to_string(), "unknown agent referenced: ghost");
    }
}
