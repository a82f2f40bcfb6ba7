//! Engine-wide configuration.
//!
//! This struct is intentionally minimal and users construct it however they want — no TOML,
//! YAML, or other config-file parsing dependency is introduced. Every field has a sane default;
//! [`EngineConfig::from_env`] layers in the conventional environment-variable overrides.
//!
//! # Example
//!
//! ```rust
//! use agentmesh::config::EngineConfig;
//!
//! let config = EngineConfig::default();
//! assert_eq!(config.max_parallel_blocks, 4);
//!
//! let config = EngineConfig::default().with_max_parallel_blocks(16);
//! assert_eq!(config.max_parallel_blocks, 16);
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the orchestration engine.
pub struct EngineConfig {
    /// LLM model id used when a request omits one.
    pub default_model: String,
    /// Upper bound on concurrent blocks per execution.
    pub max_parallel_blocks: usize,
    /// Upper bound on concurrent agent calls across the process.
    pub max_parallel_agents: usize,
    /// Per-agent call timeout.
    pub agent_timeout: Duration,
    /// Grace window given to an in-flight agent call after cancellation.
    pub cancel_grace: Duration,
    /// Default `cwd` for blocks with no `git_repo`.
    pub project_root: PathBuf,
    /// Where the restored credential profile is materialized.
    pub credentials_path: PathBuf,
    /// If true (default), a schedule tick is skipped rather than queued while a prior run for
    /// the same schedule is still active.
    pub schedule_skip_if_active: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_model: "gpt-4.1-nano".to_string(),
            max_parallel_blocks: 4,
            max_parallel_agents: 8,
            agent_timeout: Duration::from_secs(60),
            cancel_grace: Duration::from_secs(5),
            project_root: PathBuf::from("."),
            credentials_path: PathBuf::from(".agentmesh/credentials"),
            schedule_skip_if_active: true,
        }
    }
}

impl EngineConfig {
    /// Override [`EngineConfig::default_model`].
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Override [`EngineConfig::max_parallel_blocks`].
    pub fn with_max_parallel_blocks(mut self, n: usize) -> Self {
        self.max_parallel_blocks = n;
        self
    }

    /// Override [`EngineConfig::max_parallel_agents`].
    pub fn with_max_parallel_agents(mut self, n: usize) -> Self {
        self.max_parallel_agents = n;
        self
    }

    /// Override [`EngineConfig::agent_timeout`].
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Override [`EngineConfig::project_root`].
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// Build a config from [`EngineConfig::default`] with environment-variable overrides applied:
    /// `AGENTMESH_DEFAULT_MODEL`, `AGENTMESH_MAX_PARALLEL_BLOCKS`, `AGENTMESH_MAX_PARALLEL_AGENTS`,
    /// `AGENTMESH_AGENT_TIMEOUT_SECS`, `AGENTMESH_PROJECT_ROOT`, `AGENTMESH_CREDENTIALS_PATH`.
    /// Unset or unparsable variables are left at their default value.
    pub fn from_env() -> Self {
        let mut config = EngineConfig::default();
        if let Ok(v) = std::env::var("AGENTMESH_DEFAULT_MODEL") {
            config.default_model = v;
        }
        if let Ok(v) = std::env::var("AGENTMESH_MAX_PARALLEL_BLOCKS") {
            if let Ok(n) = v.parse() {
                config.max_parallel_blocks = n;
            }
        }
        if let Ok(v) = std::env::var("AGENTMESH_MAX_PARALLEL_AGENTS") {
            if let Ok(n) = v.parse() {
                config.max_parallel_agents = n;
            }
        }
        if let Ok(v) = std::env::var("AGENTMESH_AGENT_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                config.agent_timeout = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("AGENTMESH_PROJECT_ROOT") {
            config.project_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("AGENTMESH_CREDENTIALS_PATH") {
            config.credentials_path = PathBuf::from(v);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_table() {
        let config = EngineConfig::default();
        assert_eq!(config.max_parallel_blocks, 4);
        assert_eq!(config.max_parallel_agents, 8);
        assert!(config.schedule_skip_if_active);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = EngineConfig::default()
            .with_default_model("gpt-4o")
            .with_max_parallel_blocks(2);
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.max_parallel_blocks, 2);
    }
}
