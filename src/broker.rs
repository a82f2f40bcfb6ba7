//! The Credential & Workspace Broker (§4.4): materializes per-block side effects — a restored
//! credential file and, optionally, a freshly cloned git workspace — before any agent call in a
//! block begins, and guarantees their cleanup.
//!
//! Nothing upstream materializes credentials to disk (it threads an API key string straight into
//! a client constructor), so credential restore here is new, grounded directly on this module's
//! own idempotent-write description. The clone step shells out to the system `git` binary via
//! `tokio::process::Command`, the same external-process idiom `tools/bash.rs` already uses for
//! sandboxed command execution — not a git-plumbing crate, since nothing in the retrieval pack
//! shows one in real use.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::BrokerError;

/// A block's working directory, acquired via [`Broker::acquire_workspace`]. Deletion of ephemeral
/// (git-cloned) workspaces is guaranteed by `Drop`, not by an explicit release call: a structured
/// deferred block would only run on a normal return path, but this handle must also clean up when
/// its owning future is cancelled mid-await (dropped out from under a `tokio::select!`), which
/// only `Drop` can observe.
pub struct Workspace {
    path: PathBuf,
    ephemeral: bool,
}

impl Workspace {
    /// The directory agent calls should use as `cwd`.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.ephemeral {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                log::warn!("failed to remove ephemeral workspace {:?}: {e}", self.path);
            }
        }
    }
}

/// Environment variable holding the currently selected credential profile's raw bytes. Profile
/// *selection* (choosing which vendor identity is active) is out of scope (§4.4); this is simply
/// where that out-of-scope mechanism is expected to have deposited the chosen profile, the same
/// env-var idiom this codebase's own `OPEN_AI_SECRET`/`OPENAI_API_KEY` lookups use.
pub const CREDENTIAL_PROFILE_ENV_VAR: &str = "AGENTMESH_CREDENTIAL_PROFILE";

/// Materializes credentials and workspaces for blocks about to run.
pub struct Broker {
    credentials_path: PathBuf,
    project_root: PathBuf,
    profile_env_var: String,
    last_written_hash: Mutex<Option<u64>>,
}

impl Broker {
    /// Construct a broker writing credentials to `credentials_path` and defaulting `cwd` to
    /// `project_root` for blocks with no `git_repo`. Reads the active profile from
    /// [`CREDENTIAL_PROFILE_ENV_VAR`].
    pub fn new(credentials_path: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Broker {
            credentials_path: credentials_path.into(),
            project_root: project_root.into(),
            profile_env_var: CREDENTIAL_PROFILE_ENV_VAR.to_string(),
            last_written_hash: Mutex::new(None),
        }
    }

    /// Like [`Broker::new`], but reads the active profile from `profile_env_var` instead of the
    /// default. Exists mainly so tests can point at a variable nothing else in the process uses.
    pub fn with_profile_env_var(credentials_path: impl Into<PathBuf>, project_root: impl Into<PathBuf>, profile_env_var: impl Into<String>) -> Self {
        Broker {
            credentials_path: credentials_path.into(),
            project_root: project_root.into(),
            profile_env_var: profile_env_var.into(),
            last_written_hash: Mutex::new(None),
        }
    }

    /// Construct a broker from engine configuration.
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Broker::new(config.credentials_path.clone(), config.project_root.clone())
    }

    /// Idempotent credential restore (§4.4, invariant 9). `profile` is the currently selected
    /// profile's raw bytes, sourced from the out-of-scope profile store; `None` means no profile
    /// is selected, in which case this logs a warning and returns `Ok` — agent calls will then
    /// fail with `AgentUnavailable` rather than this hook hanging or erroring.
    ///
    /// A content-hash check against the last write this process performed makes repeated calls
    /// with the same profile a no-op after the first: the file is written at most once per
    /// distinct profile content, regardless of call count.
    pub async fn restore_credentials(&self, profile: Option<&[u8]>) -> Result<(), BrokerError> {
        let Some(bytes) = profile else {
            log::warn!("no credential profile selected; subsequent agent calls will fail with AgentUnavailable");
            return Ok(());
        };

        let hash = content_hash(bytes);
        {
            let mut last = self.last_written_hash.lock().await;
            if *last == Some(hash) {
                return Ok(());
            }
            *last = Some(hash);
        }

        if let Some(parent) = self.credentials_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| BrokerError::CredentialWriteFailed(e.to_string()))?;
        }
        tokio::fs::write(&self.credentials_path, bytes).await.map_err(|e| BrokerError::CredentialWriteFailed(e.to_string()))?;
        restrict_permissions(&self.credentials_path).await?;
        Ok(())
    }

    /// Restore credentials for the profile currently selected via [`Self::profile_env_var`]
    /// (§4.1: "every call is preceded by a credential-restore hook"). Called once per block
    /// before its first agent call; the idempotent-write check in [`Self::restore_credentials`]
    /// keeps repeated calls across blocks in the same run cheap.
    pub async fn restore_active_credentials(&self) -> Result<(), BrokerError> {
        let profile = std::env::var(&self.profile_env_var).ok();
        self.restore_credentials(profile.as_deref().map(str::as_bytes)).await
    }

    /// Acquire the working directory for a block. If `git_repo` is set, performs a shallow clone
    /// (`git clone --depth 1`) into a fresh, uniquely-named directory under `project_root`;
    /// otherwise returns `project_root` itself (never deleted, since it isn't ephemeral).
    ///
    /// Authentication material, if any, must reach `git` through the spawned process's
    /// environment (e.g. `GIT_ASKPASS`, an `https://` token embedded by the caller in `git_repo`
    /// before this call, or an SSH agent socket already present in this process's environment) —
    /// never through argv, so it cannot leak through process listings or this broker's own logs.
    pub async fn acquire_workspace(&self, git_repo: Option<&str>) -> Result<Workspace, BrokerError> {
        let Some(repo) = git_repo else {
            return Ok(Workspace { path: self.project_root.clone(), ephemeral: false });
        };

        let dir = self.project_root.join(format!(".agentmesh-ws-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.map_err(|e| BrokerError::WorkspaceUnavailable(e.to_string()))?;

        let status = tokio::process::Command::new("git")
            .args(["clone", "--depth", "1", repo, "."])
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| BrokerError::WorkspaceUnavailable(e.to_string()))?;

        if !status.success() {
            let _ = std::fs::remove_dir_all(&dir);
            return Err(BrokerError::WorkspaceUnavailable(format!("git clone of {repo} exited with {status}")));
        }

        Ok(Workspace { path: dir, ephemeral: true })
    }
}

#[cfg(unix)]
async fn restrict_permissions(path: &Path) -> Result<(), BrokerError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(|e| BrokerError::CredentialWriteFailed(e.to_string()))
}

#[cfg(not(unix))]
async fn restrict_permissions(_path: &Path) -> Result<(), BrokerError> {
    Ok(())
}

fn content_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
