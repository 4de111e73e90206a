//! Per-pull working directories.
//!
//! Each `(repo, pull, workspace)` gets its own checkout under the data
//! dir; plan writes a planfile into it, apply reads the planfile back, so
//! the layout is shared state between commands and guarded by the lock
//! registry.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::events::models::{PullRequest, Repo};

/// Provider of per-pull checkouts.
#[async_trait]
pub trait WorkingDir: Send + Sync {
    /// Ensure a fresh checkout of the pull's head for `workspace` and
    /// return its absolute path.
    async fn clone_repo(
        &self,
        base_repo: &Repo,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf>;

    /// The existing checkout for `workspace`; errors if there is none.
    async fn get_working_dir(
        &self,
        base_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf>;

    /// The directory containing every workspace checkout for the pull.
    async fn get_pull_dir(&self, base_repo: &Repo, pull: &PullRequest) -> Result<PathBuf>;
}

/// Default provider: shallow clones via the `git` CLI, laid out as
/// `<data_dir>/repos/<full_name>/<pull_num>/<workspace>`.
#[derive(Debug, Clone)]
pub struct GitWorkingDir {
    data_dir: PathBuf,
}

impl GitWorkingDir {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn pull_dir(&self, base_repo: &Repo, pull: &PullRequest) -> PathBuf {
        self.data_dir
            .join("repos")
            .join(&base_repo.full_name)
            .join(pull.num.to_string())
    }

    fn workspace_dir(&self, base_repo: &Repo, pull: &PullRequest, workspace: &str) -> PathBuf {
        self.pull_dir(base_repo, pull).join(workspace)
    }
}

#[async_trait]
impl WorkingDir for GitWorkingDir {
    async fn clone_repo(
        &self,
        base_repo: &Repo,
        head_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf> {
        let dst = self.workspace_dir(base_repo, pull, workspace);

        // Any stale checkout is wiped: the head may have been force-pushed
        // and a fresh shallow clone is cheaper than reconciling.
        if dst.exists() {
            tokio::fs::remove_dir_all(&dst)
                .await
                .with_context(|| format!("removing stale checkout at {}", dst.display()))?;
        }
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        debug!(
            repo = %head_repo.full_name,
            branch = %pull.head_branch,
            workspace,
            "cloning pull request head"
        );

        let output = Command::new("git")
            .arg("clone")
            .arg("--depth=1")
            .arg("--single-branch")
            .arg("--branch")
            .arg(&pull.head_branch)
            .arg(&head_repo.clone_url)
            .arg(&dst)
            .output()
            .await
            .context("running git clone")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "cloning {} branch {}: {}",
                head_repo.full_name,
                pull.head_branch,
                stderr.trim()
            );
        }
        Ok(dst)
    }

    async fn get_working_dir(
        &self,
        base_repo: &Repo,
        pull: &PullRequest,
        workspace: &str,
    ) -> Result<PathBuf> {
        let dir = self.workspace_dir(base_repo, pull, workspace);
        if !dir.is_dir() {
            bail!("no working directory found at {}", dir.display());
        }
        Ok(dir)
    }

    async fn get_pull_dir(&self, base_repo: &Repo, pull: &PullRequest) -> Result<PathBuf> {
        let dir = self.pull_dir(base_repo, pull);
        if !dir.is_dir() {
            bail!("no pull directory found at {}", dir.display());
        }
        Ok(dir)
    }
}

impl GitWorkingDir {
    /// Where a checkout would live, whether or not it exists yet. Exposed
    /// for operators cleaning up by hand.
    pub fn checkout_path(&self, base_repo: &Repo, pull: &PullRequest, workspace: &str) -> PathBuf {
        self.workspace_dir(base_repo, pull, workspace)
    }
}
