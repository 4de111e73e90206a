//! Execution of `run` workflow steps.
//!
//! Built-in steps are dispatched to the terraform runner elsewhere; free
//! form `run` steps execute here, under a fixed environment-variable
//! contract that custom scripts rely on.

use std::path::Path;

use semver::Version;
use tokio::process::Command;
use tracing::debug;

use crate::errors::StepError;
use crate::events::models::ProjectCommandContext;

/// Runs `run` steps with the documented environment contract.
#[derive(Debug, Clone)]
pub struct RunStepRunner {
    /// Used for `ATLANTIS_TERRAFORM_VERSION` when the project pins none.
    pub default_tf_version: Version,
}

impl RunStepRunner {
    pub fn new(default_tf_version: Version) -> Self {
        Self { default_tf_version }
    }

    /// Execute a run step's command in `path` (the project dir, absolute).
    ///
    /// The argv is joined and handed to `sh -c`, so redirects and `&&`
    /// chains behave as they would in a shell. The step finishes when all
    /// inherited output descriptors close: a background process sharing
    /// stdout/stderr keeps the step alive. That is documented behavior,
    /// not a bug.
    ///
    /// Environment supplied to the command: `WORKSPACE`,
    /// `ATLANTIS_TERRAFORM_VERSION`, `DIR`, `PLANFILE`, `BASE_REPO_NAME`,
    /// `BASE_REPO_OWNER`, `HEAD_REPO_NAME`, `HEAD_REPO_OWNER`,
    /// `HEAD_BRANCH_NAME`, `BASE_BRANCH_NAME`, `PULL_NUM`, `PULL_AUTHOR`,
    /// `USER_NAME`.
    pub async fn run(
        &self,
        ctx: &ProjectCommandContext,
        command: &[String],
        path: &Path,
    ) -> Result<String, StepError> {
        if command.is_empty() {
            return Err(StepError::NoCommands);
        }
        let joined = command.join(" ");
        let dir = path.display().to_string();

        let tf_version = ctx
            .terraform_version
            .clone()
            .unwrap_or_else(|| self.default_tf_version.clone());
        let planfile = path.join(format!("{}.tfplan", ctx.workspace));

        debug!(command = %joined, %dir, "running run step");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&joined)
            .current_dir(path)
            .env("WORKSPACE", &ctx.workspace)
            .env("ATLANTIS_TERRAFORM_VERSION", tf_version.to_string())
            .env("DIR", &dir)
            .env("PLANFILE", &planfile)
            .env("BASE_REPO_NAME", &ctx.base_repo.name)
            .env("BASE_REPO_OWNER", &ctx.base_repo.owner)
            .env("HEAD_REPO_NAME", &ctx.head_repo.name)
            .env("HEAD_REPO_OWNER", &ctx.head_repo.owner)
            .env("HEAD_BRANCH_NAME", &ctx.pull.head_branch)
            .env("BASE_BRANCH_NAME", &ctx.pull.base_branch)
            .env("PULL_NUM", ctx.pull.num.to_string())
            .env("PULL_AUTHOR", &ctx.pull.author)
            .env("USER_NAME", &ctx.user.username)
            .output()
            .await
            .map_err(|source| StepError::Spawn {
                command: joined.clone(),
                dir: dir.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            return Err(StepError::ExitStatus {
                code: output.status.code().unwrap_or(-1),
                command: joined,
                dir,
            });
        }
        Ok(combined)
    }
}
