//! Data carried by an incoming command event and the execution contexts
//! the builder emits.

use semver::Version;

use crate::config::valid::Step;

/// A repository on the VCS host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repo {
    /// `owner/name`, unique per host.
    pub full_name: String,
    pub owner: String,
    pub name: String,
    /// The hostname the repo lives on, e.g. `github.com`.
    pub vcs_host: String,
    pub clone_url: String,
}

impl Repo {
    /// The identifier server-side repo policies match against.
    pub fn id(&self) -> String {
        format!("{}/{}", self.vcs_host, self.full_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullRequest {
    pub num: u64,
    pub head_branch: String,
    pub base_branch: String,
    pub author: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct User {
    pub username: String,
}

/// Which of the two pipelines a context belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Plan,
    Apply,
}

/// Everything known about the triggering event before any project work
/// starts. One per webhook delivery.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub base_repo: Repo,
    pub head_repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    pub pull_mergeable: bool,
}

/// A parsed comment command (`atlantis plan -d dir -w workspace ...`).
/// Comment parsing itself happens upstream; the builder only consumes the
/// result.
#[derive(Debug, Clone, Default)]
pub struct CommentCommand {
    pub repo_rel_dir: Option<String>,
    pub workspace: Option<String>,
    pub project_name: Option<String>,
    /// Extra flags after `--`, passed through to the tool.
    pub flags: Vec<String>,
    pub verbose: bool,
}

impl CommentCommand {
    /// Whether the comment targets a single project rather than everything
    /// in the pull request.
    pub fn is_for_specific_project(&self) -> bool {
        self.repo_rel_dir.is_some() || self.workspace.is_some() || self.project_name.is_some()
    }
}

/// A fully-resolved execution context for one project. The external
/// executor runs `steps` in order and posts the output back to the pull
/// request.
#[derive(Debug, Clone)]
pub struct ProjectCommandContext {
    pub base_repo: Repo,
    pub head_repo: Repo,
    pub pull: PullRequest,
    pub user: User,
    pub command_kind: CommandKind,
    pub project_name: Option<String>,
    pub repo_rel_dir: String,
    pub workspace: String,
    pub terraform_version: Option<Version>,
    pub steps: Vec<Step>,
    pub apply_requirements: Vec<String>,
    pub autoplan_enabled: bool,
    pub automerge_enabled: bool,
    pub comment_args: Vec<String>,
    pub verbose: bool,
    pub pull_mergeable: bool,
    /// Comment a user can post to re-run this exact plan.
    pub replan_comment_text: String,
    /// Comment a user can post to apply this plan.
    pub reapply_comment_text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_includes_host() {
        let repo = Repo {
            full_name: "owner/repo".to_string(),
            owner: "owner".to_string(),
            name: "repo".to_string(),
            vcs_host: "github.com".to_string(),
            clone_url: String::new(),
        };
        assert_eq!(repo.id(), "github.com/owner/repo");
    }

    #[test]
    fn comment_command_specificity() {
        assert!(!CommentCommand::default().is_for_specific_project());
        assert!(
            CommentCommand {
                project_name: Some("p".to_string()),
                ..Default::default()
            }
            .is_for_specific_project()
        );
        assert!(
            CommentCommand {
                repo_rel_dir: Some("d".to_string()),
                ..Default::default()
            }
            .is_for_specific_project()
        );
        assert!(
            CommentCommand {
                workspace: Some("w".to_string()),
                ..Default::default()
            }
            .is_for_specific_project()
        );
    }
}
