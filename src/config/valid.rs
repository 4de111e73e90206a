//! Validated configuration model.
//!
//! Everything here has already been through the parser: dirs are cleaned,
//! defaults are filled in, references resolve. The builder and merger work
//! exclusively with these types.

use std::collections::BTreeMap;

use regex::Regex;
use semver::Version;

/// The default Terraform workspace, which is also our default.
pub const DEFAULT_WORKSPACE: &str = "default";

/// The default directory commands run in, relative to the repo root.
pub const DEFAULT_REPO_REL_DIR: &str = ".";

/// Apply requirements a project may declare.
pub const APPROVED_APPLY_REQUIREMENT: &str = "approved";
pub const MERGEABLE_APPLY_REQUIREMENT: &str = "mergeable";

/// Keys a server-side repo policy can open up for in-repo override.
pub const APPLY_REQUIREMENTS_KEY: &str = "apply_requirements";
pub const WORKFLOW_KEY: &str = "workflow";

/// The `atlantis.yaml` config after parsing and validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoConfig {
    /// Always 2 once validated.
    pub version: i64,
    pub automerge: bool,
    pub projects: Vec<Project>,
    pub workflows: BTreeMap<String, Workflow>,
}

impl RepoConfig {
    pub fn find_project_by_name(&self, name: &str) -> Option<&Project> {
        self.projects
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
    }

    pub fn find_projects_by_dir_workspace(&self, dir: &str, workspace: &str) -> Vec<&Project> {
        self.projects
            .iter()
            .filter(|p| p.dir == dir && p.workspace == workspace)
            .collect()
    }

    pub fn find_projects_by_dir(&self, dir: &str) -> Vec<&Project> {
        self.projects.iter().filter(|p| p.dir == dir).collect()
    }
}

/// A single project declaration from `atlantis.yaml`.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Repo-relative, cleaned, never contains `..`.
    pub dir: String,
    pub workspace: String,
    pub name: Option<String>,
    /// A reference into the repo or server workflow registry.
    pub workflow: Option<String>,
    pub terraform_version: Option<Version>,
    pub autoplan: Autoplan,
    pub apply_requirements: Vec<String>,
}

impl Project {
    /// The project's name, or an empty string when unnamed.
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Autoplan {
    pub enabled: bool,
    pub when_modified: Vec<String>,
}

impl Default for Autoplan {
    fn default() -> Self {
        Self {
            enabled: true,
            when_modified: vec!["**/*.tf*".to_string()],
        }
    }
}

/// A named pair of ordered step sequences.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub plan: Stage,
    pub apply: Stage,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            plan: Stage::default_plan(),
            apply: Stage::default_apply(),
        }
    }
}

/// An ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stage {
    pub steps: Vec<Step>,
}

impl Stage {
    pub fn default_plan() -> Self {
        Self {
            steps: vec![
                Step::Init { extra_args: vec![] },
                Step::Plan { extra_args: vec![] },
            ],
        }
    }

    pub fn default_apply() -> Self {
        Self {
            steps: vec![Step::Apply { extra_args: vec![] }],
        }
    }
}

/// A single workflow step. Built-in steps carry extra arguments appended to
/// the canonical command; run steps carry a shell-split command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Init { extra_args: Vec<String> },
    Plan { extra_args: Vec<String> },
    Apply { extra_args: Vec<String> },
    Run { command: Vec<String> },
}

/// Server-side configuration: repo policies plus a workflow registry.
/// Loaded once at process start, immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct GlobalConfig {
    pub repos: Vec<RepoPolicy>,
    pub workflows: BTreeMap<String, Workflow>,
}

/// One server-side repo policy. Policies are evaluated in declaration order
/// against a repo ID; for each key the last matching policy wins.
#[derive(Debug, Clone)]
pub struct RepoPolicy {
    pub id: RepoIdPattern,
    pub apply_requirements: Option<Vec<String>>,
    /// A reference into the server workflow registry, validated at load.
    pub workflow: Option<String>,
    pub allowed_overrides: Option<Vec<String>>,
    pub allow_custom_workflows: Option<bool>,
}

/// How a policy matches repo IDs: a literal ID, or an anchored regex that
/// was written `/…/` in the config and compiled at load time.
#[derive(Debug, Clone)]
pub enum RepoIdPattern {
    Exact(String),
    Regex(Regex),
}

impl RepoIdPattern {
    pub fn matches(&self, repo_id: &str) -> bool {
        match self {
            Self::Exact(id) => id == repo_id,
            Self::Regex(re) => re.is_match(repo_id),
        }
    }
}

/// The fully-resolved per-project configuration the merger emits. The
/// workflow is always concrete here; there is no "unset" state downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedProjectConfig {
    pub repo_rel_dir: String,
    pub workspace: String,
    pub name: Option<String>,
    pub workflow: Workflow,
    pub terraform_version: Option<Version>,
    pub apply_requirements: Vec<String>,
    pub autoplan_enabled: bool,
}
