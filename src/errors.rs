//! Typed error hierarchy for the command-build pipeline.
//!
//! Four top-level enums cover the four subsystems:
//! - `ConfigError` — parsing, validation and policy-merge failures
//! - `BuildError` — project-command builder failures
//! - `LockError` — working-directory lock contention
//! - `StepError` — run-step execution failures
//!
//! The rendered messages are part of the user contract: they are posted back
//! to pull requests verbatim, so the wording here must not drift.

use thiserror::Error;

/// Errors from parsing, validating or merging configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read {filename} file: {source}")]
    Read {
        filename: String,
        #[source]
        source: std::io::Error,
    },

    /// Wraps any failure below with the file being parsed.
    #[error("parsing {filename}: {source}")]
    Parse {
        filename: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("{0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A structural validation failure, tagged with the dotted path of the
    /// offending field (e.g. `projects.0.dir`).
    #[error("{path}: {message}")]
    Validation { path: String, message: String },

    #[error(
        "version: is required. If you've just upgraded Atlantis you need to rewrite your atlantis.yaml for version 2. See www.runatlantis.io/docs/upgrading-atlantis-yaml-to-version-2.html."
    )]
    VersionRequired,

    #[error("version: must equal 2.")]
    VersionWrong,

    #[error("workflow {0:?} is not defined")]
    WorkflowNotDefined(String),

    #[error("found two or more projects with name {0:?}; project names must be unique")]
    DuplicateProjectName(String),

    #[error(
        "there are two or more projects with dir: {dir:?} workspace: {workspace:?} that are not all named; they must have a 'name' key so they can be targeted for apply's separately"
    )]
    UnnamedAmbiguousProjects { dir: String, workspace: String },

    #[error("regex compile of repo.ID `/{pattern}/`: {source}")]
    RepoIdRegex {
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error(
        "{key:?} cannot be specified in \"atlantis.yaml\" by default. To enable this, add {key:?} to \"allowed_overrides\" in the server-side repo config."
    )]
    OverrideDenied { key: String },

    #[error(
        "\"workflows\" cannot be specified in \"atlantis.yaml\" by default. To enable this, set \"allow_custom_workflows: true\" in the server-side repo config."
    )]
    CustomWorkflowsDenied,

    #[error("no commands for run step")]
    EmptyRunStep,
}

/// Errors from the project-command builder.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(
        "must specify project name: more than one project defined in atlantis.yaml matched dir: {dir:?} workspace: {workspace:?}"
    )]
    AmbiguousProject { dir: String, workspace: String },

    #[error("no project with name {0:?} is defined in atlantis.yaml")]
    UnknownProject(String),

    #[error(
        "cannot specify a project name unless an atlantis.yaml file exists to configure projects"
    )]
    NameRequiresRepoConfig,

    #[error(
        "running commands in workspace {workspace:?} is not allowed because this directory is only configured for the following workspaces: {configured}"
    )]
    WorkspaceNotAllowed { workspace: String, configured: String },

    #[error("building command for dir {dir:?}: {source}")]
    PendingPlan {
        dir: String,
        #[source]
        source: Box<BuildError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Lock contention in the working-directory lock registry. Contention is
/// recoverable: the caller may retry once the holding command completes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("workspace was locked")]
    WorkspaceLocked,

    #[error("pull request was locked")]
    PullLocked,
}

/// Errors from executing a single run step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("no commands for run step")]
    NoCommands,

    #[error("exit status {code}: running {command:?} in {dir}")]
    ExitStatus {
        code: i32,
        command: String,
        dir: String,
    },

    #[error("running {command:?} in {dir}: {source}")]
    Spawn {
        command: String,
        dir: String,
        #[source]
        source: std::io::Error,
    },
}
