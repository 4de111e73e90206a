//! The serde-facing configuration model.
//!
//! These structs mirror the YAML documents exactly: every field optional,
//! unknown keys rejected. `into_valid` lifts them into `config::valid`,
//! filling defaults and producing path-tagged validation errors.

use std::collections::{BTreeMap, BTreeSet};

use globset::GlobBuilder;
use semver::Version;
use serde::{Deserialize, Deserializer};

use crate::config::valid;
use crate::errors::ConfigError;

/// The in-repo `atlantis.yaml` document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Outer `None` means the key was absent; inner `None` means `version: ~`.
    /// The two produce different guidance messages.
    #[serde(default, deserialize_with = "deserialize_version")]
    pub version: Option<Option<i64>>,
    #[serde(default)]
    pub automerge: Option<bool>,
    #[serde(default)]
    pub projects: Option<Vec<Option<Project>>>,
    #[serde(default)]
    pub workflows: Option<BTreeMap<String, Option<Workflow>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Project {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub autoplan: Option<Autoplan>,
    #[serde(default)]
    pub apply_requirements: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Autoplan {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub when_modified: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    #[serde(default)]
    pub plan: Option<Stage>,
    #[serde(default)]
    pub apply: Option<Stage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Stage {
    #[serde(default)]
    pub steps: Option<Vec<Step>>,
}

/// A step in any of its three YAML spellings:
///
/// ```yaml
/// - init
/// - plan:
///     extra_args: [-lock=false]
/// - run: echo hi
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Step {
    Key(String),
    WithArgs(BTreeMap<String, StepArgs>),
    Run(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepArgs {
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// The server-side repo-policy document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub repos: Option<Vec<RepoPolicy>>,
    #[serde(default)]
    pub workflows: Option<BTreeMap<String, Option<Workflow>>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoPolicy {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub apply_requirements: Option<Vec<String>>,
    #[serde(default)]
    pub workflow: Option<String>,
    #[serde(default)]
    pub allowed_overrides: Option<Vec<String>>,
    #[serde(default)]
    pub allow_custom_workflows: Option<bool>,
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<Option<Option<i64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<i64>::deserialize(deserializer).map(Some)
}

impl RepoConfig {
    /// Validate and lift into the checked model. `global_workflow_names` is
    /// the server workflow registry: project workflow references may resolve
    /// into either tier.
    pub fn into_valid(
        self,
        global_workflow_names: &BTreeSet<String>,
    ) -> Result<valid::RepoConfig, ConfigError> {
        match self.version {
            None => return Err(ConfigError::VersionRequired),
            Some(Some(2)) => {}
            Some(_) => return Err(ConfigError::VersionWrong),
        }

        let workflows = lift_workflows(self.workflows, "workflows")?;

        let mut projects = Vec::new();
        for (i, project) in self.projects.unwrap_or_default().into_iter().enumerate() {
            let project = project.unwrap_or_default();
            projects.push(lift_project(project, i, &workflows, global_workflow_names)?);
        }

        validate_project_names(&projects)?;

        Ok(valid::RepoConfig {
            version: 2,
            automerge: self.automerge.unwrap_or(false),
            projects,
            workflows,
        })
    }
}

impl ServerConfig {
    pub fn into_valid(self) -> Result<valid::GlobalConfig, ConfigError> {
        let workflows = lift_workflows(self.workflows, "workflows")?;

        let mut repos = Vec::new();
        for (i, policy) in self.repos.unwrap_or_default().into_iter().enumerate() {
            repos.push(lift_repo_policy(policy, i, &workflows)?);
        }

        Ok(valid::GlobalConfig { repos, workflows })
    }
}

fn lift_project(
    project: Project,
    index: usize,
    repo_workflows: &BTreeMap<String, valid::Workflow>,
    global_workflow_names: &BTreeSet<String>,
) -> Result<valid::Project, ConfigError> {
    let path = format!("projects.{index}");

    let dir = match project.dir.as_deref() {
        None | Some("") => {
            return Err(validation(format!("{path}.dir"), "is required"));
        }
        Some(dir) if dir.contains("..") => {
            return Err(validation(format!("{path}.dir"), "cannot contain '..'"));
        }
        Some(dir) => clean_dir(dir),
    };

    let workspace = match project.workspace.as_deref() {
        None | Some("") => valid::DEFAULT_WORKSPACE.to_string(),
        Some(workspace) => workspace.to_string(),
    };

    if let Some(name) = project.name.as_deref() {
        if name.is_empty() {
            return Err(validation(format!("{path}.name"), "if set cannot be empty"));
        }
        if !is_url_safe_name(name) {
            return Err(validation(
                format!("{path}.name"),
                format!("{name:?} is not allowed: must contain only URL safe characters"),
            ));
        }
    }

    let apply_requirements = project.apply_requirements.unwrap_or_default();
    for requirement in &apply_requirements {
        if requirement != valid::APPROVED_APPLY_REQUIREMENT
            && requirement != valid::MERGEABLE_APPLY_REQUIREMENT
        {
            return Err(validation(
                format!("{path}.apply_requirements"),
                format!(
                    "{requirement:?} not supported, only \"approved\" and \"mergeable\" are supported"
                ),
            ));
        }
    }

    let terraform_version = match project.terraform_version.as_deref() {
        None => None,
        Some(raw) => Some(parse_terraform_version(raw).map_err(|e| {
            validation(
                format!("{path}.terraform_version"),
                format!("version {raw:?} could not be parsed: {e}"),
            )
        })?),
    };

    let autoplan = lift_autoplan(project.autoplan, &format!("{path}.autoplan"))?;

    if let Some(workflow) = project.workflow.as_deref()
        && !repo_workflows.contains_key(workflow)
        && !global_workflow_names.contains(workflow)
    {
        return Err(ConfigError::WorkflowNotDefined(workflow.to_string()));
    }

    Ok(valid::Project {
        dir,
        workspace,
        name: project.name,
        workflow: project.workflow,
        terraform_version,
        autoplan,
        apply_requirements,
    })
}

fn lift_autoplan(autoplan: Option<Autoplan>, path: &str) -> Result<valid::Autoplan, ConfigError> {
    let autoplan = autoplan.unwrap_or_default();
    let when_modified = match autoplan.when_modified {
        None => valid::Autoplan::default().when_modified,
        Some(patterns) => {
            for pattern in &patterns {
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| {
                        validation(
                            format!("{path}.when_modified"),
                            format!("glob {pattern:?} could not be parsed: {e}"),
                        )
                    })?;
            }
            patterns
        }
    };
    Ok(valid::Autoplan {
        enabled: autoplan.enabled.unwrap_or(true),
        when_modified,
    })
}

fn lift_repo_policy(
    policy: RepoPolicy,
    index: usize,
    server_workflows: &BTreeMap<String, valid::Workflow>,
) -> Result<valid::RepoPolicy, ConfigError> {
    let path = format!("repos.{index}");

    let id = match policy.id.as_deref() {
        None | Some("") => return Err(validation(format!("{path}.id"), "is required")),
        Some(id) => lift_repo_id(id)?,
    };

    if let Some(requirements) = &policy.apply_requirements {
        for requirement in requirements {
            if requirement != valid::APPROVED_APPLY_REQUIREMENT
                && requirement != valid::MERGEABLE_APPLY_REQUIREMENT
            {
                return Err(validation(
                    format!("{path}.apply_requirements"),
                    format!(
                        "{requirement:?} not supported, only \"approved\" and \"mergeable\" are supported"
                    ),
                ));
            }
        }
    }

    if let Some(overrides) = &policy.allowed_overrides {
        for key in overrides {
            if key != valid::APPLY_REQUIREMENTS_KEY && key != valid::WORKFLOW_KEY {
                return Err(validation(
                    format!("{path}.allowed_overrides"),
                    format!(
                        "{key:?} is not a valid override, only \"apply_requirements\" and \"workflow\" are supported"
                    ),
                ));
            }
        }
    }

    if let Some(workflow) = policy.workflow.as_deref()
        && !server_workflows.contains_key(workflow)
    {
        return Err(ConfigError::WorkflowNotDefined(workflow.to_string()));
    }

    Ok(valid::RepoPolicy {
        id,
        apply_requirements: policy.apply_requirements,
        workflow: policy.workflow,
        allowed_overrides: policy.allowed_overrides,
        allow_custom_workflows: policy.allow_custom_workflows,
    })
}

/// IDs written `/…/` compile to anchored regexes at load time; everything
/// else matches literally.
fn lift_repo_id(id: &str) -> Result<valid::RepoIdPattern, ConfigError> {
    if id.len() > 1 && id.starts_with('/') && id.ends_with('/') {
        let inner = &id[1..id.len() - 1];
        let regex = regex::Regex::new(&format!("^(?:{inner})$")).map_err(|e| {
            ConfigError::RepoIdRegex {
                pattern: inner.to_string(),
                source: Box::new(e),
            }
        })?;
        Ok(valid::RepoIdPattern::Regex(regex))
    } else {
        Ok(valid::RepoIdPattern::Exact(id.to_string()))
    }
}

fn lift_workflows(
    workflows: Option<BTreeMap<String, Option<Workflow>>>,
    path_root: &str,
) -> Result<BTreeMap<String, valid::Workflow>, ConfigError> {
    let mut out = BTreeMap::new();
    for (name, workflow) in workflows.unwrap_or_default() {
        // `name: ~` is an empty workflow: both stages fall back to defaults.
        let workflow = workflow.unwrap_or_default();
        let path = format!("{path_root}.{name}");
        out.insert(
            name,
            valid::Workflow {
                plan: lift_stage(
                    workflow.plan,
                    valid::Stage::default_plan(),
                    &format!("{path}.plan"),
                )?,
                apply: lift_stage(
                    workflow.apply,
                    valid::Stage::default_apply(),
                    &format!("{path}.apply"),
                )?,
            },
        );
    }
    Ok(out)
}

/// An absent stage gets the default steps for its position; a stage whose
/// `steps` key is present but empty has zero steps.
fn lift_stage(
    stage: Option<Stage>,
    default: valid::Stage,
    path: &str,
) -> Result<valid::Stage, ConfigError> {
    match stage {
        None => Ok(default),
        Some(stage) => {
            let mut steps = Vec::new();
            for (i, step) in stage.steps.unwrap_or_default().into_iter().enumerate() {
                steps.push(lift_step(step, &format!("{path}.steps.{i}"))?);
            }
            Ok(valid::Stage { steps })
        }
    }
}

fn lift_step(step: Step, path: &str) -> Result<valid::Step, ConfigError> {
    match step {
        Step::Key(name) => built_in_step(&name, vec![], path),
        Step::WithArgs(map) => {
            let (name, args) = single_entry(map, path)?;
            built_in_step(&name, args.extra_args, path)
        }
        Step::Run(map) => {
            let (name, command) = single_entry(map, path)?;
            if name != "run" {
                return Err(validation(
                    path.to_string(),
                    format!("{name:?} is not a valid step type"),
                ));
            }
            let command = shell_words::split(&command).map_err(|e| {
                validation(path.to_string(), format!("unable to parse {command:?}: {e}"))
            })?;
            if command.is_empty() {
                return Err(ConfigError::EmptyRunStep);
            }
            Ok(valid::Step::Run { command })
        }
    }
}

fn built_in_step(
    name: &str,
    extra_args: Vec<String>,
    path: &str,
) -> Result<valid::Step, ConfigError> {
    match name {
        "init" => Ok(valid::Step::Init { extra_args }),
        "plan" => Ok(valid::Step::Plan { extra_args }),
        "apply" => Ok(valid::Step::Apply { extra_args }),
        _ => Err(validation(
            path.to_string(),
            format!("{name:?} is not a valid step type"),
        )),
    }
}

fn single_entry<V>(map: BTreeMap<String, V>, path: &str) -> Result<(String, V), ConfigError> {
    let len = map.len();
    let mut iter = map.into_iter();
    match (iter.next(), len) {
        (Some(entry), 1) => Ok(entry),
        _ => Err(validation(
            path.to_string(),
            format!("step element must have exactly one key, found {len}"),
        )),
    }
}

fn validate_project_names(projects: &[valid::Project]) -> Result<(), ConfigError> {
    let mut seen = BTreeSet::new();
    for project in projects {
        if let Some(name) = &project.name
            && !seen.insert(name.clone())
        {
            return Err(ConfigError::DuplicateProjectName(name.clone()));
        }
    }

    // Any dir/workspace shared by several projects requires every one of
    // them to be named so applies can be targeted.
    let mut dir_workspace_counts: BTreeMap<(&str, &str), usize> = BTreeMap::new();
    for project in projects {
        *dir_workspace_counts
            .entry((project.dir.as_str(), project.workspace.as_str()))
            .or_default() += 1;
    }
    for project in projects {
        let key = (project.dir.as_str(), project.workspace.as_str());
        if dir_workspace_counts[&key] > 1 && project.name.is_none() {
            return Err(ConfigError::UnnamedAmbiguousProjects {
                dir: project.dir.clone(),
                workspace: project.workspace.clone(),
            });
        }
    }
    Ok(())
}

/// Clean a repo-relative dir: collapse `//`, drop `.` segments and trailing
/// slashes, map the bare root spellings to `.`.
fn clean_dir(dir: &str) -> String {
    let parts: Vec<&str> = dir
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Project names end up in URLs and file paths, so only URL-safe characters
/// are allowed — except `/`, which users like for dir-matching names.
fn is_url_safe_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '/'))
}

fn parse_terraform_version(raw: &str) -> Result<Version, semver::Error> {
    Version::parse(raw.strip_prefix('v').unwrap_or(raw))
}

fn validation(path: String, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        path,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_dir_collapses_segments() {
        assert_eq!(clean_dir("."), ".");
        assert_eq!(clean_dir("/"), ".");
        assert_eq!(clean_dir("./"), ".");
        assert_eq!(clean_dir("./a/b/"), "a/b");
        assert_eq!(clean_dir("a//b"), "a/b");
        assert_eq!(clean_dir("a/b"), "a/b");
    }

    #[test]
    fn url_safe_names() {
        assert!(is_url_safe_name("project-1"));
        assert!(is_url_safe_name("infra/prod"));
        assert!(is_url_safe_name("a_b.c~d"));
        assert!(!is_url_safe_name("a b"));
        assert!(!is_url_safe_name("a%b"));
        assert!(!is_url_safe_name("a?b"));
    }

    #[test]
    fn terraform_version_accepts_v_prefix() {
        assert_eq!(
            parse_terraform_version("v0.11.0").unwrap(),
            Version::new(0, 11, 0)
        );
        assert_eq!(
            parse_terraform_version("0.12.6").unwrap(),
            Version::new(0, 12, 6)
        );
        assert!(parse_terraform_version("not-a-version").is_err());
    }

    #[test]
    fn step_parses_bare_keyword() {
        let step: Step = serde_yaml::from_str("init").unwrap();
        let lifted = lift_step(step, "t").unwrap();
        assert_eq!(lifted, valid::Step::Init { extra_args: vec![] });
    }

    #[test]
    fn step_parses_extra_args_form() {
        let step: Step = serde_yaml::from_str("plan:\n  extra_args: [-lock=false, -no-color]").unwrap();
        let lifted = lift_step(step, "t").unwrap();
        assert_eq!(
            lifted,
            valid::Step::Plan {
                extra_args: vec!["-lock=false".to_string(), "-no-color".to_string()],
            }
        );
    }

    #[test]
    fn step_parses_run_with_shell_quoting() {
        let step: Step = serde_yaml::from_str(r#"run: echo "plan hi""#).unwrap();
        let lifted = lift_step(step, "t").unwrap();
        assert_eq!(
            lifted,
            valid::Step::Run {
                command: vec!["echo".to_string(), "plan hi".to_string()],
            }
        );
    }

    #[test]
    fn step_rejects_unknown_keyword() {
        let step: Step = serde_yaml::from_str("frobnicate").unwrap();
        let err = lift_step(step, "workflows.w.plan.steps.0").unwrap_err();
        assert_eq!(
            err.to_string(),
            "workflows.w.plan.steps.0: \"frobnicate\" is not a valid step type"
        );
    }

    #[test]
    fn empty_run_step_is_a_build_error() {
        let step: Step = serde_yaml::from_str(r#"run: """#).unwrap();
        let err = lift_step(step, "t").unwrap_err();
        assert_eq!(err.to_string(), "no commands for run step");
    }

    #[test]
    fn repo_id_slashes_compile_to_regex() {
        match lift_repo_id("/.*/").unwrap() {
            valid::RepoIdPattern::Regex(re) => {
                assert!(re.is_match("github.com/owner/repo"));
            }
            other => panic!("expected regex pattern, got {other:?}"),
        }
    }

    #[test]
    fn repo_id_bad_regex_reports_pattern_and_cause() {
        let err = lift_repo_id("/(unclosed/").unwrap_err();
        assert!(
            err.to_string()
                .starts_with("regex compile of repo.ID `/(unclosed/`:"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn repo_id_without_slashes_is_literal() {
        match lift_repo_id("github.com/owner/repo").unwrap() {
            valid::RepoIdPattern::Exact(id) => assert_eq!(id, "github.com/owner/repo"),
            other => panic!("expected exact pattern, got {other:?}"),
        }
    }
}
