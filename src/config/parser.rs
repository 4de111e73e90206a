//! Reading and validating the two configuration documents.
//!
//! The repo-side file is always named `atlantis.yaml` and read from the
//! freshly cloned pull-request head on every command; the server-side file
//! lives wherever the operator keeps it and is loaded once at startup.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::info;

use crate::config::raw;
use crate::config::valid::{GlobalConfig, RepoConfig};
use crate::errors::ConfigError;

/// The name of the config file in each repo.
pub const ATLANTIS_YAML_FILENAME: &str = "atlantis.yaml";

#[derive(Debug, Clone, Copy, Default)]
pub struct ParserValidator;

impl ParserValidator {
    /// Whether `repo_dir` carries an `atlantis.yaml`.
    pub fn has_repo_config(&self, repo_dir: &Path) -> bool {
        repo_dir.join(ATLANTIS_YAML_FILENAME).is_file()
    }

    /// Read and validate `repo_dir`'s `atlantis.yaml`. All failures are
    /// prefixed with the filename; callers should check `has_repo_config`
    /// first rather than probing for a missing-file error.
    pub fn read_repo_config(
        &self,
        repo_dir: &Path,
        global: &GlobalConfig,
    ) -> Result<RepoConfig, ConfigError> {
        let path = repo_dir.join(ATLANTIS_YAML_FILENAME);
        let data = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            filename: ATLANTIS_YAML_FILENAME.to_string(),
            source,
        })?;
        let config = self.parse_repo_config(&data, global)?;
        info!("successfully parsed {} file", ATLANTIS_YAML_FILENAME);
        Ok(config)
    }

    /// Parse and validate repo-config bytes. Workflow references resolve
    /// against the union of the file's own workflows and the server
    /// registry in `global`.
    pub fn parse_repo_config(
        &self,
        data: &str,
        global: &GlobalConfig,
    ) -> Result<RepoConfig, ConfigError> {
        let global_names: BTreeSet<String> = global.workflows.keys().cloned().collect();
        let raw: raw::RepoConfig = serde_yaml::from_str(data).map_err(wrap_repo_parse)?;
        raw.into_valid(&global_names).map_err(wrap_repo_parse)
    }

    /// Read and validate the server-side repo-policy file.
    pub fn read_server_config(&self, path: &Path) -> Result<GlobalConfig, ConfigError> {
        let filename = path.display().to_string();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            filename: filename.clone(),
            source,
        })?;
        self.parse_server_config(&data).map_err(|e| ConfigError::Parse {
            filename,
            source: Box::new(e),
        })
    }

    /// Parse and validate server-config bytes. Repo-ID regexes compile
    /// here, once, and stay compiled for the life of the process.
    pub fn parse_server_config(&self, data: &str) -> Result<GlobalConfig, ConfigError> {
        let raw: raw::ServerConfig = serde_yaml::from_str(data)?;
        raw.into_valid()
    }
}

fn wrap_repo_parse(source: impl Into<ConfigError>) -> ConfigError {
    ConfigError::Parse {
        filename: ATLANTIS_YAML_FILENAME.to_string(),
        source: Box::new(source.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::valid::{Autoplan, Step, Workflow};

    fn parse(data: &str) -> Result<RepoConfig, ConfigError> {
        ParserValidator.parse_repo_config(data, &GlobalConfig::default())
    }

    fn parse_err(data: &str) -> String {
        parse(data).unwrap_err().to_string()
    }

    #[test]
    fn version_missing_gets_migration_guidance() {
        assert_eq!(
            parse_err("projects:\n- dir: \".\"\n"),
            "parsing atlantis.yaml: version: is required. If you've just upgraded Atlantis you need to rewrite your atlantis.yaml for version 2. See www.runatlantis.io/docs/upgrading-atlantis-yaml-to-version-2.html."
        );
    }

    #[test]
    fn version_wrong_and_null_must_equal_two() {
        assert_eq!(
            parse_err("version: 0\nprojects:\n- dir: \".\"\n"),
            "parsing atlantis.yaml: version: must equal 2."
        );
        assert_eq!(
            parse_err("version: ~\nprojects:\n- dir: \".\"\n"),
            "parsing atlantis.yaml: version: must equal 2."
        );
    }

    #[test]
    fn empty_projects_list_is_fine() {
        let config = parse("version: 2\nprojects:\n").unwrap();
        assert_eq!(config.version, 2);
        assert!(config.projects.is_empty());
        assert!(config.workflows.is_empty());
        assert!(!config.automerge);
    }

    #[test]
    fn project_defaults_round_trip() {
        let config = parse("version: 2\nprojects:\n- dir: .\n").unwrap();
        assert_eq!(config.projects.len(), 1);
        let project = &config.projects[0];
        assert_eq!(project.dir, ".");
        assert_eq!(project.workspace, "default");
        assert_eq!(project.autoplan, Autoplan::default());
        assert!(project.autoplan.enabled);
        assert_eq!(project.autoplan.when_modified, vec!["**/*.tf*".to_string()]);
        assert!(project.apply_requirements.is_empty());
        assert!(project.workflow.is_none());
        assert!(project.terraform_version.is_none());
        assert!(project.name.is_none());
    }

    #[test]
    fn project_dir_is_required() {
        assert_eq!(
            parse_err("version: 2\nprojects:\n-\n"),
            "parsing atlantis.yaml: projects.0.dir: is required"
        );
        assert_eq!(
            parse_err("version: 2\nprojects:\n- dir: \".\"\n-\n"),
            "parsing atlantis.yaml: projects.1.dir: is required"
        );
    }

    #[test]
    fn project_dir_cannot_contain_dotdot() {
        assert_eq!(
            parse_err("version: 2\nprojects:\n- dir: ..\n"),
            "parsing atlantis.yaml: projects.0.dir: cannot contain '..'"
        );
    }

    #[test]
    fn unknown_keys_are_rejected_at_every_level() {
        let top = parse_err("version: 2\nsomekey: true\n");
        assert!(top.contains("somekey"), "unexpected message: {top}");

        let project = parse_err("version: 2\nprojects:\n- unknown: value\n");
        assert!(project.contains("unknown"), "unexpected message: {project}");

        let autoplan = parse_err(
            "version: 2\nprojects:\n- dir: .\n  autoplan:\n    mystery: true\n",
        );
        assert!(autoplan.contains("mystery"), "unexpected message: {autoplan}");

        let workflow = parse_err(
            "version: 2\nprojects:\n- dir: .\nworkflows:\n  w:\n    destroy:\n      steps: []\n",
        );
        assert!(workflow.contains("destroy"), "unexpected message: {workflow}");
    }

    #[test]
    fn invalid_name_characters_rejected() {
        assert_eq!(
            parse_err("version: 2\nprojects:\n- dir: .\n  name: \"a b\"\n"),
            "parsing atlantis.yaml: projects.0.name: \"a b\" is not allowed: must contain only URL safe characters"
        );
    }

    #[test]
    fn invalid_apply_requirement_rejected() {
        assert_eq!(
            parse_err("version: 2\nprojects:\n- dir: .\n  apply_requirements: [shipit]\n"),
            "parsing atlantis.yaml: projects.0.apply_requirements: \"shipit\" not supported, only \"approved\" and \"mergeable\" are supported"
        );
    }

    #[test]
    fn terraform_version_must_be_semver() {
        let config = parse(
            "version: 2\nprojects:\n- dir: .\n  terraform_version: v0.11.0\n",
        )
        .unwrap();
        assert_eq!(
            config.projects[0].terraform_version,
            Some(semver::Version::new(0, 11, 0))
        );

        let err = parse_err("version: 2\nprojects:\n- dir: .\n  terraform_version: bogus\n");
        assert!(
            err.starts_with(
                "parsing atlantis.yaml: projects.0.terraform_version: version \"bogus\" could not be parsed"
            ),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn same_dir_workspace_requires_names() {
        let input = "version: 2
projects:
- dir: .
  workspace: workspace
- dir: .
  workspace: workspace
";
        assert_eq!(
            parse_err(input),
            "parsing atlantis.yaml: there are two or more projects with dir: \".\" workspace: \"workspace\" that are not all named; they must have a 'name' key so they can be targeted for apply's separately"
        );
    }

    #[test]
    fn same_dir_workspace_one_named_still_fails() {
        let input = "version: 2
projects:
- name: myname
  dir: .
  workspace: workspace
- dir: .
  workspace: workspace
";
        assert_eq!(
            parse_err(input),
            "parsing atlantis.yaml: there are two or more projects with dir: \".\" workspace: \"workspace\" that are not all named; they must have a 'name' key so they can be targeted for apply's separately"
        );
    }

    #[test]
    fn duplicate_names_fail() {
        let input = "version: 2
projects:
- name: myname
  dir: .
  workspace: workspace
- name: myname
  dir: .
  workspace: workspace
";
        assert_eq!(
            parse_err(input),
            "parsing atlantis.yaml: found two or more projects with name \"myname\"; project names must be unique"
        );
    }

    #[test]
    fn same_dir_workspace_distinct_names_ok() {
        let input = "version: 2
projects:
- name: myname
  dir: .
  workspace: workspace
- name: myname2
  dir: .
  workspace: workspace
";
        let config = parse(input).unwrap();
        assert_eq!(config.projects.len(), 2);
        assert_eq!(config.projects[0].name.as_deref(), Some("myname"));
        assert_eq!(config.projects[1].name.as_deref(), Some("myname2"));
    }

    #[test]
    fn workflow_reference_must_resolve() {
        assert_eq!(
            parse_err("version: 2\nprojects:\n- dir: .\n  workflow: undefined\n"),
            "parsing atlantis.yaml: workflow \"undefined\" is not defined"
        );
    }

    #[test]
    fn workflow_reference_resolves_against_server_registry() {
        let server = ParserValidator
            .parse_server_config("workflows:\n  shared: ~\n")
            .unwrap();
        let config = ParserValidator
            .parse_repo_config(
                "version: 2\nprojects:\n- dir: .\n  workflow: shared\n",
                &server,
            )
            .unwrap();
        assert_eq!(config.projects[0].workflow.as_deref(), Some("shared"));
    }

    #[test]
    fn null_workflow_value_gets_default_stages() {
        let config = parse("version: 2\nprojects:\n- dir: .\nworkflows:\n  myflow: ~\n").unwrap();
        assert_eq!(config.workflows["myflow"], Workflow::default());
    }

    #[test]
    fn explicit_empty_steps_means_no_steps() {
        let input = "version: 2
projects:
- dir: .
workflows:
  w:
    plan:
      steps:
    apply:
      steps:
";
        let config = parse(input).unwrap();
        assert!(config.workflows["w"].plan.steps.is_empty());
        assert!(config.workflows["w"].apply.steps.is_empty());
    }

    #[test]
    fn absent_stage_falls_back_to_default_steps() {
        let input = "version: 2
projects:
- dir: .
workflows:
  w:
    apply:
      steps:
      - run: echo done
";
        let config = parse(input).unwrap();
        assert_eq!(
            config.workflows["w"].plan.steps,
            vec![
                Step::Init { extra_args: vec![] },
                Step::Plan { extra_args: vec![] },
            ]
        );
        assert_eq!(
            config.workflows["w"].apply.steps,
            vec![Step::Run {
                command: vec!["echo".to_string(), "done".to_string()],
            }]
        );
    }

    #[test]
    fn steps_parse_in_all_three_spellings() {
        let input = r#"version: 2
projects:
- dir: .
workflows:
  w:
    plan:
      steps:
      - init:
          extra_args: []
      - plan:
          extra_args: [arg1, arg2]
      - run: echo "plan hi"
    apply:
      steps:
      - apply
"#;
        let config = parse(input).unwrap();
        assert_eq!(
            config.workflows["w"].plan.steps,
            vec![
                Step::Init { extra_args: vec![] },
                Step::Plan {
                    extra_args: vec!["arg1".to_string(), "arg2".to_string()],
                },
                Step::Run {
                    command: vec!["echo".to_string(), "plan hi".to_string()],
                },
            ]
        );
        assert_eq!(
            config.workflows["w"].apply.steps,
            vec![Step::Apply { extra_args: vec![] }]
        );
    }

    #[test]
    fn automerge_parses() {
        let config = parse("version: 2\nautomerge: true\nprojects:\n- dir: .\n").unwrap();
        assert!(config.automerge);
    }

    #[test]
    fn server_config_rejects_bad_override_key() {
        let err = ParserValidator
            .parse_server_config("repos:\n- id: /.*/\n  allowed_overrides: [everything]\n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "repos.0.allowed_overrides: \"everything\" is not a valid override, only \"apply_requirements\" and \"workflow\" are supported"
        );
    }

    #[test]
    fn server_config_rejects_bad_regex() {
        let err = ParserValidator
            .parse_server_config("repos:\n- id: /(oops/\n")
            .unwrap_err();
        assert!(
            err.to_string().starts_with("regex compile of repo.ID `/(oops/`:"),
            "unexpected message: {err}"
        );
    }

    #[test]
    fn server_config_workflow_reference_must_resolve() {
        let err = ParserValidator
            .parse_server_config("repos:\n- id: /.*/\n  workflow: ghost\n")
            .unwrap_err();
        assert_eq!(err.to_string(), "workflow \"ghost\" is not defined");
    }

    #[test]
    fn read_repo_config_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!ParserValidator.has_repo_config(dir.path()));

        std::fs::write(
            dir.path().join(ATLANTIS_YAML_FILENAME),
            "version: 2\nprojects:\n- dir: infra\n",
        )
        .unwrap();
        assert!(ParserValidator.has_repo_config(dir.path()));

        let config = ParserValidator
            .read_repo_config(dir.path(), &GlobalConfig::default())
            .unwrap();
        assert_eq!(config.projects[0].dir, "infra");
    }

    #[test]
    fn read_repo_config_garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(ATLANTIS_YAML_FILENAME), "slkjds").unwrap();
        let err = ParserValidator
            .read_repo_config(dir.path(), &GlobalConfig::default())
            .unwrap_err();
        assert!(
            err.to_string().starts_with("parsing atlantis.yaml: "),
            "unexpected message: {err}"
        );
    }
}
