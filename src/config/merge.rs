//! Combining server policy with in-repo configuration.
//!
//! Pure functions over immutable values: the server config is evaluated
//! into an effective per-repo policy, then each project declaration is
//! merged under that policy's override rules.

use tracing::debug;

use crate::config::valid::{
    APPLY_REQUIREMENTS_KEY, GlobalConfig, MergedProjectConfig, Project, RepoConfig, WORKFLOW_KEY,
    Workflow,
};
use crate::errors::ConfigError;

/// The per-repo policy record produced by folding every matching
/// `RepoPolicy` over a repo ID.
#[derive(Debug, Clone, Default)]
pub struct EffectivePolicy {
    pub apply_requirements: Vec<String>,
    pub workflow: Option<Workflow>,
    pub allowed_overrides: Vec<String>,
    pub allow_custom_workflows: bool,
}

impl EffectivePolicy {
    fn allows_override(&self, key: &str) -> bool {
        self.allowed_overrides.iter().any(|k| k == key)
    }
}

impl GlobalConfig {
    /// Evaluate every policy whose ID pattern matches `repo_id`, in
    /// declaration order. For each key the last matching policy wins.
    pub fn effective_policy(&self, repo_id: &str) -> EffectivePolicy {
        let mut effective = EffectivePolicy::default();
        for policy in self.repos.iter().filter(|p| p.id.matches(repo_id)) {
            if let Some(requirements) = &policy.apply_requirements {
                effective.apply_requirements = requirements.clone();
            }
            if let Some(workflow) = &policy.workflow {
                // References were validated at load, so a miss here means
                // the registry itself was mutated; fall through to None.
                effective.workflow = self.workflows.get(workflow).cloned();
            }
            if let Some(overrides) = &policy.allowed_overrides {
                effective.allowed_overrides = overrides.clone();
            }
            if let Some(allow) = policy.allow_custom_workflows {
                effective.allow_custom_workflows = allow;
            }
        }
        effective
    }

    /// Merge one in-repo project declaration under the server policy for
    /// `repo_id`. Restricted keys used without override permission deny the
    /// whole command.
    pub fn merge_project_config(
        &self,
        repo_id: &str,
        project: &Project,
        repo_config: &RepoConfig,
    ) -> Result<MergedProjectConfig, ConfigError> {
        let policy = self.effective_policy(repo_id);

        if !project.apply_requirements.is_empty()
            && !policy.allows_override(APPLY_REQUIREMENTS_KEY)
        {
            return Err(ConfigError::OverrideDenied {
                key: APPLY_REQUIREMENTS_KEY.to_string(),
            });
        }
        if project.workflow.is_some() && !policy.allows_override(WORKFLOW_KEY) {
            return Err(ConfigError::OverrideDenied {
                key: WORKFLOW_KEY.to_string(),
            });
        }
        if !repo_config.workflows.is_empty() && !policy.allow_custom_workflows {
            return Err(ConfigError::CustomWorkflowsDenied);
        }

        let apply_requirements = if project.apply_requirements.is_empty() {
            policy.apply_requirements.clone()
        } else {
            project.apply_requirements.clone()
        };

        let workflow = match &project.workflow {
            Some(name) => self.resolve_workflow(name, repo_config, &policy)?,
            None => policy.workflow.clone().unwrap_or_default(),
        };

        debug!(
            dir = %project.dir,
            workspace = %project.workspace,
            "merged project config"
        );

        Ok(MergedProjectConfig {
            repo_rel_dir: project.dir.clone(),
            workspace: project.workspace.clone(),
            name: project.name.clone(),
            workflow,
            terraform_version: project.terraform_version.clone(),
            apply_requirements,
            autoplan_enabled: project.autoplan.enabled,
        })
    }

    /// The config for a project with no in-repo declaration: server policy
    /// plus defaults.
    pub fn default_project_config(
        &self,
        repo_id: &str,
        repo_rel_dir: &str,
        workspace: &str,
    ) -> MergedProjectConfig {
        let policy = self.effective_policy(repo_id);
        MergedProjectConfig {
            repo_rel_dir: repo_rel_dir.to_string(),
            workspace: workspace.to_string(),
            name: None,
            workflow: policy.workflow.unwrap_or_default(),
            terraform_version: None,
            apply_requirements: policy.apply_requirements,
            autoplan_enabled: true,
        }
    }

    /// Look up a referenced workflow: in-repo workflows first (when custom
    /// workflows are permitted), then the server registry.
    fn resolve_workflow(
        &self,
        name: &str,
        repo_config: &RepoConfig,
        policy: &EffectivePolicy,
    ) -> Result<Workflow, ConfigError> {
        if policy.allow_custom_workflows
            && let Some(workflow) = repo_config.workflows.get(name)
        {
            return Ok(workflow.clone());
        }
        if let Some(workflow) = self.workflows.get(name) {
            return Ok(workflow.clone());
        }
        Err(ConfigError::WorkflowNotDefined(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::ParserValidator;
    use crate::config::valid::{Autoplan, Stage, Step};

    fn parse_server(data: &str) -> GlobalConfig {
        ParserValidator.parse_server_config(data).unwrap()
    }

    fn parse_repo(data: &str, global: &GlobalConfig) -> RepoConfig {
        ParserValidator.parse_repo_config(data, global).unwrap()
    }

    #[test]
    fn no_policies_yields_defaults() {
        let policy = GlobalConfig::default().effective_policy("anything");
        assert!(policy.apply_requirements.is_empty());
        assert!(policy.workflow.is_none());
        assert!(policy.allowed_overrides.is_empty());
        assert!(!policy.allow_custom_workflows);
    }

    #[test]
    fn last_matching_policy_wins_per_key() {
        let global = parse_server(
            "repos:
- id: /.*/
  workflow: w1
  allowed_overrides: [workflow]
- id: thisproject
  workflow: w2
workflows:
  w1:
    plan:
      steps: [init]
  w2:
    plan:
      steps: [plan]
",
        );

        // Both policies match "thisproject": workflow comes from the later
        // literal policy, allowed_overrides stays from the earlier regex.
        let policy = global.effective_policy("thisproject");
        assert_eq!(
            policy.workflow.as_ref().unwrap().plan.steps,
            vec![Step::Plan { extra_args: vec![] }]
        );
        assert_eq!(policy.allowed_overrides, vec!["workflow".to_string()]);

        // Other repos only match the regex policy.
        let policy = global.effective_policy("otherproject");
        assert_eq!(
            policy.workflow.as_ref().unwrap().plan.steps,
            vec![Step::Init { extra_args: vec![] }]
        );
    }

    #[test]
    fn server_policy_workflow_applies_when_project_declares_none() {
        let global = parse_server(
            "repos:
- id: /.*/
  workflow: w1
- id: thisproject
  workflow: w2
workflows:
  w1: ~
  w2:
    apply:
      steps:
      - run: echo custom apply
",
        );
        let repo_config = parse_repo("version: 2\nprojects:\n- dir: .\n", &global);
        let merged = global
            .merge_project_config("thisproject", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert_eq!(
            merged.workflow.apply.steps,
            vec![Step::Run {
                command: vec!["echo".to_string(), "custom".to_string(), "apply".to_string()],
            }]
        );
    }

    #[test]
    fn workflow_override_denied_by_default() {
        let global = parse_server("repos:\n- id: /.*/\nworkflows:\n  projworkflow: ~\n");
        let repo_config = parse_repo(
            "version: 2\nprojects:\n- dir: .\n  workflow: projworkflow\n",
            &global,
        );
        let err = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"workflow\" cannot be specified in \"atlantis.yaml\" by default. To enable this, add \"workflow\" to \"allowed_overrides\" in the server-side repo config."
        );
    }

    #[test]
    fn apply_requirements_override_denied_by_default() {
        let global = parse_server("repos:\n- id: /.*/\n");
        let repo_config = parse_repo(
            "version: 2\nprojects:\n- dir: .\n  apply_requirements: [approved]\n",
            &global,
        );
        let err = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"apply_requirements\" cannot be specified in \"atlantis.yaml\" by default. To enable this, add \"apply_requirements\" to \"allowed_overrides\" in the server-side repo config."
        );
    }

    #[test]
    fn custom_workflows_denied_by_default() {
        let global = GlobalConfig::default();
        let repo_config = parse_repo(
            "version: 2\nprojects:\n- dir: .\nworkflows:\n  mine: ~\n",
            &global,
        );
        let err = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "\"workflows\" cannot be specified in \"atlantis.yaml\" by default. To enable this, set \"allow_custom_workflows: true\" in the server-side repo config."
        );
    }

    #[test]
    fn permitted_overrides_take_the_repo_value() {
        let global = parse_server(
            "repos:
- id: /.*/
  apply_requirements: [mergeable]
  allowed_overrides: [apply_requirements, workflow]
  allow_custom_workflows: true
",
        );
        let repo_config = parse_repo(
            "version: 2
projects:
- dir: .
  apply_requirements: [approved]
  workflow: mine
workflows:
  mine:
    plan:
      steps:
      - run: custom plan
",
            &global,
        );
        let merged = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert_eq!(merged.apply_requirements, vec!["approved".to_string()]);
        assert_eq!(
            merged.workflow.plan,
            Stage {
                steps: vec![Step::Run {
                    command: vec!["custom".to_string(), "plan".to_string()],
                }],
            }
        );
    }

    #[test]
    fn server_requirements_apply_when_project_is_silent() {
        let global = parse_server("repos:\n- id: /.*/\n  apply_requirements: [mergeable]\n");
        let repo_config = parse_repo("version: 2\nprojects:\n- dir: .\n", &global);
        let merged = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert_eq!(merged.apply_requirements, vec!["mergeable".to_string()]);
    }

    #[test]
    fn repo_workflow_shadows_server_workflow_when_custom_allowed() {
        let global = parse_server(
            "repos:
- id: /.*/
  allowed_overrides: [workflow]
  allow_custom_workflows: true
workflows:
  shared:
    plan:
      steps: [init]
",
        );
        let repo_config = parse_repo(
            "version: 2
projects:
- dir: .
  workflow: shared
workflows:
  shared:
    plan:
      steps: [plan]
",
            &global,
        );
        let merged = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert_eq!(
            merged.workflow.plan.steps,
            vec![Step::Plan { extra_args: vec![] }]
        );
    }

    #[test]
    fn merged_workflow_defaults_when_nothing_selects_one() {
        let global = GlobalConfig::default();
        let repo_config = parse_repo("version: 2\nprojects:\n- dir: .\n", &global);
        let merged = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert_eq!(merged.workflow, Workflow::default());
        assert!(merged.autoplan_enabled);
    }

    #[test]
    fn default_project_config_carries_policy_fields() {
        let global = parse_server(
            "repos:
- id: myrepo
  apply_requirements: [approved]
  workflow: w
workflows:
  w:
    apply:
      steps: []
",
        );
        let merged = global.default_project_config("myrepo", "infra", "staging");
        assert_eq!(merged.repo_rel_dir, "infra");
        assert_eq!(merged.workspace, "staging");
        assert_eq!(merged.apply_requirements, vec!["approved".to_string()]);
        assert!(merged.workflow.apply.steps.is_empty());
        assert!(merged.autoplan_enabled);
        assert!(merged.name.is_none());

        // A repo the policy doesn't match gets pure defaults.
        let merged = global.default_project_config("other", "infra", "default");
        assert!(merged.apply_requirements.is_empty());
        assert_eq!(merged.workflow, Workflow::default());
    }

    #[test]
    fn autoplan_disabled_flows_through_merge() {
        let global = GlobalConfig::default();
        let repo_config = parse_repo(
            "version: 2\nprojects:\n- dir: .\n  autoplan:\n    enabled: false\n",
            &global,
        );
        assert_eq!(
            repo_config.projects[0].autoplan,
            Autoplan {
                enabled: false,
                when_modified: vec!["**/*.tf*".to_string()],
            }
        );
        let merged = global
            .merge_project_config("repo", &repo_config.projects[0], &repo_config)
            .unwrap();
        assert!(!merged.autoplan_enabled);
    }
}
