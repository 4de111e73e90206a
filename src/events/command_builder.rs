//! The project-command builder.
//!
//! Takes an incoming command event, serializes access with the lock
//! registry, reads the pull's config, and emits one fully-resolved
//! execution context per project that needs work. The external executor
//! consumes the contexts; nothing here runs terraform.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, info, warn};

use crate::config::ParserValidator;
use crate::config::valid::{
    DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE, GlobalConfig, MergedProjectConfig, Project,
    RepoConfig,
};
use crate::errors::BuildError;
use crate::events::comment_builder::CommentBuilder;
use crate::events::locking::WorkingDirLocker;
use crate::events::models::{CommandContext, CommandKind, CommentCommand, ProjectCommandContext};
use crate::events::pending_plans::PendingPlanFinder;
use crate::events::project_finder::ProjectFinder;
use crate::events::vcs::VcsClient;
use crate::events::working_dir::WorkingDir;

pub struct ProjectCommandBuilder {
    parser: ParserValidator,
    project_finder: ProjectFinder,
    pending_plan_finder: PendingPlanFinder,
    global_config: GlobalConfig,
    vcs_client: Arc<dyn VcsClient>,
    working_dir: Arc<dyn WorkingDir>,
    locker: WorkingDirLocker,
    comment_builder: Arc<dyn CommentBuilder>,
}

impl ProjectCommandBuilder {
    pub fn new(
        global_config: GlobalConfig,
        vcs_client: Arc<dyn VcsClient>,
        working_dir: Arc<dyn WorkingDir>,
        locker: WorkingDirLocker,
        comment_builder: Arc<dyn CommentBuilder>,
    ) -> Self {
        Self {
            parser: ParserValidator,
            project_finder: ProjectFinder,
            pending_plan_finder: PendingPlanFinder,
            global_config,
            vcs_client,
            working_dir,
            locker,
            comment_builder,
        }
    }

    /// Plan contexts for a new commit: every project the modified files
    /// select, minus those with autoplan disabled.
    pub async fn build_autoplan_commands(
        &self,
        ctx: &CommandContext,
    ) -> Result<Vec<ProjectCommandContext>, BuildError> {
        let contexts = self.build_plan_all_commands(ctx, &[], false).await?;
        Ok(contexts
            .into_iter()
            .filter(|c| {
                if !c.autoplan_enabled {
                    debug!(
                        dir = %c.repo_rel_dir,
                        workspace = %c.workspace,
                        "ignoring project because autoplan is disabled"
                    );
                }
                c.autoplan_enabled
            })
            .collect())
    }

    /// Plan contexts for an explicit comment command. A targeted comment
    /// yields exactly one context; otherwise this behaves like autoplan
    /// without the autoplan-enabled filter.
    pub async fn build_plan_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectCommandContext>, BuildError> {
        if !cmd.is_for_specific_project() {
            return self.build_plan_all_commands(ctx, &cmd.flags, cmd.verbose).await;
        }
        let context = self.build_project_plan_command(ctx, cmd).await?;
        Ok(vec![context])
    }

    /// Apply contexts for an explicit comment command. A targeted comment
    /// applies one existing plan; otherwise every pending plan under the
    /// pull is applied.
    pub async fn build_apply_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectCommandContext>, BuildError> {
        if !cmd.is_for_specific_project() {
            return self.build_apply_all_commands(ctx, cmd).await;
        }
        let context = self.build_project_apply_command(ctx, cmd).await?;
        Ok(vec![context])
    }

    async fn build_plan_all_commands(
        &self,
        ctx: &CommandContext,
        comment_flags: &[String],
        verbose: bool,
    ) -> Result<Vec<ProjectCommandContext>, BuildError> {
        // The clone target is the default workspace, so that's the lock.
        let workspace = DEFAULT_WORKSPACE;
        let _lock = self
            .locker
            .try_lock(&ctx.base_repo.full_name, ctx.pull.num, workspace)
            .inspect_err(|_| warn!("workspace was locked"))?;
        debug!("got workspace lock");

        let modified_files = self
            .vcs_client
            .get_modified_files(&ctx.base_repo, &ctx.pull)
            .await
            .context("getting modified files")?;
        debug!(
            count = modified_files.len(),
            "files were modified in this pull request"
        );

        let repo_dir = self
            .working_dir
            .clone_repo(&ctx.base_repo, &ctx.head_repo, &ctx.pull, workspace)
            .await
            .context("cloning repository")?;

        let mut contexts = Vec::new();
        if self.parser.has_repo_config(&repo_dir) {
            let repo_config = self.parser.read_repo_config(&repo_dir, &self.global_config)?;
            let matching = self
                .project_finder
                .find_by_config(&modified_files, &repo_config)?;
            info!(
                count = matching.len(),
                "projects are to be planned based on their when_modified config"
            );
            for project in matching {
                let merged = self.global_config.merge_project_config(
                    &ctx.base_repo.id(),
                    project,
                    &repo_config,
                )?;
                contexts.push(self.build_ctx(
                    ctx,
                    CommandKind::Plan,
                    merged,
                    comment_flags,
                    repo_config.automerge,
                    verbose,
                ));
            }
        } else {
            info!("found no atlantis.yaml file");
            let modified_projects = self.project_finder.find_by_tree(&modified_files, &repo_dir);
            info!(
                count = modified_projects.len(),
                "automatically determined the modified projects"
            );
            for project in modified_projects {
                let merged = self.global_config.default_project_config(
                    &ctx.base_repo.id(),
                    &project.path,
                    DEFAULT_WORKSPACE,
                );
                contexts.push(self.build_ctx(
                    ctx,
                    CommandKind::Plan,
                    merged,
                    comment_flags,
                    false,
                    verbose,
                ));
            }
        }
        Ok(contexts)
    }

    async fn build_project_plan_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext, BuildError> {
        let workspace = cmd.workspace.as_deref().unwrap_or(DEFAULT_WORKSPACE);
        debug!(workspace, "building targeted plan command");

        let _lock = self
            .locker
            .try_lock(&ctx.base_repo.full_name, ctx.pull.num, workspace)
            .inspect_err(|_| warn!("workspace was locked"))?;

        let repo_dir = self
            .working_dir
            .clone_repo(&ctx.base_repo, &ctx.head_repo, &ctx.pull, workspace)
            .await
            .context("cloning repository")?;

        let repo_rel_dir = cmd.repo_rel_dir.as_deref().unwrap_or(DEFAULT_REPO_REL_DIR);
        self.build_project_command_ctx(
            ctx,
            CommandKind::Plan,
            cmd.project_name.as_deref(),
            &cmd.flags,
            &repo_dir,
            repo_rel_dir,
            workspace,
            cmd.verbose,
        )
    }

    async fn build_apply_all_commands(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<Vec<ProjectCommandContext>, BuildError> {
        // Apply-all touches every workspace, so the whole pull is locked.
        let _lock = self
            .locker
            .try_lock_pull(&ctx.base_repo.full_name, ctx.pull.num)
            .inspect_err(|_| warn!("pull request was locked"))?;

        let pull_dir = self
            .working_dir
            .get_pull_dir(&ctx.base_repo, &ctx.pull)
            .await
            .context("getting pull dir")?;

        let plans = self
            .pending_plan_finder
            .find(&pull_dir)
            .context("finding pending plans")?;
        info!(count = plans.len(), "pending plans to apply");

        let mut contexts = Vec::new();
        for plan in plans {
            let context = self
                .build_project_command_ctx(
                    ctx,
                    CommandKind::Apply,
                    cmd.project_name.as_deref(),
                    &cmd.flags,
                    &plan.repo_dir,
                    &plan.repo_rel_dir,
                    &plan.workspace,
                    cmd.verbose,
                )
                .map_err(|e| BuildError::PendingPlan {
                    dir: plan.repo_rel_dir.clone(),
                    source: Box::new(e),
                })?;
            contexts.push(context);
        }
        Ok(contexts)
    }

    async fn build_project_apply_command(
        &self,
        ctx: &CommandContext,
        cmd: &CommentCommand,
    ) -> Result<ProjectCommandContext, BuildError> {
        let workspace = cmd.workspace.as_deref().unwrap_or(DEFAULT_WORKSPACE);

        let _lock = self
            .locker
            .try_lock(&ctx.base_repo.full_name, ctx.pull.num, workspace)
            .inspect_err(|_| warn!("workspace was locked"))?;

        // Apply never re-clones: it must see the checkout plan ran in.
        let repo_dir = self
            .working_dir
            .get_working_dir(&ctx.base_repo, &ctx.pull, workspace)
            .await
            .context("getting working dir")?;

        let repo_rel_dir = cmd.repo_rel_dir.as_deref().unwrap_or(DEFAULT_REPO_REL_DIR);
        self.build_project_command_ctx(
            ctx,
            CommandKind::Apply,
            cmd.project_name.as_deref(),
            &cmd.flags,
            &repo_dir,
            repo_rel_dir,
            workspace,
            cmd.verbose,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_project_command_ctx(
        &self,
        ctx: &CommandContext,
        kind: CommandKind,
        project_name: Option<&str>,
        comment_flags: &[String],
        repo_dir: &std::path::Path,
        repo_rel_dir: &str,
        workspace: &str,
        verbose: bool,
    ) -> Result<ProjectCommandContext, BuildError> {
        let (project, repo_config) =
            self.get_config(project_name, repo_rel_dir, workspace, repo_dir)?;

        let merged = match (&project, &repo_config) {
            (Some(project), Some(repo_config)) => self.global_config.merge_project_config(
                &ctx.base_repo.id(),
                project,
                repo_config,
            )?,
            _ => self
                .global_config
                .default_project_config(&ctx.base_repo.id(), repo_rel_dir, workspace),
        };

        self.validate_workspace_allowed(
            repo_config.as_ref(),
            &merged.repo_rel_dir,
            &merged.workspace,
        )?;

        let automerge = repo_config.map(|c| c.automerge).unwrap_or(false);
        Ok(self.build_ctx(ctx, kind, merged, comment_flags, automerge, verbose))
    }

    /// Locate the project declaration a command targets. By name when one
    /// was given, by dir + workspace otherwise; either way the parsed repo
    /// config comes back too when the file exists.
    fn get_config(
        &self,
        project_name: Option<&str>,
        repo_rel_dir: &str,
        workspace: &str,
        repo_dir: &std::path::Path,
    ) -> Result<(Option<Project>, Option<RepoConfig>), BuildError> {
        if !self.parser.has_repo_config(repo_dir) {
            if project_name.is_some() {
                return Err(BuildError::NameRequiresRepoConfig);
            }
            return Ok((None, None));
        }

        let repo_config = self.parser.read_repo_config(repo_dir, &self.global_config)?;

        if let Some(name) = project_name {
            let project = repo_config
                .find_project_by_name(name)
                .cloned()
                .ok_or_else(|| BuildError::UnknownProject(name.to_string()))?;
            return Ok((Some(project), Some(repo_config)));
        }

        let project = {
            let matches = repo_config.find_projects_by_dir_workspace(repo_rel_dir, workspace);
            match matches.as_slice() {
                [] => None,
                [only] => Some((*only).clone()),
                _ => {
                    return Err(BuildError::AmbiguousProject {
                        dir: repo_rel_dir.to_string(),
                        workspace: workspace.to_string(),
                    });
                }
            }
        };
        Ok((project, Some(repo_config)))
    }

    /// If the config declares any projects at this dir, the requested
    /// workspace must be one of theirs.
    fn validate_workspace_allowed(
        &self,
        repo_config: Option<&RepoConfig>,
        repo_rel_dir: &str,
        workspace: &str,
    ) -> Result<(), BuildError> {
        let Some(repo_config) = repo_config else {
            return Ok(());
        };
        let projects = repo_config.find_projects_by_dir(repo_rel_dir);
        if projects.is_empty() {
            return Ok(());
        }

        let mut configured = Vec::new();
        for project in projects {
            if project.workspace == workspace {
                return Ok(());
            }
            configured.push(project.workspace.clone());
        }
        Err(BuildError::WorkspaceNotAllowed {
            workspace: workspace.to_string(),
            configured: configured.join(", "),
        })
    }

    fn build_ctx(
        &self,
        ctx: &CommandContext,
        kind: CommandKind,
        merged: MergedProjectConfig,
        comment_args: &[String],
        automerge_enabled: bool,
        verbose: bool,
    ) -> ProjectCommandContext {
        let steps = match kind {
            CommandKind::Plan => merged.workflow.plan.steps,
            CommandKind::Apply => merged.workflow.apply.steps,
        };

        ProjectCommandContext {
            replan_comment_text: self.comment_builder.build_plan_comment(
                &merged.repo_rel_dir,
                &merged.workspace,
                merged.name.as_deref(),
                comment_args,
            ),
            reapply_comment_text: self.comment_builder.build_apply_comment(
                &merged.repo_rel_dir,
                &merged.workspace,
                merged.name.as_deref(),
            ),
            base_repo: ctx.base_repo.clone(),
            head_repo: ctx.head_repo.clone(),
            pull: ctx.pull.clone(),
            user: ctx.user.clone(),
            command_kind: kind,
            project_name: merged.name,
            repo_rel_dir: merged.repo_rel_dir,
            workspace: merged.workspace,
            terraform_version: merged.terraform_version,
            steps,
            apply_requirements: merged.apply_requirements,
            autoplan_enabled: merged.autoplan_enabled,
            automerge_enabled,
            comment_args: comment_args.to_vec(),
            verbose,
            pull_mergeable: ctx.pull_mergeable,
        }
    }
}
