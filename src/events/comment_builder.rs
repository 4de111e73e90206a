//! Rendering the copy-pasteable comment commands.
//!
//! Every context carries the exact comments a user can post to re-run the
//! same plan or apply it. Flags with default values are elided so the
//! comments stay as short as what a user would type.

use crate::config::valid::{DEFAULT_REPO_REL_DIR, DEFAULT_WORKSPACE};

pub trait CommentBuilder: Send + Sync {
    fn build_plan_comment(
        &self,
        repo_rel_dir: &str,
        workspace: &str,
        project: Option<&str>,
        comment_args: &[String],
    ) -> String;

    fn build_apply_comment(
        &self,
        repo_rel_dir: &str,
        workspace: &str,
        project: Option<&str>,
    ) -> String;
}

/// Renders comments for the stock `atlantis` comment syntax.
#[derive(Debug, Clone)]
pub struct DefaultCommentBuilder {
    executable: String,
}

impl DefaultCommentBuilder {
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    fn flags(&self, repo_rel_dir: &str, workspace: &str, project: Option<&str>) -> String {
        // With a project name, dir and workspace are implied by the config.
        if let Some(project) = project {
            return format!(" -p {project}");
        }
        let default_dir = repo_rel_dir == DEFAULT_REPO_REL_DIR;
        let default_workspace = workspace == DEFAULT_WORKSPACE;
        match (default_dir, default_workspace) {
            (true, true) => String::new(),
            (false, true) => format!(" -d {repo_rel_dir}"),
            (true, false) => format!(" -w {workspace}"),
            (false, false) => format!(" -d {repo_rel_dir} -w {workspace}"),
        }
    }
}

impl Default for DefaultCommentBuilder {
    fn default() -> Self {
        Self::new("atlantis")
    }
}

impl CommentBuilder for DefaultCommentBuilder {
    fn build_plan_comment(
        &self,
        repo_rel_dir: &str,
        workspace: &str,
        project: Option<&str>,
        comment_args: &[String],
    ) -> String {
        let flags = self.flags(repo_rel_dir, workspace, project);
        if comment_args.is_empty() {
            format!("{} plan{}", self.executable, flags)
        } else {
            format!(
                "{} plan{} -- {}",
                self.executable,
                flags,
                comment_args.join(" ")
            )
        }
    }

    fn build_apply_comment(
        &self,
        repo_rel_dir: &str,
        workspace: &str,
        project: Option<&str>,
    ) -> String {
        format!(
            "{} apply{}",
            self.executable,
            self.flags(repo_rel_dir, workspace, project)
        )
    }
}
