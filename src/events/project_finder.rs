//! Mapping a pull request's modified files to the projects that need work.
//!
//! Two strategies: `find_by_config` consults each declared project's
//! `when_modified` globs, `find_by_tree` is the configless fallback that
//! infers projects from where the modified `.tf*` files live.
//!
//! Glob dialect: gitignore-style via `globset` — `**` crosses directory
//! separators, `*` does not. Patterns are evaluated against paths expressed
//! relative to the project dir; files outside the dir gain `../`
//! components, so patterns like `../modules/**` work.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::config::valid::{Project, RepoConfig};

/// A project inferred from the repo tree alone. Workspace and workflow are
/// defaults; only the directory is known.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModifiedProject {
    pub path: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectFinder;

impl ProjectFinder {
    /// The declared projects whose `when_modified` globs match at least one
    /// modified file. Output preserves declaration order. Projects with
    /// autoplan disabled are still returned: the builder decides whether
    /// that matters for the command at hand.
    pub fn find_by_config<'a>(
        &self,
        modified_files: &[String],
        repo_config: &'a RepoConfig,
    ) -> Result<Vec<&'a Project>> {
        let mut matches = Vec::new();
        for project in &repo_config.projects {
            let globs = build_globset(&project.autoplan.when_modified)?;
            let matched = modified_files.iter().any(|file| {
                let relative = relative_to(&project.dir, file);
                globs.is_match(&relative)
            });
            if matched {
                debug!(dir = %project.dir, workspace = %project.workspace, "project matched modified files");
                matches.push(project);
            }
        }
        Ok(matches)
    }

    /// The configless fallback: for each modified `.tf*` file, the nearest
    /// ancestor directory that directly contains a `.tf*` file is a
    /// project. Deduplicated, lexical order.
    pub fn find_by_tree(&self, modified_files: &[String], repo_root: &Path) -> Vec<ModifiedProject> {
        let mut dirs = BTreeSet::new();
        for file in modified_files {
            let name = Path::new(file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !is_tf_file(&name) {
                continue;
            }
            let mut dir = Path::new(file).parent().unwrap_or(Path::new(""));
            loop {
                if dir_contains_tf_file(&repo_root.join(dir)) {
                    let rel = dir.to_string_lossy();
                    dirs.insert(if rel.is_empty() { ".".to_string() } else { rel.into_owned() });
                    break;
                }
                match dir.parent() {
                    Some(parent) => dir = parent,
                    None => break,
                }
            }
        }
        dirs.into_iter()
            .map(|path| ModifiedProject { path })
            .collect()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .with_context(|| format!("invalid when_modified glob {pattern:?}"))?;
        builder.add(glob);
    }
    builder.build().context("compiling when_modified globs")
}

/// Express `file` relative to `dir`, both repo-relative. Files outside
/// `dir` come back with leading `../` components.
fn relative_to(dir: &str, file: &str) -> String {
    if dir == "." {
        return file.to_string();
    }
    let dir_parts: Vec<&str> = dir.split('/').collect();
    let file_parts: Vec<&str> = file.split('/').collect();
    let common = dir_parts
        .iter()
        .zip(file_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = dir_parts.len() - common;
    let mut parts: Vec<&str> = std::iter::repeat_n("..", ups).collect();
    parts.extend(&file_parts[common..]);
    parts.join("/")
}

fn is_tf_file(name: &str) -> bool {
    name.contains(".tf")
}

fn dir_contains_tf_file(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries
        .filter_map(|e| e.ok())
        .any(|e| e.path().is_file() && is_tf_file(&e.file_name().to_string_lossy()))
}
