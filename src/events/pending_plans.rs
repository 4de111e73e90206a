//! Discovery of plans awaiting apply.
//!
//! Apply-all doesn't re-plan; it walks the pull's workspace checkouts for
//! planfiles left behind by earlier plan commands. A planfile is named
//! `<workspace>.tfplan` and sits in the project dir it was planned for.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// One plan found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PendingPlan {
    /// The workspace checkout the plan lives in.
    pub repo_dir: PathBuf,
    /// Project dir relative to the checkout root.
    pub repo_rel_dir: String,
    pub workspace: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PendingPlanFinder;

impl PendingPlanFinder {
    /// All pending plans under a pull dir, sorted for stable output.
    pub fn find(&self, pull_dir: &Path) -> Result<Vec<PendingPlan>> {
        let mut plans = Vec::new();
        let entries = std::fs::read_dir(pull_dir)
            .with_context(|| format!("listing pull dir {}", pull_dir.display()))?;
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            self.find_in_checkout(&entry.path(), &mut plans);
        }
        plans.sort();
        Ok(plans)
    }

    fn find_in_checkout(&self, checkout: &Path, plans: &mut Vec<PendingPlan>) {
        let walker = WalkDir::new(checkout).into_iter().filter_entry(|e| {
            // .git and friends never hold planfiles.
            !e.file_name().to_string_lossy().starts_with('.')
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            let Some(workspace) = name.strip_suffix(".tfplan") else {
                continue;
            };
            let rel_dir = entry
                .path()
                .parent()
                .and_then(|p| p.strip_prefix(checkout).ok())
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default();
            plans.push(PendingPlan {
                repo_dir: checkout.to_path_buf(),
                repo_rel_dir: if rel_dir.is_empty() {
                    ".".to_string()
                } else {
                    rel_dir
                },
                workspace: workspace.to_string(),
            });
        }
    }
}
