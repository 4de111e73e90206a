//! Seam to the VCS host.
//!
//! The real client (API calls, pagination, auth) lives outside this core;
//! the builder only needs the modified-file list.

use anyhow::Result;
use async_trait::async_trait;

use crate::events::models::{PullRequest, Repo};

/// Abstraction over the VCS host. Real implementations wrap a host API
/// client; tests use a canned double.
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// The paths modified by the pull request, relative to the repo root.
    async fn get_modified_files(&self, base_repo: &Repo, pull: &PullRequest)
    -> Result<Vec<String>>;
}
