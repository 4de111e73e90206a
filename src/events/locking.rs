//! In-memory mutual exclusion for per-pull working directories.
//!
//! Commands for the same `(repo, pull, workspace)` must not overlap: they
//! share a checkout on disk. Apply-all additionally needs the whole pull
//! request to itself. Both shapes hand back an RAII guard, so a lock is
//! released on every exit path from the acquiring operation, panics and
//! task cancellation included.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::LockError;

type LockKey = (String, u64);

#[derive(Debug, Default)]
struct PullLocks {
    workspaces: HashSet<String>,
    pull_held: bool,
}

impl PullLocks {
    fn is_empty(&self) -> bool {
        self.workspaces.is_empty() && !self.pull_held
    }
}

/// The process-wide lock registry. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct WorkingDirLocker {
    locks: Arc<Mutex<HashMap<LockKey, PullLocks>>>,
}

impl WorkingDirLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to lock one workspace of a pull request. Non-blocking: fails
    /// immediately if the workspace, or the whole pull, is already held.
    pub fn try_lock(
        &self,
        repo_full_name: &str,
        pull_num: u64,
        workspace: &str,
    ) -> Result<WorkingDirLock, LockError> {
        let mut locks = self.lock_map();
        let entry = locks
            .entry((repo_full_name.to_string(), pull_num))
            .or_default();
        if entry.pull_held || entry.workspaces.contains(workspace) {
            return Err(LockError::WorkspaceLocked);
        }
        entry.workspaces.insert(workspace.to_string());
        Ok(WorkingDirLock {
            locker: self.clone(),
            repo_full_name: repo_full_name.to_string(),
            pull_num,
            scope: LockScope::Workspace(workspace.to_string()),
        })
    }

    /// Try to lock an entire pull request, excluding every workspace under
    /// it. Fails if any per-workspace lock on the pull is held.
    pub fn try_lock_pull(
        &self,
        repo_full_name: &str,
        pull_num: u64,
    ) -> Result<WorkingDirLock, LockError> {
        let mut locks = self.lock_map();
        let entry = locks
            .entry((repo_full_name.to_string(), pull_num))
            .or_default();
        if entry.pull_held || !entry.workspaces.is_empty() {
            return Err(LockError::PullLocked);
        }
        entry.pull_held = true;
        Ok(WorkingDirLock {
            locker: self.clone(),
            repo_full_name: repo_full_name.to_string(),
            pull_num,
            scope: LockScope::Pull,
        })
    }

    fn unlock(&self, repo_full_name: &str, pull_num: u64, scope: &LockScope) {
        let mut locks = self.lock_map();
        let key = (repo_full_name.to_string(), pull_num);
        if let Some(entry) = locks.get_mut(&key) {
            match scope {
                LockScope::Workspace(workspace) => {
                    entry.workspaces.remove(workspace);
                }
                LockScope::Pull => entry.pull_held = false,
            }
            if entry.is_empty() {
                locks.remove(&key);
            }
        }
    }

    // The map holds plain collections, so state is consistent even if a
    // holder panicked: recover the guard rather than poisoning forever.
    fn lock_map(&self) -> MutexGuard<'_, HashMap<LockKey, PullLocks>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
enum LockScope {
    Workspace(String),
    Pull,
}

/// Guard for a held lock; dropping it releases.
#[derive(Debug)]
pub struct WorkingDirLock {
    locker: WorkingDirLocker,
    repo_full_name: String,
    pull_num: u64,
    scope: LockScope,
}

impl Drop for WorkingDirLock {
    fn drop(&mut self) {
        self.locker
            .unlock(&self.repo_full_name, self.pull_num, &self.scope);
    }
}
