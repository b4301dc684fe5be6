use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::{IsolationMode, WorkspaceConfig};
use crate::error::{AppError, Result};
use crate::workspace::git;

/// Creates and destroys per-session branches.
///
/// Every operation that touches a repository takes that repository's lock,
/// keyed by canonical path, so checkouts and ref updates on one repository
/// never interleave. Distinct repositories do not contend.
pub struct WorkspaceIsolator {
    root: PathBuf,
    mode: IsolationMode,
    repo_locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
    /// In-place mode only: which session branch owns each repository's
    /// working directory.
    checked_out: Mutex<HashMap<PathBuf, String>>,
}

/// An isolated branch ready for the agents to work in.
#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory the agents run in; the branch is checked out here.
    pub path: PathBuf,
    pub branch: String,
    /// Set when the branch lives in a dedicated worktree.
    pub worktree: Option<PathBuf>,
}

pub fn branch_name(workflow_id: &str) -> String {
    format!("wizardry-{workflow_id}")
}

impl WorkspaceIsolator {
    pub fn new(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.root.clone(),
            mode: config.isolation,
            repo_locks: Mutex::new(HashMap::new()),
            checked_out: Mutex::new(HashMap::new()),
        }
    }

    fn lock_key(repo_path: &Path) -> PathBuf {
        repo_path
            .canonicalize()
            .unwrap_or_else(|_| repo_path.to_path_buf())
    }

    async fn lock_repo(&self, repo_path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .repo_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(
                locks
                    .entry(Self::lock_key(repo_path))
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    fn worktree_path(&self, workflow_id: &str) -> PathBuf {
        self.root.join(workflow_id).join("workspace_repo")
    }

    /// Create the isolated branch `wizardry-{workflow_id}` off `base_branch`.
    ///
    /// Fails if the branch already exists; an existing branch may belong to a
    /// live session and is never deleted here.
    pub async fn create(
        &self,
        repo_path: &Path,
        base_branch: &str,
        workflow_id: &str,
    ) -> Result<Workspace> {
        let branch = branch_name(workflow_id);
        let _guard = self.lock_repo(repo_path).await;

        if git::branch_exists(repo_path, &branch).await? {
            return Err(AppError::Workspace(format!(
                "Branch {branch} already exists in {}; refusing to reuse it",
                repo_path.display()
            )));
        }

        match self.mode {
            IsolationMode::Worktree => {
                let path = self.worktree_path(workflow_id);
                if path.exists() {
                    return Err(AppError::Workspace(format!(
                        "Worktree directory already exists: {}",
                        path.display()
                    )));
                }
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        AppError::Workspace(format!("Failed to create session dir: {e}"))
                    })?;
                }

                git::create_branch_from(repo_path, base_branch, &branch).await?;
                if let Err(e) = git::add_worktree(repo_path, &branch, &path, &branch).await {
                    // The branch was created by this call, so it is ours to remove
                    if let Err(rollback) = git::delete_branch(repo_path, &branch).await {
                        tracing::warn!(
                            repo = %repo_path.display(),
                            branch = %branch,
                            error = %rollback,
                            "Failed to remove branch after worktree error"
                        );
                    }
                    return Err(AppError::Workspace(format!(
                        "Failed to create worktree at {}: {e}",
                        path.display()
                    )));
                }

                tracing::info!(
                    repo = %repo_path.display(),
                    branch = %branch,
                    worktree = %path.display(),
                    "Created isolated worktree"
                );

                Ok(Workspace {
                    path: path.clone(),
                    branch,
                    worktree: Some(path),
                })
            }
            IsolationMode::InPlace => {
                if let Some(owner) = self.in_place_owner(repo_path) {
                    return Err(AppError::Workspace(format!(
                        "{} is checked out on {owner} for a running session; \
                         in-place isolation allows one session per repository",
                        repo_path.display()
                    )));
                }
                if git::has_changes(repo_path).await? {
                    return Err(AppError::Workspace(format!(
                        "Working tree of {} is dirty",
                        repo_path.display()
                    )));
                }

                git::checkout(repo_path, base_branch).await.map_err(|e| {
                    AppError::Workspace(format!("Failed to checkout {base_branch}: {e}"))
                })?;
                git::create_branch_from(repo_path, base_branch, &branch).await?;
                git::checkout(repo_path, &branch).await?;
                self.checked_out()
                    .insert(Self::lock_key(repo_path), branch.clone());

                tracing::info!(
                    repo = %repo_path.display(),
                    branch = %branch,
                    "Created isolated branch in place"
                );

                Ok(Workspace {
                    path: repo_path.to_path_buf(),
                    branch,
                    worktree: None,
                })
            }
        }
    }

    fn checked_out(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, String>> {
        self.checked_out
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn in_place_owner(&self, repo_path: &Path) -> Option<String> {
        self.checked_out().get(&Self::lock_key(repo_path)).cloned()
    }

    /// Give up `branch`'s claim on the repository's working directory once its
    /// session has stopped. Only meaningful in in-place mode.
    pub fn release(&self, repo_path: &Path, branch: &str) {
        let key = Self::lock_key(repo_path);
        let mut checked_out = self.checked_out();
        if checked_out.get(&key).is_some_and(|owner| owner == branch) {
            checked_out.remove(&key);
            tracing::debug!(repo = %repo_path.display(), branch = %branch, "Released working directory");
        }
    }

    /// Unified diff of the commits on `branch` since it forked from `base_branch`.
    pub async fn diff(&self, repo_path: &Path, base_branch: &str, branch: &str) -> Result<String> {
        git::diff_branches(repo_path, base_branch, branch).await
    }

    /// Remove the session's worktree and branch unless `retain` is set.
    ///
    /// Safe to call repeatedly: a missing branch or worktree is not an error.
    pub async fn cleanup(&self, repo_path: &Path, branch: &str, retain: bool) -> Result<()> {
        self.release(repo_path, branch);
        if retain {
            tracing::info!(
                repo = %repo_path.display(),
                branch = %branch,
                "Retaining branch"
            );
            return Ok(());
        }

        let _guard = self.lock_repo(repo_path).await;

        let removed_worktree = git::remove_worktree(repo_path, branch).await?;
        let removed_branch = git::delete_branch(repo_path, branch).await?;

        tracing::info!(
            repo = %repo_path.display(),
            branch = %branch,
            removed_worktree,
            removed_branch,
            "Cleaned up isolated branch"
        );
        Ok(())
    }

    /// Stage and commit anything the agent left uncommitted.
    ///
    /// Returns `false` when the working tree was already clean.
    pub async fn commit_pending(&self, workspace: &Workspace, message: &str) -> Result<bool> {
        if !git::has_changes(&workspace.path).await? {
            tracing::debug!(branch = %workspace.branch, "No uncommitted changes");
            return Ok(false);
        }

        git::add_all(&workspace.path).await?;
        git::commit(&workspace.path, message).await?;
        tracing::info!(branch = %workspace.branch, "Committed pending changes");
        Ok(true)
    }

    pub async fn repo_info(&self, repo_path: &Path) -> Result<git::RepoInfo> {
        git::repo_info(repo_path).await
    }
}
