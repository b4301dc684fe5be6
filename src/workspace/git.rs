use std::path::{Path, PathBuf};

use git2::{
    BranchType, DiffFormat, DiffOptions, IndexAddOption, Repository, Signature,
    WorktreeAddOptions, WorktreePruneOptions,
};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Validate a branch name to prevent argument injection.
/// Rejects names starting with `-` as defence in depth.
pub fn validate_branch_name(name: &str) -> Result<()> {
    if name.starts_with('-') {
        return Err(AppError::Git(format!(
            "Invalid branch name (starts with '-'): {name}"
        )));
    }
    if name.trim().is_empty() {
        return Err(AppError::Git("Branch name is empty".to_string()));
    }
    Ok(())
}

fn find_local_commit<'r>(repo: &'r Repository, branch_name: &str) -> Result<git2::Commit<'r>> {
    let branch = repo
        .find_branch(branch_name, BranchType::Local)
        .map_err(|_| AppError::Workspace(format!("Branch not found: {branch_name}")))?;
    Ok(branch.get().peel_to_commit()?)
}

/// Summary of a repository as shown to dashboard clients.
#[derive(Debug, Clone, Serialize)]
pub struct RepoInfo {
    pub path: PathBuf,
    pub name: String,
    pub branches: Vec<String>,
    pub current_branch: Option<String>,
    pub is_clean: bool,
    pub remote_url: Option<String>,
}

/// Check whether a local branch exists.
pub async fn branch_exists(dir: &Path, branch_name: &str) -> Result<bool> {
    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let exists = repo.find_branch(&branch_name, BranchType::Local).is_ok();
        Ok(exists)
    })
    .await
    .map_err(|e| AppError::Git(format!("Branch-exists task panicked: {e}")))?
}

/// Create a branch pointing at the tip of `base_branch` without checking it out.
pub async fn create_branch_from(dir: &Path, base_branch: &str, branch_name: &str) -> Result<()> {
    validate_branch_name(base_branch)?;
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let base_branch = base_branch.to_string();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let commit = find_local_commit(&repo, &base_branch)?;
        repo.branch(&branch_name, &commit, false)?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Create-branch task panicked: {e}")))?
}

/// Checkout an existing branch.
pub async fn checkout(dir: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let obj = repo.revparse_single(&format!("refs/heads/{branch_name}"))?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head(&format!("refs/heads/{branch_name}"))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Checkout task panicked: {e}")))?
}

/// Add a worktree named `name` at `path` with `branch_name` checked out.
pub async fn add_worktree(dir: &Path, name: &str, path: &Path, branch_name: &str) -> Result<()> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let name = name.to_string();
    let path = path.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let reference = repo.find_reference(&format!("refs/heads/{branch_name}"))?;
        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(&reference));
        repo.worktree(&name, &path, Some(&opts))?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-worktree task panicked: {e}")))?
}

/// Remove the worktree named `name` and its checkout directory.
///
/// Returns `false` when no such worktree is registered.
pub async fn remove_worktree(dir: &Path, name: &str) -> Result<bool> {
    let dir = dir.to_path_buf();
    let name = name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let worktree = match repo.find_worktree(&name) {
            Ok(wt) => wt,
            Err(_) => return Ok(false),
        };

        let mut opts = WorktreePruneOptions::new();
        opts.valid(true).locked(false).working_tree(true);
        worktree.prune(Some(&mut opts))?;

        // prune leaves the directory behind when it was already detached
        let path = worktree.path().to_path_buf();
        if path.exists() {
            std::fs::remove_dir_all(&path)?;
        }
        Ok(true)
    })
    .await
    .map_err(|e| AppError::Git(format!("Remove-worktree task panicked: {e}")))?
}

/// Delete a local branch. Returns `false` when the branch does not exist.
///
/// If the branch is checked out in the main working directory, HEAD is
/// detached at the same commit first so the files on disk stay as they are.
pub async fn delete_branch(dir: &Path, branch_name: &str) -> Result<bool> {
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut branch = match repo.find_branch(&branch_name, BranchType::Local) {
            Ok(b) => b,
            Err(_) => return Ok(false),
        };

        if branch.is_head() {
            let oid = branch
                .get()
                .target()
                .ok_or_else(|| AppError::Git(format!("Branch {branch_name} has no target")))?;
            tracing::warn!(branch = %branch_name, "Detaching HEAD before deleting checked-out branch");
            repo.set_head_detached(oid)?;
        }

        branch.delete()?;
        Ok(true)
    })
    .await
    .map_err(|e| AppError::Git(format!("Delete-branch task panicked: {e}")))?
}

/// Unified diff of the committed changes on `branch_name` since it forked
/// from `base_branch` (`git diff base...branch`).
pub async fn diff_branches(dir: &Path, base_branch: &str, branch_name: &str) -> Result<String> {
    validate_branch_name(base_branch)?;
    validate_branch_name(branch_name)?;

    let dir = dir.to_path_buf();
    let base_branch = base_branch.to_string();
    let branch_name = branch_name.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let base = find_local_commit(&repo, &base_branch)?;
        let head = find_local_commit(&repo, &branch_name)?;
        let merge_base = repo.merge_base(base.id(), head.id())?;
        let old_tree = repo.find_commit(merge_base)?.tree()?;
        let new_tree = head.tree()?;

        let mut opts = DiffOptions::new();
        let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

        let mut out = String::new();
        diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
            match line.origin() {
                '+' | '-' | ' ' => out.push(line.origin()),
                _ => {}
            }
            out.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(out)
    })
    .await
    .map_err(|e| AppError::Git(format!("Diff task panicked: {e}")))?
}

/// Stage all changes.
pub async fn add_all(dir: &Path) -> Result<()> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.write()?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Add-all task panicked: {e}")))?
}

/// Commit with a message.
pub async fn commit(dir: &Path, message: &str) -> Result<()> {
    let dir = dir.to_path_buf();
    let message = message.to_string();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("Wizardry", "wizardry@localhost"))?;
        let mut index = repo.index()?;
        let tree_oid = index.write_tree()?;
        let tree = repo.find_tree(tree_oid)?;
        let head = repo.head()?;
        let parent = head.peel_to_commit()?;
        repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(())
    })
    .await
    .map_err(|e| AppError::Git(format!("Commit task panicked: {e}")))?
}

/// Check if there are any staged or unstaged changes.
pub async fn has_changes(dir: &Path) -> Result<bool> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)?;
        let statuses = repo.statuses(None)?;
        Ok(!statuses.is_empty())
    })
    .await
    .map_err(|e| AppError::Git(format!("Has-changes task panicked: {e}")))?
}

/// Collect branch and status information about a repository.
pub async fn repo_info(dir: &Path) -> Result<RepoInfo> {
    let dir = dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let repo = Repository::open(&dir)
            .map_err(|e| AppError::Workspace(format!("Not a git repository: {} ({})", dir.display(), e.message())))?;

        let mut branches = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            if let Some(name) = branch.name()? {
                branches.push(name.to_string());
            }
        }
        branches.sort();

        let current_branch = repo
            .head()
            .ok()
            .filter(|head| head.is_branch())
            .and_then(|head| head.shorthand().map(|s| s.to_string()));

        let is_clean = repo.statuses(None)?.is_empty();

        let remote_url = repo
            .find_remote("origin")
            .ok()
            .and_then(|remote| remote.url().map(|u| u.to_string()));

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(RepoInfo {
            path: dir,
            name,
            branches,
            current_branch,
            is_clean,
            remote_url,
        })
    })
    .await
    .map_err(|e| AppError::Git(format!("Repo-info task panicked: {e}")))?
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::fs;

    #[test]
    fn test_validate_branch_name_rejects_dash_prefix() {
        assert!(validate_branch_name("-evil").is_err());
        assert!(validate_branch_name("--upload-pack").is_err());
        assert!(validate_branch_name("").is_err());
    }

    #[test]
    fn test_validate_branch_name_accepts_normal() {
        assert!(validate_branch_name("main").is_ok());
        assert!(validate_branch_name("feature/my-branch").is_ok());
        assert!(validate_branch_name("wizardry-workflow-1-abcdef").is_ok());
    }

    #[tokio::test]
    async fn test_has_changes_with_new_file() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        assert!(!has_changes(tmp.path()).await.unwrap());

        fs::write(tmp.path().join("hello.txt"), "world").unwrap();
        assert!(has_changes(tmp.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_branch_from_missing_base_fails() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        let err = create_branch_from(tmp.path(), "develop", "wizardry-x")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Branch not found: develop"));
    }

    #[tokio::test]
    async fn test_diff_branches_shows_committed_changes_only() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = init_repo(tmp.path());

        create_branch_from(tmp.path(), "main", "feature").await.unwrap();
        assert_eq!(diff_branches(tmp.path(), "main", "feature").await.unwrap(), "");

        checkout(tmp.path(), "feature").await.unwrap();
        fs::write(tmp.path().join("lib.rs"), "pub fn validate() {}\n").unwrap();
        commit_all(&repo, "add validate");

        // Uncommitted edits are not part of the diff
        fs::write(tmp.path().join("scratch.txt"), "wip").unwrap();

        let diff = diff_branches(tmp.path(), "main", "feature").await.unwrap();
        assert!(diff.contains("diff --git a/lib.rs b/lib.rs"));
        assert!(diff.contains("+pub fn validate() {}"));
        assert!(!diff.contains("scratch.txt"));
    }

    #[tokio::test]
    async fn test_delete_branch_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        create_branch_from(tmp.path(), "main", "doomed").await.unwrap();
        assert!(branch_exists(tmp.path(), "doomed").await.unwrap());
        assert!(delete_branch(tmp.path(), "doomed").await.unwrap());
        assert!(!branch_exists(tmp.path(), "doomed").await.unwrap());
        assert!(!delete_branch(tmp.path(), "doomed").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_checked_out_branch_detaches_head() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());

        create_branch_from(tmp.path(), "main", "current").await.unwrap();
        checkout(tmp.path(), "current").await.unwrap();
        assert!(delete_branch(tmp.path(), "current").await.unwrap());

        let repo = Repository::open(tmp.path()).unwrap();
        assert!(repo.head_detached().unwrap());
    }

    #[tokio::test]
    async fn test_worktree_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let repo_dir = tmp.path().join("repo");
        fs::create_dir_all(&repo_dir).unwrap();
        init_repo(&repo_dir);

        create_branch_from(&repo_dir, "main", "wt-branch").await.unwrap();
        let wt_path = tmp.path().join("wt");
        add_worktree(&repo_dir, "wt-branch", &wt_path, "wt-branch")
            .await
            .unwrap();
        assert!(wt_path.join("README.md").exists());

        let wt_repo = Repository::open(&wt_path).unwrap();
        assert_eq!(wt_repo.head().unwrap().shorthand(), Some("wt-branch"));

        assert!(remove_worktree(&repo_dir, "wt-branch").await.unwrap());
        assert!(!wt_path.exists());
        assert!(!remove_worktree(&repo_dir, "wt-branch").await.unwrap());
    }

    #[tokio::test]
    async fn test_repo_info_lists_branches() {
        let tmp = tempfile::tempdir().unwrap();
        init_repo(tmp.path());
        create_branch_from(tmp.path(), "main", "feature").await.unwrap();

        let info = repo_info(tmp.path()).await.unwrap();
        assert_eq!(info.branches, vec!["feature".to_string(), "main".to_string()]);
        assert_eq!(info.current_branch.as_deref(), Some("main"));
        assert!(info.is_clean);
        assert!(info.remote_url.is_none());
    }

    #[tokio::test]
    async fn test_repo_info_rejects_non_repo() {
        let tmp = tempfile::tempdir().unwrap();
        let err = repo_info(tmp.path()).await.unwrap_err();
        assert!(matches!(err, AppError::Workspace(_)));
    }
}
