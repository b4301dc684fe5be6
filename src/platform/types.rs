use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Maximum task characters used in a PR title.
const TITLE_TASK_CHARS: usize = 60;

/// Everything needed to open a pull request for an approved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePullRequest {
    /// Directory the PR tooling runs in (the session worktree or the repo).
    pub repo_dir: PathBuf,
    pub title: String,
    pub body: String,
    pub head_branch: String,
    pub base_branch: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub url: String,
    pub head_branch: String,
    pub base_branch: String,
}

pub fn pr_title(task: &str) -> String {
    let task = task.trim();
    let mut title: String = task.chars().take(TITLE_TASK_CHARS).collect();
    if task.chars().count() > TITLE_TASK_CHARS {
        title.push_str("...");
    }
    title
}

pub fn pr_body(
    task: &str,
    session_id: &str,
    base_branch: &str,
    head_branch: &str,
    transcripts_dir: &std::path::Path,
) -> String {
    format!(
        r#"## Automated workflow implementation

**Task**: {task}
**Workflow ID**: {session_id}
**Base branch**: {base_branch}
**Implementation branch**: {head_branch}

## Agent workflow
- **Implementer** analyzed the codebase and committed the change.
- **Reviewer** reviewed the diff and approved it.

## Transcripts
Full agent conversations: `{}`

---
Generated by Wizardry"#,
        transcripts_dir.display()
    )
}
