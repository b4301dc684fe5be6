use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::{SessionStatus, WorkflowPhase};
use crate::workspace::branch_name;

/// The persisted record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSession {
    pub session_id: String,
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub branch_name: String,
    pub task: String,
    /// Always the projection of `phase`.
    pub status: SessionStatus,
    pub phase: WorkflowPhase,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub terminated_at: Option<DateTime<Utc>>,
    /// Session directory holding transcripts and the worktree.
    pub workspace_path: PathBuf,
    /// Checkout the agents work in.
    #[serde(default)]
    pub worktree_path: Option<PathBuf>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub no_cleanup: bool,
    #[serde(default)]
    pub pr_url: Option<String>,
}

impl WorkflowSession {
    pub fn new(
        session_id: impl Into<String>,
        repo_path: impl Into<PathBuf>,
        base_branch: impl Into<String>,
        task: impl Into<String>,
        max_iterations: u32,
        workspace_path: impl Into<PathBuf>,
    ) -> Self {
        let session_id = session_id.into();
        let now = Utc::now();
        Self {
            branch_name: branch_name(&session_id),
            session_id,
            repo_path: repo_path.into(),
            base_branch: base_branch.into(),
            task: task.into(),
            status: SessionStatus::InProgress,
            phase: WorkflowPhase::Created,
            iteration_count: 0,
            max_iterations,
            created_at: now,
            updated_at: now,
            terminated_at: None,
            workspace_path: workspace_path.into(),
            worktree_path: None,
            last_error: None,
            no_cleanup: false,
            pr_url: None,
        }
    }

    pub fn with_no_cleanup(mut self, no_cleanup: bool) -> Self {
        self.no_cleanup = no_cleanup;
        self
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    /// Directory the agents run in: the worktree when there is one,
    /// otherwise the repository itself.
    pub fn working_dir(&self) -> PathBuf {
        self.worktree_path
            .clone()
            .unwrap_or_else(|| self.repo_path.clone())
    }
}
