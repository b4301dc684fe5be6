use std::fmt;

use serde::{Deserialize, Serialize};

/// Fine-grained state of a workflow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowPhase {
    Created,
    ImplementerPhase,
    ReviewerPhase,
    PrPhase,
    Completed,
    Failed,
    Terminated,
    Archived,
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowPhase::Created => "CREATED",
            WorkflowPhase::ImplementerPhase => "IMPLEMENTER_PHASE",
            WorkflowPhase::ReviewerPhase => "REVIEWER_PHASE",
            WorkflowPhase::PrPhase => "PR_PHASE",
            WorkflowPhase::Completed => "COMPLETED",
            WorkflowPhase::Failed => "FAILED",
            WorkflowPhase::Terminated => "TERMINATED",
            WorkflowPhase::Archived => "ARCHIVED",
        }
    }

    /// A workflow task may still be driving this session.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            WorkflowPhase::Created
                | WorkflowPhase::ImplementerPhase
                | WorkflowPhase::ReviewerPhase
                | WorkflowPhase::PrPhase
        )
    }

    pub fn status(&self) -> SessionStatus {
        match self {
            WorkflowPhase::Created
            | WorkflowPhase::ImplementerPhase
            | WorkflowPhase::ReviewerPhase
            | WorkflowPhase::PrPhase => SessionStatus::InProgress,
            WorkflowPhase::Completed => SessionStatus::Completed,
            WorkflowPhase::Failed => SessionStatus::Failed,
            WorkflowPhase::Terminated => SessionStatus::Terminated,
            WorkflowPhase::Archived => SessionStatus::Archived,
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status exposed to the dashboard and CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
    Failed,
    Terminated,
    Archived,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Terminated => "terminated",
            SessionStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a workflow run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    /// Reviewer approved; a PR was opened when the PR step is enabled.
    Completed {
        iterations: u32,
        pr_url: Option<String>,
    },
    /// Stopped with a human-readable reason.
    Failed { reason: String },
    /// Stopped by an external terminate request or shutdown.
    Terminated,
}
