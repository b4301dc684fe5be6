use std::time::Duration;

use thiserror::Error;

use crate::agent::AgentRole;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Git operation failed: {0}")]
    Git(String),

    #[error("Agent invocation failed: {0}")]
    Invocation(String),

    #[error("agent invocation timed out after {}s", .0.as_secs())]
    InvocationTimeout(Duration),

    #[error("Agent invocation cancelled")]
    Cancelled,

    #[error("Failed to parse {role} handoff: {reason}")]
    Parse {
        role: AgentRole,
        reason: String,
        fragment: String,
    },

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("max iterations exceeded without approval ({0} iterations)")]
    IterationExhausted(u32),

    #[error("Session already exists: {0}")]
    DuplicateId(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Registry write conflict: {0}")]
    RegistryConflict(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("External tool failed: {0}")]
    ExternalTool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<git2::Error> for AppError {
    fn from(e: git2::Error) -> Self {
        AppError::Git(e.message().to_string())
    }
}

impl AppError {
    /// Whether the error is a registry lock conflict worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::RegistryConflict(_))
    }

    /// Raw text attached to the error for diagnostics, if any.
    pub fn fragment(&self) -> Option<&str> {
        match self {
            AppError::Parse { fragment, .. } => Some(fragment),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
