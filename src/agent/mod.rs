pub mod claude;
pub mod invoker;
pub mod prompt;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use claude::ClaudeCodeInvoker;
pub use invoker::{
    invoke_with_deadline, AgentInvoker, AgentTranscript, InvocationConfig, InvocationRequest,
};

/// The two agent roles taking turns in a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Implementer,
    Reviewer,
}

impl AgentRole {
    pub const ALL: [AgentRole; 2] = [AgentRole::Implementer, AgentRole::Reviewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Implementer => "implementer",
            AgentRole::Reviewer => "reviewer",
        }
    }

    /// Capitalized name, as it appears in transcript headings.
    pub fn title(&self) -> &'static str {
        match self {
            AgentRole::Implementer => "Implementer",
            AgentRole::Reviewer => "Reviewer",
        }
    }

    pub fn from_title(title: &str) -> Option<Self> {
        match title.trim().to_ascii_lowercase().as_str() {
            "implementer" => Some(AgentRole::Implementer),
            "reviewer" => Some(AgentRole::Reviewer),
            _ => None,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
