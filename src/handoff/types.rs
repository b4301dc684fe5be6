use serde::{Deserialize, Serialize};

use crate::agent::AgentRole;

/// What the implementer must report at the end of its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementerOutcome {
    pub rationale: String,
    pub files_modified: Vec<String>,
    pub confidence: f64,
    pub testing_notes: String,
    pub ready_for_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,
}

/// What the reviewer must report at the end of its turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerOutcome {
    pub approval: bool,
    pub overall_assessment: String,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub confidence: f64,
}

/// A validated handoff from either role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Outcome {
    Implementer(ImplementerOutcome),
    Reviewer(ReviewerOutcome),
}

impl Outcome {
    pub fn role(&self) -> AgentRole {
        match self {
            Outcome::Implementer(_) => AgentRole::Implementer,
            Outcome::Reviewer(_) => AgentRole::Reviewer,
        }
    }
}

/// Fields each role's handoff object must carry.
pub fn required_fields(role: AgentRole) -> &'static [&'static str] {
    match role {
        AgentRole::Implementer => &[
            "rationale",
            "files_modified",
            "confidence",
            "testing_notes",
            "ready_for_review",
        ],
        AgentRole::Reviewer => &[
            "approval",
            "overall_assessment",
            "strengths",
            "concerns",
            "suggested_fixes",
            "confidence",
        ],
    }
}
