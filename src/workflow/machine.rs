use serde::{Deserialize, Serialize};

use super::types::WorkflowPhase;
use crate::error::{AppError, Result};
use crate::handoff::{ImplementerOutcome, ReviewerOutcome};

pub struct WorkflowStateMachine;

impl WorkflowStateMachine {
    pub fn validate_transition(id: &str, from: WorkflowPhase, to: WorkflowPhase) -> Result<()> {
        if from == to || Self::allowed_transitions(from).contains(&to) {
            Ok(())
        } else {
            Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            })
        }
    }

    /// Check an explicit move to `to`. Unlike [`Self::validate_transition`],
    /// re-entering a finished phase is refused, so a second terminate cannot
    /// overwrite the first one's record.
    pub fn validate_move(id: &str, from: WorkflowPhase, to: WorkflowPhase) -> Result<()> {
        if from == to && !from.is_active() {
            return Err(AppError::InvalidTransition {
                id: id.to_string(),
                from: from.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Self::validate_transition(id, from, to)
    }

    fn allowed_transitions(from: WorkflowPhase) -> &'static [WorkflowPhase] {
        use WorkflowPhase::*;

        match from {
            Created => &[ImplementerPhase, Failed, Terminated, Archived],
            ImplementerPhase => &[ReviewerPhase, Failed, Terminated, Archived],
            ReviewerPhase => &[ImplementerPhase, PrPhase, Completed, Failed, Terminated, Archived],
            PrPhase => &[Completed, Failed, Terminated, Archived],
            Completed | Failed | Terminated => &[Archived],
            Archived => &[],
        }
    }

    pub fn can_transition(from: WorkflowPhase, to: WorkflowPhase) -> bool {
        Self::validate_transition("", from, to).is_ok()
    }
}

/// Reviewer feedback from one rejected iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    pub iteration: u32,
    pub overall_assessment: String,
    pub concerns: Vec<String>,
    pub suggested_fixes: Vec<String>,
}

/// What to do after the implementer's handoff was parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ImplementationDecision {
    Review,
    Fail(String),
}

/// What to do after the reviewer's handoff was parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    Approve,
    Retry { iteration: u32 },
    Exhausted,
}

/// Retry bookkeeping for the implement/review loop.
///
/// `iteration` is 1 during the first cycle. Each rejection either starts the
/// next cycle with all feedback so far, or ends the loop once `max_iterations`
/// cycles have been reviewed.
#[derive(Debug, Clone)]
pub struct IterationController {
    iteration: u32,
    max_iterations: u32,
    feedback: Vec<ReviewFeedback>,
    last_implementation: Option<ImplementerOutcome>,
}

impl IterationController {
    pub fn new(max_iterations: u32) -> Self {
        Self {
            iteration: 1,
            max_iterations: max_iterations.max(1),
            feedback: Vec::new(),
            last_implementation: None,
        }
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn feedback(&self) -> &[ReviewFeedback] {
        &self.feedback
    }

    pub fn last_implementation(&self) -> Option<&ImplementerOutcome> {
        self.last_implementation.as_ref()
    }

    /// Decide whether the implementer's work may go to review. The diff
    /// check runs before the reviewer is ever invoked.
    pub fn after_implementation(
        &mut self,
        outcome: &ImplementerOutcome,
        diff_is_empty: bool,
    ) -> ImplementationDecision {
        self.last_implementation = Some(outcome.clone());

        if !outcome.ready_for_review {
            return ImplementationDecision::Fail(format!(
                "implementer did not mark the work ready for review: {}",
                outcome.rationale
            ));
        }
        if diff_is_empty {
            return ImplementationDecision::Fail(
                AppError::ContractViolation("no changes committed".to_string()).to_string(),
            );
        }
        ImplementationDecision::Review
    }

    pub fn after_review(&mut self, outcome: &ReviewerOutcome) -> ReviewDecision {
        if outcome.approval {
            return ReviewDecision::Approve;
        }

        self.feedback.push(ReviewFeedback {
            iteration: self.iteration,
            overall_assessment: outcome.overall_assessment.clone(),
            concerns: outcome.concerns.clone(),
            suggested_fixes: outcome.suggested_fixes.clone(),
        });

        if self.iteration >= self.max_iterations {
            return ReviewDecision::Exhausted;
        }
        self.iteration += 1;
        ReviewDecision::Retry {
            iteration: self.iteration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkflowPhase::*;

    fn implementation(ready: bool) -> ImplementerOutcome {
        ImplementerOutcome {
            rationale: "did it".to_string(),
            files_modified: vec!["a.txt".to_string()],
            confidence: 8.0,
            testing_notes: String::new(),
            ready_for_review: ready,
            commit_hash: None,
            committed: None,
        }
    }

    fn review(approval: bool, concern: &str) -> ReviewerOutcome {
        ReviewerOutcome {
            approval,
            overall_assessment: "assessment".to_string(),
            strengths: vec![],
            concerns: vec![concern.to_string()],
            suggested_fixes: vec![format!("fix {concern}")],
            confidence: 7.0,
        }
    }

    #[test]
    fn test_forward_path_is_allowed() {
        assert!(WorkflowStateMachine::can_transition(Created, ImplementerPhase));
        assert!(WorkflowStateMachine::can_transition(ImplementerPhase, ReviewerPhase));
        assert!(WorkflowStateMachine::can_transition(ReviewerPhase, ImplementerPhase));
        assert!(WorkflowStateMachine::can_transition(ReviewerPhase, PrPhase));
        assert!(WorkflowStateMachine::can_transition(PrPhase, Completed));
        assert!(WorkflowStateMachine::can_transition(Completed, Archived));
    }

    #[test]
    fn test_every_active_state_can_stop() {
        for from in [Created, ImplementerPhase, ReviewerPhase, PrPhase] {
            assert!(WorkflowStateMachine::can_transition(from, Failed));
            assert!(WorkflowStateMachine::can_transition(from, Terminated));
        }
    }

    #[test]
    fn test_terminal_states_only_archive() {
        for from in [Completed, Failed, Terminated] {
            assert!(!WorkflowStateMachine::can_transition(from, ImplementerPhase));
            assert!(WorkflowStateMachine::can_transition(from, Archived));
        }
        assert!(!WorkflowStateMachine::can_transition(Terminated, Failed));
        assert!(!WorkflowStateMachine::can_transition(Archived, Completed));
        assert!(WorkflowStateMachine::can_transition(Archived, Archived));
    }

    #[test]
    fn test_explicit_move_cannot_reenter_finished_phase() {
        for phase in [Completed, Failed, Terminated, Archived] {
            assert!(WorkflowStateMachine::validate_move("wf-1", phase, phase).is_err());
        }
        assert!(WorkflowStateMachine::validate_move("wf-1", ImplementerPhase, ImplementerPhase).is_ok());
        assert!(WorkflowStateMachine::validate_move("wf-1", ReviewerPhase, ImplementerPhase).is_ok());
        assert!(WorkflowStateMachine::validate_move("wf-1", Terminated, Archived).is_ok());
    }

    #[test]
    fn test_invalid_transition_error_names_both_states() {
        let err = WorkflowStateMachine::validate_transition("wf-1", Created, Completed).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CREATED"));
        assert!(msg.contains("COMPLETED"));
    }

    #[test]
    fn test_not_ready_fails() {
        let mut controller = IterationController::new(2);
        let decision = controller.after_implementation(&implementation(false), false);
        assert!(matches!(decision, ImplementationDecision::Fail(_)));
    }

    #[test]
    fn test_ready_with_empty_diff_is_contract_violation() {
        let mut controller = IterationController::new(2);
        match controller.after_implementation(&implementation(true), true) {
            ImplementationDecision::Fail(reason) => {
                assert_eq!(reason, "contract violation: no changes committed")
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_first_pass_approval_stays_on_iteration_one() {
        let mut controller = IterationController::new(2);
        assert_eq!(
            controller.after_implementation(&implementation(true), false),
            ImplementationDecision::Review
        );
        assert_eq!(controller.after_review(&review(true, "")), ReviewDecision::Approve);
        assert_eq!(controller.iteration(), 1);
    }

    #[test]
    fn test_rejections_accumulate_until_exhausted() {
        let mut controller = IterationController::new(2);

        assert_eq!(
            controller.after_review(&review(false, "typo")),
            ReviewDecision::Retry { iteration: 2 }
        );
        assert_eq!(controller.feedback().len(), 1);

        assert_eq!(controller.after_review(&review(false, "still wrong")), ReviewDecision::Exhausted);
        assert_eq!(controller.iteration(), 2);
        let concerns: Vec<_> = controller
            .feedback()
            .iter()
            .map(|f| f.concerns[0].as_str())
            .collect();
        assert_eq!(concerns, vec!["typo", "still wrong"]);
    }

    #[test]
    fn test_zero_iterations_is_treated_as_one() {
        let mut controller = IterationController::new(0);
        assert_eq!(controller.after_review(&review(false, "x")), ReviewDecision::Exhausted);
    }
}
