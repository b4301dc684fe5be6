use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::machine::{ImplementationDecision, IterationController, ReviewDecision};
use super::types::{WorkflowOutcome, WorkflowPhase};
use crate::agent::prompt::{self, DiffPayload};
use crate::agent::{
    invoke_with_deadline, AgentInvoker, AgentRole, AgentTranscript, InvocationConfig,
    InvocationRequest,
};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::handoff::{self, Outcome};
use crate::platform::{pr_body, pr_title, CreatePullRequest, PullRequestPlatform};
use crate::registry::{SessionRegistry, WorkflowSession};
use crate::transcript::TranscriptLog;
use crate::workspace::{Workspace, WorkspaceIsolator};

/// Why a workflow stopped before completing.
#[derive(Debug)]
enum Stop {
    Failed(String),
    Terminated,
}

impl From<AppError> for Stop {
    fn from(e: AppError) -> Self {
        match e {
            AppError::Cancelled => Stop::Terminated,
            e => Stop::Failed(describe(&e)),
        }
    }
}

/// Human-readable failure reason, with the offending agent output when
/// there is one.
fn describe(e: &AppError) -> String {
    match e.fragment() {
        Some(fragment) if !fragment.is_empty() => format!("{e}\nagent output: {fragment}"),
        _ => e.to_string(),
    }
}

/// Drives one session from `CREATED` to a terminal phase.
pub struct WorkflowRunner {
    config: Arc<AppConfig>,
    registry: Arc<SessionRegistry>,
    isolator: Arc<WorkspaceIsolator>,
    invoker: Arc<dyn AgentInvoker>,
    platform: Arc<dyn PullRequestPlatform>,
}

impl WorkflowRunner {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SessionRegistry>,
        isolator: Arc<WorkspaceIsolator>,
        invoker: Arc<dyn AgentInvoker>,
        platform: Arc<dyn PullRequestPlatform>,
    ) -> Self {
        Self {
            config,
            registry,
            isolator,
            invoker,
            platform,
        }
    }

    /// Run the session to completion. Never returns an error: every failure
    /// is recorded on the session and reflected in the outcome.
    pub async fn run(&self, session_id: &str, cancel: CancellationToken) -> WorkflowOutcome {
        let outcome = match self.drive(session_id, &cancel).await {
            Ok(outcome) => outcome,
            Err(Stop::Terminated) => {
                tracing::info!(session_id = %session_id, "Workflow terminated");
                WorkflowOutcome::Terminated
            }
            Err(Stop::Failed(reason)) => self.fail(session_id, reason).await,
        };

        self.release(session_id, &outcome).await;
        outcome
    }

    async fn drive(
        &self,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkflowOutcome, Stop> {
        let session = self.registry.get(session_id).await?;
        let log = TranscriptLog::new(&session.workspace_path);
        let mut controller = IterationController::new(session.max_iterations);

        tracing::info!(
            session_id = %session_id,
            repo = %session.repo_path.display(),
            base = %session.base_branch,
            max_iterations = session.max_iterations,
            "Workflow started"
        );

        let workspace = self
            .isolator
            .create(&session.repo_path, &session.base_branch, session_id)
            .await?;
        let worktree = workspace.worktree.clone();
        self.advance(session_id, WorkflowPhase::ImplementerPhase, move |s| {
            s.worktree_path = worktree;
            s.iteration_count = 1;
        })
        .await?;

        let implementer_system =
            prompt::system_prompt(&session.repo_path, AgentRole::Implementer).await?;
        let reviewer_system = prompt::system_prompt(&session.repo_path, AgentRole::Reviewer).await?;

        loop {
            ensure_live(cancel)?;
            let iteration = controller.iteration();

            let text = prompt::implementer_prompt(
                &session.task,
                controller.feedback(),
                controller.last_implementation(),
            )?;
            let Some(Outcome::Implementer(implementation)) = self
                .turn(&log, &workspace, AgentRole::Implementer, &implementer_system, text, cancel)
                .await?
                .outcome
            else {
                return Err(Stop::Failed("implementer produced no handoff".to_string()));
            };

            if self.config.workflow.auto_commit {
                let message = format!("wizardry: iteration {iteration} for {session_id}");
                self.isolator.commit_pending(&workspace, &message).await?;
            }

            let diff = self
                .isolator
                .diff(&session.repo_path, &session.base_branch, &workspace.branch)
                .await?;
            if let ImplementationDecision::Fail(reason) =
                controller.after_implementation(&implementation, diff.trim().is_empty())
            {
                return Err(Stop::Failed(reason));
            }

            ensure_live(cancel)?;
            self.advance(session_id, WorkflowPhase::ReviewerPhase, |_| {})
                .await?;

            let payload: DiffPayload = prompt::prepare_diff(
                diff,
                &session.workspace_path,
                self.config.workflow.max_inline_diff_bytes,
            )
            .await?;
            let text = prompt::reviewer_prompt(&session.task, &implementation, &payload)?;
            let Some(Outcome::Reviewer(review)) = self
                .turn(&log, &workspace, AgentRole::Reviewer, &reviewer_system, text, cancel)
                .await?
                .outcome
            else {
                return Err(Stop::Failed("reviewer produced no handoff".to_string()));
            };

            match controller.after_review(&review) {
                ReviewDecision::Approve => {
                    tracing::info!(session_id = %session_id, iteration, "Review approved");
                    break;
                }
                ReviewDecision::Retry { iteration: next } => {
                    tracing::info!(
                        session_id = %session_id,
                        iteration,
                        concerns = review.concerns.len(),
                        "Review rejected, retrying"
                    );
                    self.advance(session_id, WorkflowPhase::ImplementerPhase, move |s| {
                        s.iteration_count = next;
                    })
                    .await?;
                }
                ReviewDecision::Exhausted => {
                    return Err(Stop::Failed(
                        AppError::IterationExhausted(controller.max_iterations()).to_string(),
                    ));
                }
            }
        }

        ensure_live(cancel)?;
        let pr_url = if self.config.pr.enabled {
            self.advance(session_id, WorkflowPhase::PrPhase, |_| {}).await?;
            Some(self.open_pull_request(&session, &workspace, &log).await?)
        } else {
            None
        };

        let url = pr_url.clone();
        self.advance(session_id, WorkflowPhase::Completed, move |s| {
            s.pr_url = url;
            s.last_error = None;
        })
        .await?;

        tracing::info!(
            session_id = %session_id,
            iterations = controller.iteration(),
            pr_url = pr_url.as_deref().unwrap_or("-"),
            "Workflow completed"
        );
        Ok(WorkflowOutcome::Completed {
            iterations: controller.iteration(),
            pr_url,
        })
    }

    /// One agent turn: invoke, keep the raw transcript, then parse.
    async fn turn(
        &self,
        log: &TranscriptLog,
        workspace: &Workspace,
        role: AgentRole,
        system_prompt: &str,
        prompt: String,
        cancel: &CancellationToken,
    ) -> Result<AgentTranscript, Stop> {
        let request = InvocationRequest {
            role,
            system_prompt: system_prompt.to_string(),
            prompt,
            config: InvocationConfig::for_role(role, &self.config.agent, workspace.path.clone()),
        };

        let mut transcript = invoke_with_deadline(self.invoker.as_ref(), &request, cancel).await?;
        log.record(&transcript).await?;

        match handoff::parse(role, &transcript.text) {
            Ok(outcome) => {
                tracing::debug!(role = %role, outcome = ?outcome, "Agent handoff accepted");
                transcript.outcome = Some(outcome);
                Ok(transcript)
            }
            Err(e) => {
                tracing::warn!(role = %role, error = %e, "Agent handoff rejected");
                Err(e.into())
            }
        }
    }

    async fn open_pull_request(
        &self,
        session: &WorkflowSession,
        workspace: &Workspace,
        log: &TranscriptLog,
    ) -> Result<String, Stop> {
        let request = CreatePullRequest {
            repo_dir: workspace.path.clone(),
            title: pr_title(&session.task),
            body: pr_body(
                &session.task,
                &session.session_id,
                &session.base_branch,
                &workspace.branch,
                log.dir(),
            ),
            head_branch: workspace.branch.clone(),
            base_branch: session.base_branch.clone(),
        };

        match self.platform.create_pull_request(&request).await {
            Ok(pr) => Ok(pr.url),
            // The branch and its commits stay; only the PR step failed.
            Err(e) => Err(Stop::Failed(format!("pull request creation failed: {e}"))),
        }
    }

    async fn advance<F>(&self, session_id: &str, to: WorkflowPhase, mutate: F) -> Result<(), Stop>
    where
        F: FnOnce(&mut WorkflowSession) + Send,
    {
        match self.registry.transition(session_id, to, mutate).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.stop_for_rejected_write(session_id, e).await),
        }
    }

    /// A write refused because the session was terminated or archived
    /// underneath us means the workflow was stopped, not that it failed.
    async fn stop_for_rejected_write(&self, session_id: &str, e: AppError) -> Stop {
        if matches!(e, AppError::InvalidTransition { .. }) {
            if let Ok(current) = self.registry.get(session_id).await {
                if !current.is_active() {
                    return Stop::Terminated;
                }
            }
        }
        e.into()
    }

    async fn fail(&self, session_id: &str, reason: String) -> WorkflowOutcome {
        tracing::warn!(session_id = %session_id, reason = %reason, "Workflow failed");

        let last_error = reason.clone();
        match self
            .registry
            .transition(session_id, WorkflowPhase::Failed, move |s| {
                s.last_error = Some(last_error);
            })
            .await
        {
            Ok(_) => WorkflowOutcome::Failed { reason },
            Err(e) => match self.stop_for_rejected_write(session_id, e).await {
                Stop::Terminated => WorkflowOutcome::Terminated,
                Stop::Failed(write_error) => {
                    tracing::error!(
                        session_id = %session_id,
                        error = %write_error,
                        "Failed to record workflow failure"
                    );
                    WorkflowOutcome::Failed { reason }
                }
            },
        }
    }

    /// Apply the retention policy once the workflow has stopped.
    async fn release(&self, session_id: &str, outcome: &WorkflowOutcome) {
        let session = match self.registry.get(session_id).await {
            Ok(session) => session,
            Err(_) => return,
        };
        self.isolator
            .release(&session.repo_path, &session.branch_name);

        let retain = match outcome {
            WorkflowOutcome::Completed { pr_url, .. } => session.no_cleanup || pr_url.is_none(),
            WorkflowOutcome::Failed { .. } => {
                session.no_cleanup || self.config.workflow.retain_on_failure
            }
            // Left alone; the terminate request decides.
            WorkflowOutcome::Terminated => return,
        };

        // Nothing was isolated if the workflow never left CREATED.
        if session.iteration_count == 0 {
            return;
        }

        if let Err(e) = self
            .isolator
            .cleanup(&session.repo_path, &session.branch_name, retain)
            .await
        {
            tracing::warn!(session_id = %session_id, error = %e, "Cleanup failed");
        }
    }
}

fn ensure_live(cancel: &CancellationToken) -> Result<(), Stop> {
    if cancel.is_cancelled() {
        Err(Stop::Terminated)
    } else {
        Ok(())
    }
}
