use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentInvoker, ClaudeCodeInvoker};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::platform::{GhCliPlatform, PullRequestPlatform};
use crate::registry::{JsonFileStore, SessionRegistry, WorkflowSession};
use crate::transcript::{ConversationEntry, TranscriptLog, Transcripts};
use crate::workflow::{WorkflowPhase, WorkflowRunner};
use crate::workspace::{git, RepoInfo, WorkspaceIsolator};

/// Reason recorded on sessions stopped by a shutdown signal.
pub const SHUTDOWN_REASON: &str = "interrupted by shutdown";

/// Reason recorded on sessions stopped by an explicit terminate request.
pub const TERMINATE_REASON: &str = "terminated by request";

/// Parameters for a new workflow session.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub repo_path: PathBuf,
    pub base_branch: String,
    pub task: String,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub no_cleanup: bool,
}

struct RunningWorkflow {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

type RunningMap = Arc<Mutex<HashMap<String, RunningWorkflow>>>;

/// Starts, tracks and stops workflow sessions.
///
/// Each workflow runs in its own task; workflows do not wait on each other
/// except where they share a repository's lock inside the isolator.
pub struct Orchestrator {
    config: Arc<AppConfig>,
    registry: Arc<SessionRegistry>,
    isolator: Arc<WorkspaceIsolator>,
    runner: Arc<WorkflowRunner>,
    running: RunningMap,
}

impl Orchestrator {
    pub fn new(
        config: Arc<AppConfig>,
        registry: Arc<SessionRegistry>,
        isolator: Arc<WorkspaceIsolator>,
        invoker: Arc<dyn AgentInvoker>,
        platform: Arc<dyn PullRequestPlatform>,
    ) -> Self {
        let runner = Arc::new(WorkflowRunner::new(
            config.clone(),
            registry.clone(),
            isolator.clone(),
            invoker,
            platform,
        ));

        Self {
            config,
            registry,
            isolator,
            runner,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Production wiring: JSON registry under the workspace root, the Claude
    /// Code CLI as agent, and `gh` for pull requests.
    pub fn from_config(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(JsonFileStore::new(config.registry_path())),
            &config.registry,
        ));
        let isolator = Arc::new(WorkspaceIsolator::new(&config.workspace));
        let invoker: Arc<dyn AgentInvoker> = Arc::new(ClaudeCodeInvoker::new(&config.agent));
        let platform: Arc<dyn PullRequestPlatform> = Arc::new(GhCliPlatform::new(&config.pr));

        Self::new(config, registry, isolator, invoker, platform)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a session and start its workflow in the background.
    pub async fn start(&self, request: StartRequest) -> Result<WorkflowSession> {
        let session = self.prepare(request).await?;
        let session = self.registry.create(session).await?;
        self.spawn(&session.session_id).await;
        Ok(session)
    }

    /// Start a session and wait for it to stop.
    pub async fn run(&self, request: StartRequest) -> Result<WorkflowSession> {
        let session = self.start(request).await?;
        self.wait(&session.session_id).await
    }

    /// Wait for a running workflow to stop, returning its final record.
    pub async fn wait(&self, session_id: &str) -> Result<WorkflowSession> {
        let done = {
            let running = self.running.lock().await;
            running.get(session_id).map(|r| r.done.clone())
        };
        if let Some(mut done) = done {
            // An error means the task went away, which is just as final.
            let _ = done.wait_for(|finished| *finished).await;
        }
        self.registry.get(session_id).await
    }

    pub async fn is_running(&self, session_id: &str) -> bool {
        self.running.lock().await.contains_key(session_id)
    }

    async fn prepare(&self, request: StartRequest) -> Result<WorkflowSession> {
        let task = request.task.trim();
        if task.is_empty() {
            return Err(AppError::Config("task must not be empty".to_string()));
        }
        let base_branch = request.base_branch.trim();
        if base_branch.is_empty() {
            return Err(AppError::Config("base_branch must not be empty".to_string()));
        }
        git::validate_branch_name(base_branch).map_err(|e| AppError::Config(e.to_string()))?;

        let max_iterations = request
            .max_iterations
            .unwrap_or(self.config.workflow.max_iterations);
        if max_iterations == 0 {
            return Err(AppError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }

        let info = self
            .isolator
            .repo_info(&request.repo_path)
            .await
            .map_err(|e| AppError::Config(format!("invalid repo_path: {e}")))?;
        if !info.branches.iter().any(|b| b == base_branch) {
            return Err(AppError::Config(format!(
                "base branch '{base_branch}' does not exist in {}",
                info.path.display()
            )));
        }

        let id = generate_session_id();
        let session = WorkflowSession::new(
            id.clone(),
            info.path,
            base_branch,
            task,
            max_iterations,
            self.config.session_dir(&id),
        )
        .with_no_cleanup(request.no_cleanup);

        Ok(session)
    }

    async fn spawn(&self, session_id: &str) {
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        // Hold the map while spawning so the task cannot deregister itself
        // before it has been registered.
        let mut running = self.running.lock().await;
        running.insert(
            session_id.to_string(),
            RunningWorkflow {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let runner = self.runner.clone();
        let map = self.running.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            let outcome = runner.run(&id, cancel).await;
            tracing::info!(session_id = %id, outcome = ?outcome, "Workflow finished");

            map.lock().await.remove(&id);
            let _ = done_tx.send(true);
        });
    }

    /// Cancel the workflow task, if this process runs it, and wait for it.
    async fn stop_task(&self, session_id: &str) {
        let entry = {
            let running = self.running.lock().await;
            running
                .get(session_id)
                .map(|r| (r.cancel.clone(), r.done.clone()))
        };

        if let Some((cancel, mut done)) = entry {
            cancel.cancel();
            let _ = done.wait_for(|finished| *finished).await;
        }
    }

    /// Stop an active session. The workspace is kept unless `cleanup` is set.
    pub async fn terminate(&self, session_id: &str, cleanup: bool) -> Result<WorkflowSession> {
        self.terminate_with_reason(session_id, TERMINATE_REASON).await?;
        if cleanup {
            self.cleanup_workspace(session_id).await?;
        }
        self.registry.get(session_id).await
    }

    async fn terminate_with_reason(&self, session_id: &str, reason: &str) -> Result<()> {
        let reason = reason.to_string();
        // Written first so any later write from the workflow is refused.
        self.registry
            .transition(session_id, WorkflowPhase::Terminated, move |s| {
                s.last_error = Some(reason);
            })
            .await?;
        self.stop_task(session_id).await;

        tracing::info!(session_id = %session_id, "Session terminated");
        Ok(())
    }

    /// Soft-delete a session, optionally removing its branch and worktree.
    /// Calling it again is harmless.
    pub async fn archive(&self, session_id: &str, cleanup_branch: bool) -> Result<WorkflowSession> {
        let session = self.registry.archive(session_id).await?;
        self.stop_task(session_id).await;

        if cleanup_branch {
            self.cleanup_workspace(session_id).await?;
        }
        tracing::info!(session_id = %session_id, cleanup_branch, "Session archived");
        Ok(session)
    }

    /// Remove a session entirely: its workflow is stopped, its branch,
    /// worktree and session directory are removed, then the record.
    pub async fn delete(&self, session_id: &str) -> Result<WorkflowSession> {
        let session = self.registry.get(session_id).await?;
        self.stop_task(session_id).await;

        self.isolator
            .cleanup(&session.repo_path, &session.branch_name, false)
            .await?;
        match tokio::fs::remove_dir_all(&session.workspace_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        self.registry.delete(session_id).await
    }

    async fn cleanup_workspace(&self, session_id: &str) -> Result<()> {
        let session = self.registry.get(session_id).await?;
        self.isolator
            .cleanup(&session.repo_path, &session.branch_name, false)
            .await
    }

    pub async fn list(&self, include_finished: bool) -> Result<Vec<WorkflowSession>> {
        let sessions = self.registry.list().await?;
        Ok(if include_finished {
            sessions
        } else {
            sessions.into_iter().filter(|s| s.is_active()).collect()
        })
    }

    pub async fn get(&self, session_id: &str) -> Result<WorkflowSession> {
        self.registry.get(session_id).await
    }

    pub async fn transcripts(&self, session_id: &str) -> Result<Transcripts> {
        let session = self.registry.get(session_id).await?;
        TranscriptLog::new(&session.workspace_path).read_all().await
    }

    pub async fn conversation(&self, session_id: &str) -> Result<Vec<ConversationEntry>> {
        let session = self.registry.get(session_id).await?;
        TranscriptLog::new(&session.workspace_path)
            .conversation()
            .await
    }

    /// Committed changes on the session branch; empty once the branch is gone.
    pub async fn diff(&self, session_id: &str) -> Result<String> {
        let session = self.registry.get(session_id).await?;
        if !git::branch_exists(&session.repo_path, &session.branch_name).await? {
            return Ok(String::new());
        }
        self.isolator
            .diff(&session.repo_path, &session.base_branch, &session.branch_name)
            .await
    }

    pub async fn repo_info(&self, repo_path: &std::path::Path) -> Result<RepoInfo> {
        self.isolator.repo_info(repo_path).await
    }

    /// Stop every workflow this process is running and mark them terminated.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.running.lock().await.keys().cloned().collect();
        if ids.is_empty() {
            return;
        }

        tracing::info!(count = ids.len(), "Stopping in-flight workflows");
        for id in ids {
            if let Err(e) = self.terminate_with_reason(&id, SHUTDOWN_REASON).await {
                // Already finished between listing and terminating.
                tracing::debug!(session_id = %id, error = %e, "Skipped terminate on shutdown");
                self.stop_task(&id).await;
            }
        }
    }
}

/// `workflow-{unix seconds}-{6 lowercase hex}`.
pub fn generate_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("workflow-{}-{}", chrono::Utc::now().timestamp(), &suffix[..6])
}
