use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::AgentRole;
use crate::config::AgentConfig;
use crate::error::{AppError, Result};
use crate::handoff::Outcome;

/// Per-role limits for one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationConfig {
    pub max_turns: u32,
    pub allowed_tools: Vec<String>,
    /// Must be the session's isolated workspace.
    pub working_dir: PathBuf,
    pub auto_accept_edits: bool,
    pub timeout: Duration,
    pub model: Option<String>,
}

impl InvocationConfig {
    pub fn for_role(role: AgentRole, agent: &AgentConfig, working_dir: PathBuf) -> Self {
        let (max_turns, allowed_tools, auto_accept_edits) = match role {
            AgentRole::Implementer => (
                agent.implementer_max_turns,
                agent.implementer_tools.clone(),
                agent.auto_accept_edits,
            ),
            // The reviewer reads; it never needs edit permission.
            AgentRole::Reviewer => (agent.reviewer_max_turns, agent.reviewer_tools.clone(), false),
        };

        Self {
            max_turns,
            allowed_tools,
            working_dir,
            auto_accept_edits,
            timeout: Duration::from_secs(agent.timeout_secs),
            model: agent.model.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub role: AgentRole,
    pub system_prompt: String,
    pub prompt: String,
    pub config: InvocationConfig,
}

/// Everything an agent said during one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct AgentTranscript {
    pub role: AgentRole,
    pub prompt: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    /// Filled in once the handoff has been parsed and validated.
    pub outcome: Option<Outcome>,
}

impl AgentTranscript {
    pub fn new(role: AgentRole, prompt: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role,
            prompt: prompt.into(),
            text: text.into(),
            timestamp: Utc::now(),
            outcome: None,
        }
    }
}

/// Runs one agent turn to completion.
///
/// Dropping the returned future must abandon the invocation; that is how
/// cancellation and timeouts reach the agent process.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, request: &InvocationRequest) -> Result<AgentTranscript>;
}

/// Invoke with the request's wall-clock timeout, giving up early when
/// `cancel` fires.
pub async fn invoke_with_deadline(
    invoker: &dyn AgentInvoker,
    request: &InvocationRequest,
    cancel: &CancellationToken,
) -> Result<AgentTranscript> {
    if !request.config.working_dir.is_dir() {
        return Err(AppError::Invocation(format!(
            "working directory {} does not exist",
            request.config.working_dir.display()
        )));
    }

    let timeout = request.config.timeout;
    tracing::debug!(
        role = %request.role,
        max_turns = request.config.max_turns,
        timeout_secs = timeout.as_secs(),
        "Invoking agent"
    );

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::info!(role = %request.role, "Agent invocation cancelled");
            Err(AppError::Cancelled)
        }
        result = tokio::time::timeout(timeout, invoker.invoke(request)) => match result {
            Ok(transcript) => transcript,
            Err(_) => {
                tracing::warn!(role = %request.role, timeout_secs = timeout.as_secs(), "Agent invocation timed out");
                Err(AppError::InvocationTimeout(timeout))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowInvoker {
        delay: Duration,
    }

    #[async_trait]
    impl AgentInvoker for SlowInvoker {
        async fn invoke(&self, request: &InvocationRequest) -> Result<AgentTranscript> {
            tokio::time::sleep(self.delay).await;
            Ok(AgentTranscript::new(request.role, &request.prompt, "done"))
        }
    }

    fn request(dir: PathBuf, timeout: Duration) -> InvocationRequest {
        let mut config = InvocationConfig::for_role(AgentRole::Reviewer, &AgentConfig::default(), dir);
        config.timeout = timeout;
        InvocationRequest {
            role: AgentRole::Reviewer,
            system_prompt: String::new(),
            prompt: "review".to_string(),
            config,
        }
    }

    #[test]
    fn test_role_configs_follow_agent_config() {
        let agent = AgentConfig::default();
        let implementer =
            InvocationConfig::for_role(AgentRole::Implementer, &agent, PathBuf::from("/w"));
        assert_eq!(implementer.max_turns, 35);
        assert!(implementer.allowed_tools.iter().any(|t| t == "Write"));
        assert!(implementer.auto_accept_edits);

        let reviewer = InvocationConfig::for_role(AgentRole::Reviewer, &agent, PathBuf::from("/w"));
        assert_eq!(reviewer.max_turns, 8);
        assert!(!reviewer.allowed_tools.iter().any(|t| t == "Write"));
        assert!(!reviewer.auto_accept_edits);
        assert_eq!(reviewer.timeout, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = SlowInvoker { delay: Duration::from_millis(5) };
        let req = request(dir.path().to_path_buf(), Duration::from_secs(5));

        let transcript = invoke_with_deadline(&invoker, &req, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transcript.text, "done");
        assert_eq!(transcript.prompt, "review");
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = SlowInvoker { delay: Duration::from_secs(60) };
        let req = request(dir.path().to_path_buf(), Duration::from_millis(20));

        let err = invoke_with_deadline(&invoker, &req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvocationTimeout(_)));
        assert!(err.to_string().contains("agent invocation timed out"));
    }

    #[tokio::test]
    async fn test_cancellation_wins() {
        let dir = tempfile::tempdir().unwrap();
        let invoker = SlowInvoker { delay: Duration::from_secs(60) };
        let req = request(dir.path().to_path_buf(), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = invoke_with_deadline(&invoker, &req, &cancel).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_invocation_error() {
        let invoker = SlowInvoker { delay: Duration::ZERO };
        let req = request(PathBuf::from("/definitely/not/here"), Duration::from_secs(1));

        let err = invoke_with_deadline(&invoker, &req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Invocation(_)));
    }
}
