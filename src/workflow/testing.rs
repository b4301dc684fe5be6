//! Scripted collaborators for driving workflows in tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use git2::Repository;

use crate::agent::{AgentInvoker, AgentRole, AgentTranscript, InvocationRequest};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::platform::{CreatePullRequest, PullRequest, PullRequestPlatform};
use crate::workspace::git::test_support::commit_all;

/// What the fake agent does on its next turn.
pub enum Reply {
    /// Write `file` in the working directory, commit it, then answer.
    Commit {
        file: &'static str,
        contents: String,
        text: String,
    },
    /// Answer without touching the workspace.
    Say(String),
    /// Never answer.
    Hang,
}

#[derive(Default)]
pub struct ScriptedInvoker {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<(AgentRole, String)>>,
}

impl ScriptedInvoker {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn roles(&self) -> Vec<AgentRole> {
        self.calls.lock().unwrap().iter().map(|(r, _)| *r).collect()
    }

    pub fn prompts(&self, role: AgentRole) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<AgentTranscript> {
        self.calls
            .lock()
            .unwrap()
            .push((request.role, request.prompt.clone()));
        let reply = self.replies.lock().unwrap().pop_front();

        let text = match reply {
            Some(Reply::Commit {
                file,
                contents,
                text,
            }) => {
                let dir = &request.config.working_dir;
                std::fs::write(dir.join(file), contents)?;
                let repo = Repository::open(dir)?;
                commit_all(&repo, &format!("agent: update {file}"));
                text
            }
            Some(Reply::Say(text)) => text,
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                String::new()
            }
            None => return Err(AppError::Invocation("script exhausted".to_string())),
        };

        Ok(AgentTranscript::new(request.role, &request.prompt, text))
    }
}

pub fn implemented(ready: bool) -> String {
    format!(
        "I made the change.\n\n[Tool: Write]\n\n```json\n{}\n```",
        serde_json::json!({
            "rationale": "Added the requested file",
            "files_modified": ["hello.txt"],
            "confidence": 8,
            "testing_notes": "Checked the file contents",
            "ready_for_review": ready,
        })
    )
}

pub fn reviewed(approval: bool, concern: &str) -> String {
    format!(
        "Looked at the diff.\n{}",
        serde_json::json!({
            "approval": approval,
            "overall_assessment": if approval { "Ship it" } else { "Needs work" },
            "strengths": ["Small change"],
            "concerns": if approval { vec![] } else { vec![concern] },
            "suggested_fixes": if approval { vec![] } else { vec![format!("Fix: {concern}")] },
            "confidence": 7,
        })
    )
}

pub fn commit(file: &'static str, contents: &str, text: String) -> Reply {
    Reply::Commit {
        file,
        contents: contents.to_string(),
        text,
    }
}

#[derive(Default)]
pub struct RecordingPlatform {
    pub fail: bool,
    pub requests: Mutex<Vec<CreatePullRequest>>,
}

impl RecordingPlatform {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn requests(&self) -> Vec<CreatePullRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestPlatform for RecordingPlatform {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        self.requests.lock().unwrap().push(pr.clone());
        if self.fail {
            return Err(AppError::ExternalTool("gh: not authenticated".to_string()));
        }
        Ok(PullRequest {
            url: "https://github.com/acme/app/pull/1".to_string(),
            head_branch: pr.head_branch.clone(),
            base_branch: pr.base_branch.clone(),
        })
    }
}

/// Configuration rooted in a throwaway directory.
pub fn test_config(root: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.workspace.root = root.to_path_buf();
    config.agent.timeout_secs = 30;
    config.registry.lock_backoff_ms = 1;
    config
}
