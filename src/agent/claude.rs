use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::invoker::{AgentInvoker, AgentTranscript, InvocationRequest};
use crate::config::AgentConfig;
use crate::error::{AppError, Result};

/// Longest stderr excerpt carried in an invocation error.
const STDERR_EXCERPT_CHARS: usize = 500;

/// Runs agent turns through the Claude Code CLI in non-interactive mode.
pub struct ClaudeCodeInvoker {
    command: String,
}

impl ClaudeCodeInvoker {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
        }
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    fn args(request: &InvocationRequest) -> Vec<String> {
        let config = &request.config;
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--max-turns".to_string(),
            config.max_turns.to_string(),
        ];

        if !config.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(config.allowed_tools.join(","));
        }
        if config.auto_accept_edits {
            args.push("--permission-mode".to_string());
            args.push("acceptEdits".to_string());
        }
        if let Some(model) = &config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if !request.system_prompt.is_empty() {
            args.push("--append-system-prompt".to_string());
            args.push(request.system_prompt.clone());
        }

        args
    }
}

#[async_trait]
impl AgentInvoker for ClaudeCodeInvoker {
    async fn invoke(&self, request: &InvocationRequest) -> Result<AgentTranscript> {
        let mut child = Command::new(&self.command)
            .args(Self::args(request))
            .current_dir(&request.config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AppError::Invocation(format!("failed to spawn `{}`: {e}", self.command))
            })?;

        tracing::info!(
            role = %request.role,
            pid = child.id().unwrap_or(0),
            cwd = %request.config.working_dir.display(),
            "Agent process spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Invocation("agent stdout not captured".to_string()))?;
        let stderr = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_string(&mut buf).await;
            }
            buf
        });

        let mut collector = StreamCollector::default();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            collector.push_line(&line);
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if !status.success() {
            return Err(AppError::Invocation(format!(
                "agent exited with status {}: {}",
                status.code().unwrap_or(-1),
                excerpt(&stderr)
            )));
        }
        if collector.is_error {
            return Err(AppError::Invocation(format!(
                "agent reported an error: {}",
                collector.final_result.as_deref().unwrap_or("no details")
            )));
        }

        tracing::info!(
            role = %request.role,
            turns = collector.num_turns.unwrap_or(0),
            chars = collector.text.len(),
            "Agent process finished"
        );

        Ok(AgentTranscript::new(
            request.role,
            &request.prompt,
            collector.into_text(),
        ))
    }
}

/// Events from the CLI's stream-json output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    Assistant {
        message: AssistantMessage,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        num_turns: Option<u32>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
    },
    #[serde(other)]
    Other,
}

/// Folds stream-json lines into transcript text.
#[derive(Debug, Default)]
struct StreamCollector {
    text: String,
    final_result: Option<String>,
    is_error: bool,
    num_turns: Option<u32>,
}

impl StreamCollector {
    fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<StreamEvent>(line) {
            Ok(StreamEvent::Assistant { message }) => {
                for block in message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            self.text.push_str(&text);
                            self.text.push('\n');
                        }
                        ContentBlock::ToolUse { name, .. } => {
                            self.text.push_str(&format!("\n\n[Tool: {name}]\n"));
                        }
                        ContentBlock::Other => {}
                    }
                }
            }
            Ok(StreamEvent::Result {
                result,
                is_error,
                num_turns,
            }) => {
                self.final_result = result;
                self.is_error = is_error;
                self.num_turns = num_turns;
            }
            Ok(StreamEvent::Other) => {}
            // Not an event; keep it so nothing the agent printed is lost.
            Err(_) => {
                self.text.push_str(line);
                self.text.push('\n');
            }
        }
    }

    fn into_text(self) -> String {
        if self.text.trim().is_empty() {
            self.final_result.unwrap_or_default()
        } else {
            self.text
        }
    }
}

fn excerpt(stderr: &str) -> String {
    let trimmed = stderr.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_EXCERPT_CHARS {
        return trimmed.to_string();
    }
    trimmed.chars().skip(count - STDERR_EXCERPT_CHARS).collect()
}
