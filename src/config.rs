use serde::Deserialize;
use std::path::PathBuf;

use crate::error::{AppError, Result};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub pr: PrConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// How a session's branch is materialised on disk.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// Dedicated git worktree per session; the user's checkout is untouched.
    #[default]
    Worktree,
    /// Check out the branch in the repository's own working directory.
    InPlace,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub isolation: IsolationMode,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_agent_command")]
    pub command: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_implementer_max_turns")]
    pub implementer_max_turns: u32,
    #[serde(default = "default_reviewer_max_turns")]
    pub reviewer_max_turns: u32,
    #[serde(default = "default_implementer_tools")]
    pub implementer_tools: Vec<String>,
    #[serde(default = "default_reviewer_tools")]
    pub reviewer_tools: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_accept_edits: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default = "default_max_inline_diff_bytes")]
    pub max_inline_diff_bytes: usize,
    #[serde(default = "default_true")]
    pub retain_on_failure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gh_command")]
    pub command: String,
    #[serde(default = "default_git_command")]
    pub git_command: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default = "default_true")]
    pub push_branch: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,
    #[serde(default = "default_lock_backoff_ms")]
    pub lock_backoff_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/tmp/wizardry-sessions")
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    30 * 60
}

fn default_implementer_max_turns() -> u32 {
    35
}

fn default_reviewer_max_turns() -> u32 {
    8
}

fn default_implementer_tools() -> Vec<String> {
    ["Read", "Write", "Edit", "MultiEdit", "Bash", "Grep", "LS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_reviewer_tools() -> Vec<String> {
    ["Read", "Grep", "Bash", "LS"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_max_iterations() -> u32 {
    2
}

fn default_max_inline_diff_bytes() -> usize {
    10_000
}

fn default_gh_command() -> String {
    "gh".to_string()
}

fn default_git_command() -> String {
    "git".to_string()
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_lock_retries() -> u32 {
    5
}

fn default_lock_backoff_ms() -> u64 {
    50
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            isolation: IsolationMode::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            model: None,
            timeout_secs: default_timeout_secs(),
            implementer_max_turns: default_implementer_max_turns(),
            reviewer_max_turns: default_reviewer_max_turns(),
            implementer_tools: default_implementer_tools(),
            reviewer_tools: default_reviewer_tools(),
            auto_accept_edits: true,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            auto_commit: false,
            max_inline_diff_bytes: default_max_inline_diff_bytes(),
            retain_on_failure: true,
        }
    }
}

impl Default for PrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: default_gh_command(),
            git_command: default_git_command(),
            remote: default_remote(),
            push_branch: true,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_retries: default_lock_retries(),
            lock_backoff_ms: default_lock_backoff_ms(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Load from file if specified
        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path));
        } else {
            builder = builder.add_source(config::File::with_name("wizardry").required(false));
        }

        // Environment variable overrides with WIZARDRY__ prefix
        builder = builder.add_source(
            config::Environment::with_prefix("WIZARDRY")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("agent.implementer_tools")
                .with_list_parse_key("agent.reviewer_tools")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AppError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AppError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_iterations == 0 {
            return Err(AppError::Config(
                "workflow.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.agent.timeout_secs == 0 {
            return Err(AppError::Config(
                "agent.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command is empty".to_string()));
        }
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workspace.root.join("registry.json")
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.workspace.root.join(session_id)
    }
}
