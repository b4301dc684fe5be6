//! Per-repository role prompt overrides under `.wizardry/prompts/`.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::agent::prompt::{default_system_prompt, override_path};
use crate::agent::AgentRole;
use crate::error::{AppError, Result};
use crate::workspace::git;

#[derive(Debug, Clone, Serialize)]
pub struct PromptFile {
    pub role: AgentRole,
    pub path: PathBuf,
    pub installed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupStatus {
    pub repo_path: PathBuf,
    pub prompts: Vec<PromptFile>,
}

impl SetupStatus {
    pub fn is_complete(&self) -> bool {
        self.prompts.iter().all(|p| p.installed)
    }
}

/// Write the built-in role prompts into the repository so they can be edited.
///
/// Existing files are left alone unless `force` is set. Returns the files
/// that were written.
pub async fn install_prompts(repo_path: &Path, force: bool) -> Result<Vec<PathBuf>> {
    let info = git::repo_info(repo_path)
        .await
        .map_err(|e| AppError::Config(format!("not a git repository: {e}")))?;

    let mut written = Vec::new();
    for role in AgentRole::ALL {
        let path = override_path(&info.path, role);
        if !force && tokio::fs::try_exists(&path).await? {
            tracing::info!(role = %role, path = %path.display(), "Prompt already installed");
            continue;
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, default_system_prompt(role)).await?;
        tracing::info!(role = %role, path = %path.display(), "Installed prompt");
        written.push(path);
    }
    Ok(written)
}

pub async fn check(repo_path: &Path) -> Result<SetupStatus> {
    let info = git::repo_info(repo_path)
        .await
        .map_err(|e| AppError::Config(format!("not a git repository: {e}")))?;

    let mut prompts = Vec::with_capacity(AgentRole::ALL.len());
    for role in AgentRole::ALL {
        let path = override_path(&info.path, role);
        let installed = tokio::fs::try_exists(&path).await?;
        prompts.push(PromptFile {
            role,
            path,
            installed,
        });
    }

    Ok(SetupStatus {
        repo_path: info.path,
        prompts,
    })
}
