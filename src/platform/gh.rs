use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::types::{CreatePullRequest, PullRequest};
use super::PullRequestPlatform;
use crate::config::PrConfig;
use crate::error::{AppError, Result};

/// Opens pull requests with the GitHub CLI after pushing with git.
pub struct GhCliPlatform {
    gh: String,
    git: String,
    remote: String,
    push_branch: bool,
}

impl GhCliPlatform {
    pub fn new(config: &PrConfig) -> Self {
        Self {
            gh: config.command.clone(),
            git: config.git_command.clone(),
            remote: config.remote.clone(),
            push_branch: config.push_branch,
        }
    }

    async fn push(&self, pr: &CreatePullRequest) -> Result<()> {
        run(
            &self.git,
            &["push", "--set-upstream", &self.remote, &pr.head_branch],
            &pr.repo_dir,
        )
        .await?;
        tracing::info!(branch = %pr.head_branch, remote = %self.remote, "Branch pushed");
        Ok(())
    }
}

#[async_trait]
impl PullRequestPlatform for GhCliPlatform {
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest> {
        if self.push_branch {
            self.push(pr).await?;
        }

        let stdout = run(
            &self.gh,
            &[
                "pr",
                "create",
                "--base",
                &pr.base_branch,
                "--head",
                &pr.head_branch,
                "--title",
                &pr.title,
                "--body",
                &pr.body,
            ],
            &pr.repo_dir,
        )
        .await?;

        // gh prints the new PR's URL as the last line.
        let url = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        if url.is_empty() {
            return Err(AppError::ExternalTool(format!(
                "`{} pr create` printed no PR URL",
                self.gh
            )));
        }

        tracing::info!(url = %url, head = %pr.head_branch, base = %pr.base_branch, "Pull request created");
        Ok(PullRequest {
            url,
            head_branch: pr.head_branch.clone(),
            base_branch: pr.base_branch.clone(),
        })
    }
}

/// Run an external tool, returning its stdout. Spawn failures and non-zero
/// exits are both `ExternalTool` errors.
async fn run(program: &str, args: &[&str], dir: &Path) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::ExternalTool(format!("failed to run `{program}`: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::ExternalTool(format!(
            "`{program} {}` exited with status {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(dir: &Path) -> CreatePullRequest {
        CreatePullRequest {
            repo_dir: dir.to_path_buf(),
            title: "Add README".to_string(),
            body: "body".to_string(),
            head_branch: "wizardry-wf".to_string(),
            base_branch: "main".to_string(),
        }
    }

    fn config(gh: &str, git: &str, push: bool) -> PrConfig {
        PrConfig {
            command: gh.to_string(),
            git_command: git.to_string(),
            push_branch: push,
            ..PrConfig::default()
        }
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pushes_then_creates_pr() {
        let dir = tempfile::tempdir().unwrap();
        let git = script(dir.path(), "git", r#"echo "$@" >> calls.log"#);
        let gh = script(
            dir.path(),
            "gh",
            r#"echo "gh $1 $2" >> calls.log
echo "Creating pull request"
echo "https://github.com/acme/app/pull/7""#,
        );

        let platform = GhCliPlatform::new(&config(&gh, &git, true));
        let pr = platform.create_pull_request(&request(dir.path())).await.unwrap();

        assert_eq!(pr.url, "https://github.com/acme/app/pull/7");
        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert_eq!(calls, "push --set-upstream origin wizardry-wf\ngh pr create\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gh_failure_is_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let gh = script(dir.path(), "gh", "echo 'not authenticated' >&2\nexit 4");

        let platform = GhCliPlatform::new(&config(&gh, "git", false));
        let err = platform
            .create_pull_request(&request(dir.path()))
            .await
            .unwrap_err();
        match err {
            AppError::ExternalTool(msg) => assert!(msg.contains("not authenticated")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_tool_is_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let platform = GhCliPlatform::new(&config("wizardry-no-such-gh", "git", false));
        let err = platform
            .create_pull_request(&request(dir.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalTool(_)));
    }
}
