use std::path::{Path, PathBuf};

use super::AgentRole;
use crate::error::Result;
use crate::handoff::ImplementerOutcome;
use crate::workflow::ReviewFeedback;

/// Directory, relative to a repository root, holding per-role prompt overrides.
pub const PROMPT_OVERRIDE_DIR: &str = ".wizardry/prompts";

/// File the reviewer is pointed at when the diff is too large to inline.
pub const OFFLOADED_DIFF_FILE: &str = "current_diff.txt";

pub const IMPLEMENTER_SYSTEM_PROMPT: &str = r#"You are the Implementer in a two-agent workflow. A Reviewer will inspect your committed changes after you finish.

## Rules
- Read the surrounding code before changing anything and follow its conventions.
- Make the smallest change that fully solves the task. Only use libraries the project already depends on.
- You must create or modify at least one file. Claiming the work "already exists" is not an acceptable outcome.
- Run the project's tests when it has them.
- Commit your work before finishing: `git add -A && git commit -m "<summary>"`. Uncommitted changes are invisible to the Reviewer.

## Handoff
End your turn with exactly one JSON object, and nothing after it:

```json
{
  "rationale": "What you changed and why",
  "files_modified": ["path/one", "path/two"],
  "confidence": 8,
  "testing_notes": "How you verified the change",
  "commit_hash": "first 8 characters of the commit",
  "committed": true,
  "ready_for_review": true
}
```

Set `ready_for_review` to false only if you could not complete the task, and say why in `rationale`."#;

pub const REVIEWER_SYSTEM_PROMPT: &str = r#"You are the Reviewer in a two-agent workflow. The Implementer has committed changes on an isolated branch; you decide whether they ship.

## What to check
- Does the change solve the stated task?
- Correctness and security problems come first, then consistency with the codebase, then simplicity.
- Error handling where it matters.

Do not modify files. Use the tools only to inspect the repository.

Approve when the change is good enough to ship, not when it is perfect.

## Handoff
End your turn with exactly one JSON object, and nothing after it:

```json
{
  "approval": false,
  "overall_assessment": "One or two sentences",
  "strengths": ["..."],
  "concerns": ["..."],
  "suggested_fixes": ["Concrete, actionable fixes"],
  "confidence": 8
}
```"#;

pub fn default_system_prompt(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Implementer => IMPLEMENTER_SYSTEM_PROMPT,
        AgentRole::Reviewer => REVIEWER_SYSTEM_PROMPT,
    }
}

pub fn override_path(repo_path: &Path, role: AgentRole) -> PathBuf {
    repo_path
        .join(PROMPT_OVERRIDE_DIR)
        .join(format!("{}.md", role.as_str()))
}

/// The system prompt for `role`, preferring the repository's override file.
pub async fn system_prompt(repo_path: &Path, role: AgentRole) -> Result<String> {
    let path = override_path(repo_path, role);
    match tokio::fs::read_to_string(&path).await {
        Ok(text) if !text.trim().is_empty() => {
            tracing::debug!(role = %role, path = %path.display(), "Using prompt override");
            Ok(text)
        }
        Ok(_) => Ok(default_system_prompt(role).to_string()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(default_system_prompt(role).to_string())
        }
        Err(e) => Err(e.into()),
    }
}

/// Prompt for one implementer turn. Every earlier round of review feedback
/// is carried along so fixes are not lost between iterations.
pub fn implementer_prompt(
    task: &str,
    feedback: &[ReviewFeedback],
    previous: Option<&ImplementerOutcome>,
) -> Result<String> {
    if feedback.is_empty() {
        return Ok(format!(
            r#"## Task
{task}

Study the existing code, implement the task, verify it, commit, and finish with the JSON handoff."#
        ));
    }

    let mut prompt = format!("## Task\n{task}\n\n");

    if let Some(previous) = previous {
        prompt.push_str(&format!(
            "## Your previous handoff\n```json\n{}\n```\n\n",
            serde_json::to_string_pretty(previous)?
        ));
    }

    prompt.push_str("## Reviewer feedback\n");
    for round in feedback {
        prompt.push_str(&format!(
            "\n### Review of iteration {}\n**Assessment**: {}\n",
            round.iteration, round.overall_assessment
        ));
        push_list(&mut prompt, "Concerns", &round.concerns);
        push_list(&mut prompt, "Suggested fixes", &round.suggested_fixes);
    }

    prompt.push_str(
        "\nAddress every concern above, re-run the tests, commit the fixes, and finish with the JSON handoff.",
    );
    Ok(prompt)
}

/// How the diff reaches the reviewer.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffPayload {
    Inline(String),
    Offloaded { path: PathBuf, bytes: usize },
}

/// Inline the diff, or write it to the session directory when it is larger
/// than `max_inline_bytes`.
pub async fn prepare_diff(
    diff: String,
    session_dir: &Path,
    max_inline_bytes: usize,
) -> Result<DiffPayload> {
    if diff.len() <= max_inline_bytes {
        return Ok(DiffPayload::Inline(diff));
    }

    tokio::fs::create_dir_all(session_dir).await?;
    let path = session_dir.join(OFFLOADED_DIFF_FILE);
    let bytes = diff.len();
    tokio::fs::write(&path, diff).await?;
    tracing::info!(path = %path.display(), bytes, "Diff offloaded to file");

    Ok(DiffPayload::Offloaded { path, bytes })
}

pub fn reviewer_prompt(
    task: &str,
    implementation: &ImplementerOutcome,
    diff: &DiffPayload,
) -> Result<String> {
    let diff_section = match diff {
        DiffPayload::Inline(text) => format!("```diff\n{text}\n```"),
        DiffPayload::Offloaded { path, bytes } => format!(
            "The diff is {bytes} bytes, too large to include here. Read it from `{}`.",
            path.display()
        ),
    };

    Ok(format!(
        r#"Review this implementation.

## Task
{task}

## Implementer handoff
```json
{handoff}
```

## Changes (base...branch)
{diff_section}

Use `git log` and the Read tool if you need more context. Finish with the JSON handoff."#,
        handoff = serde_json::to_string_pretty(implementation)?,
    ))
}

fn push_list(prompt: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    prompt.push_str(&format!("**{heading}**:\n"));
    for item in items {
        prompt.push_str(&format!("- {item}\n"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> ImplementerOutcome {
        ImplementerOutcome {
            rationale: "Added a greeting".to_string(),
            files_modified: vec!["hello.txt".to_string()],
            confidence: 7.0,
            testing_notes: "cat hello.txt".to_string(),
            ready_for_review: true,
            commit_hash: None,
            committed: None,
        }
    }

    fn feedback(iteration: u32, concern: &str) -> ReviewFeedback {
        ReviewFeedback {
            iteration,
            overall_assessment: format!("round {iteration}"),
            concerns: vec![concern.to_string()],
            suggested_fixes: vec![format!("fix {concern}")],
        }
    }

    #[test]
    fn test_first_prompt_has_only_the_task() {
        let prompt = implementer_prompt("Add hello.txt", &[], None).unwrap();
        assert!(prompt.contains("Add hello.txt"));
        assert!(!prompt.contains("Reviewer feedback"));
    }

    #[test]
    fn test_retry_prompt_carries_all_feedback_rounds() {
        let rounds = vec![feedback(1, "typo"), feedback(2, "missing newline")];
        let prompt = implementer_prompt("Add hello.txt", &rounds, Some(&outcome())).unwrap();

        assert!(prompt.contains("Review of iteration 1"));
        assert!(prompt.contains("- typo"));
        assert!(prompt.contains("Review of iteration 2"));
        assert!(prompt.contains("- fix missing newline"));
        assert!(prompt.contains("\"rationale\": \"Added a greeting\""));
    }

    #[tokio::test]
    async fn test_small_diff_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let payload = prepare_diff("+hi".to_string(), dir.path(), 100).await.unwrap();
        assert_eq!(payload, DiffPayload::Inline("+hi".to_string()));
        assert!(!dir.path().join(OFFLOADED_DIFF_FILE).exists());
    }

    #[tokio::test]
    async fn test_large_diff_is_offloaded() {
        let dir = tempfile::tempdir().unwrap();
        let session_dir = dir.path().join("workflow-1");
        let diff = "+x\n".repeat(50);

        let payload = prepare_diff(diff.clone(), &session_dir, 10).await.unwrap();
        let path = session_dir.join(OFFLOADED_DIFF_FILE);
        assert_eq!(
            payload,
            DiffPayload::Offloaded {
                path: path.clone(),
                bytes: diff.len()
            }
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), diff);

        let prompt = reviewer_prompt("task", &outcome(), &payload).unwrap();
        assert!(prompt.contains(&path.display().to_string()));
        assert!(!prompt.contains("+x"));
    }

    #[tokio::test]
    async fn test_override_file_replaces_default_prompt() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            system_prompt(dir.path(), AgentRole::Reviewer).await.unwrap(),
            REVIEWER_SYSTEM_PROMPT
        );

        let path = override_path(dir.path(), AgentRole::Reviewer);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "Be strict.").unwrap();

        assert_eq!(
            system_prompt(dir.path(), AgentRole::Reviewer).await.unwrap(),
            "Be strict."
        );
        assert_eq!(
            system_prompt(dir.path(), AgentRole::Implementer).await.unwrap(),
            IMPLEMENTER_SYSTEM_PROMPT
        );
    }
}
