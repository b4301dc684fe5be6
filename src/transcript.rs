//! Append-only per-role transcript files under `{session_dir}/transcripts/`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::agent::{AgentRole, AgentTranscript};
use crate::error::Result;

const ENTRY_SEPARATOR: &str = "\n\n---\n\n";
const RESPONSE_MARKER: &str = "\n\n**Response**:\n";
const TASK_MARKER: &str = "**Task**: ";

/// One prompt/response exchange, as shown in the conversation view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationEntry {
    pub timestamp: DateTime<Utc>,
    pub role: AgentRole,
    pub task: String,
    pub response: String,
}

/// Raw transcript text for both roles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Transcripts {
    pub implementer: String,
    pub reviewer: String,
}

pub struct TranscriptLog {
    dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(session_dir: &Path) -> Self {
        Self {
            dir: session_dir.join("transcripts"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, role: AgentRole) -> PathBuf {
        self.dir.join(format!("{}.md", role.as_str()))
    }

    pub async fn record(&self, transcript: &AgentTranscript) -> Result<()> {
        self.append(
            transcript.role,
            transcript.timestamp,
            &transcript.prompt,
            &transcript.text,
        )
        .await
    }

    pub async fn append(
        &self,
        role: AgentRole,
        timestamp: DateTime<Utc>,
        prompt: &str,
        response: &str,
    ) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let entry = format!(
            "## [{}] {}\n\n{TASK_MARKER}{}{RESPONSE_MARKER}{}{ENTRY_SEPARATOR}",
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            role.title(),
            prompt.trim(),
            response.trim_end(),
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(role))
            .await?;
        file.write_all(entry.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Full transcript for `role`; empty if the role never ran.
    pub async fn read(&self, role: AgentRole) -> Result<String> {
        match tokio::fs::read_to_string(self.path(role)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_all(&self) -> Result<Transcripts> {
        Ok(Transcripts {
            implementer: self.read(AgentRole::Implementer).await?,
            reviewer: self.read(AgentRole::Reviewer).await?,
        })
    }

    /// Entries from both roles in timestamp order.
    pub async fn conversation(&self) -> Result<Vec<ConversationEntry>> {
        let mut entries = Vec::new();
        for role in AgentRole::ALL {
            entries.extend(parse_entries(&self.read(role).await?));
        }
        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }
}

/// Parse transcript markdown back into entries.
///
/// Entries are found by their `## [timestamp] Role` header at the start of
/// the file or right after an entry separator, so horizontal rules inside a
/// task or response stay part of that entry.
pub fn parse_entries(text: &str) -> Vec<ConversationEntry> {
    let starts = entry_starts(text);
    starts
        .iter()
        .enumerate()
        .filter_map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(text.len());
            parse_entry(&text[start..end])
        })
        .collect()
}

fn entry_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let at_boundary = offset == 0 || text[..offset].ends_with(ENTRY_SEPARATOR);
        if at_boundary && parse_header(line.trim_end()).is_some() {
            starts.push(offset);
        }
        offset += line.len();
    }
    starts
}

fn parse_header(line: &str) -> Option<(DateTime<Utc>, AgentRole)> {
    let header = line.strip_prefix("## [")?;
    let (timestamp, role) = header.split_once("] ")?;
    let timestamp = DateTime::parse_from_rfc3339(timestamp).ok()?.with_timezone(&Utc);
    Some((timestamp, AgentRole::from_title(role)?))
}

fn parse_entry(chunk: &str) -> Option<ConversationEntry> {
    let (header, body) = chunk.split_once('\n')?;
    let (timestamp, role) = parse_header(header.trim_end())?;

    let body = body.trim_start_matches('\n');
    let body = body.strip_prefix(TASK_MARKER)?;
    let (task, response) = body.split_once(RESPONSE_MARKER)?;
    let response = response.trim_end();
    let response = response.strip_suffix(ENTRY_SEPARATOR.trim_end()).unwrap_or(response);

    Some(ConversationEntry {
        timestamp,
        role,
        task: task.to_string(),
        response: response.trim_end().to_string(),
    })
}

/// The last `lines` lines of `text`.
pub fn tail_lines(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_append_uses_entry_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());

        log.append(AgentRole::Implementer, at(0), "Add hello", "Done.\n")
            .await
            .unwrap();

        let text = log.read(AgentRole::Implementer).await.unwrap();
        assert_eq!(
            text,
            "## [2023-11-14T22:13:20.000Z] Implementer\n\n**Task**: Add hello\n\n**Response**:\nDone.\n\n---\n\n"
        );
        assert!(dir.path().join("transcripts/implementer.md").exists());
    }

    #[tokio::test]
    async fn test_missing_role_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());
        assert_eq!(log.read_all().await.unwrap(), Transcripts::default());
        assert!(log.conversation().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_conversation_interleaves_roles_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());

        log.append(AgentRole::Implementer, at(0), "implement", "v1")
            .await
            .unwrap();
        log.append(AgentRole::Reviewer, at(10), "review", "rejected")
            .await
            .unwrap();
        log.append(AgentRole::Implementer, at(20), "fix it", "v2")
            .await
            .unwrap();
        log.append(AgentRole::Reviewer, at(30), "review again", "approved")
            .await
            .unwrap();

        let entries = log.conversation().await.unwrap();
        let summary: Vec<_> = entries
            .iter()
            .map(|e| (e.role, e.task.as_str(), e.response.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (AgentRole::Implementer, "implement", "v1"),
                (AgentRole::Reviewer, "review", "rejected"),
                (AgentRole::Implementer, "fix it", "v2"),
                (AgentRole::Reviewer, "review again", "approved"),
            ]
        );
    }

    #[test]
    fn test_horizontal_rule_in_response_stays_in_entry() {
        let text = "## [2023-11-14T22:13:20.000Z] Reviewer\n\n**Task**: t\n\n**Response**:\nabove\n\n---\n\nbelow\n\n---\n\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response, "above\n\n---\n\nbelow");
    }

    #[tokio::test]
    async fn test_horizontal_rule_in_task_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let log = TranscriptLog::new(dir.path());

        log.append(AgentRole::Implementer, at(0), "Part A\n\n---\n\nPart B", "done")
            .await
            .unwrap();
        log.append(AgentRole::Implementer, at(20), "fix it", "v2")
            .await
            .unwrap();

        let entries = log.conversation().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].task, "Part A\n\n---\n\nPart B");
        assert_eq!(entries[0].response, "done");
        assert_eq!(entries[1].task, "fix it");
    }

    #[test]
    fn test_header_lookalike_inside_response_is_not_an_entry() {
        let text = "## [2023-11-14T22:13:20.000Z] Reviewer\n\n**Task**: t\n\n**Response**:\nquoted:\n## [2023-11-14T22:13:21.000Z] Implementer\nend\n\n---\n\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].response.ends_with("Implementer\nend"));
    }

    #[test]
    fn test_multiline_task_is_preserved() {
        let text = "## [2023-11-14T22:13:20.000Z] Implementer\n\n**Task**: line one\nline two\n\n**Response**:\nok\n\n---\n\n";
        let entries = parse_entries(text);
        assert_eq!(entries[0].task, "line one\nline two");
    }

    #[test]
    fn test_tail_lines() {
        assert_eq!(tail_lines("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("a", 10), "a");
    }
}
