//! Extraction of the structured handoff object from an agent transcript.
//!
//! The contract: the last top-level JSON object in the transcript is the
//! handoff. Anything else (no object, broken JSON, missing or mistyped
//! fields) is a parse error. A parse error never counts as approval or as
//! "ready for review".

use serde_json::{Map, Value};

use super::types::{required_fields, ImplementerOutcome, Outcome, ReviewerOutcome};
use crate::agent::AgentRole;
use crate::error::{AppError, Result};

/// Longest fragment of agent text carried inside a parse error.
const MAX_FRAGMENT_CHARS: usize = 800;

/// A JSON object found in the transcript, with the text it was parsed from.
#[derive(Debug, Clone, PartialEq)]
struct Candidate<'a> {
    text: &'a str,
    value: Map<String, Value>,
}

/// Parse the handoff for `role` out of `transcript`.
pub fn parse(role: AgentRole, transcript: &str) -> Result<Outcome> {
    let candidate = match last_object(transcript) {
        Some(c) => c,
        None => {
            return Err(parse_error(
                role,
                if transcript.contains('{') {
                    "no well-formed JSON object found"
                } else {
                    "no structured handoff object found"
                },
                tail(transcript),
            ))
        }
    };

    let missing: Vec<&str> = required_fields(role)
        .iter()
        .copied()
        .filter(|field| !candidate.value.contains_key(*field))
        .collect();
    if !missing.is_empty() {
        return Err(parse_error(
            role,
            &format!("missing required field(s): {}", missing.join(", ")),
            candidate.text,
        ));
    }

    let value = Value::Object(candidate.value);
    let outcome = match role {
        AgentRole::Implementer => serde_json::from_value::<ImplementerOutcome>(value)
            .map(Outcome::Implementer),
        AgentRole::Reviewer => {
            serde_json::from_value::<ReviewerOutcome>(value).map(Outcome::Reviewer)
        }
    };

    outcome.map_err(|e| parse_error(role, &format!("invalid field: {e}"), candidate.text))
}

/// Parse an implementer handoff.
pub fn parse_implementer(transcript: &str) -> Result<ImplementerOutcome> {
    match parse(AgentRole::Implementer, transcript)? {
        Outcome::Implementer(outcome) => Ok(outcome),
        Outcome::Reviewer(_) => Err(AppError::Internal(
            "implementer parse produced a reviewer outcome".to_string(),
        )),
    }
}

/// Parse a reviewer handoff.
pub fn parse_reviewer(transcript: &str) -> Result<ReviewerOutcome> {
    match parse(AgentRole::Reviewer, transcript)? {
        Outcome::Reviewer(outcome) => Ok(outcome),
        Outcome::Implementer(_) => Err(AppError::Internal(
            "reviewer parse produced an implementer outcome".to_string(),
        )),
    }
}

/// Find the last top-level JSON object embedded in `text`.
///
/// Objects nested inside an earlier match are skipped, so `{"a": {"b": 1}}`
/// yields the outer object only.
fn last_object(text: &str) -> Option<Candidate<'_>> {
    let mut last = None;
    let mut pos = 0;

    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();

        match stream.next() {
            Some(Ok(Value::Object(map))) => {
                let end = start + stream.byte_offset();
                last = Some(Candidate {
                    text: &text[start..end],
                    value: map,
                });
                pos = end;
            }
            _ => pos = start + 1,
        }
    }

    last
}

fn parse_error(role: AgentRole, reason: &str, fragment: &str) -> AppError {
    AppError::Parse {
        role,
        reason: reason.to_string(),
        fragment: truncate(fragment),
    }
}

fn tail(text: &str) -> &str {
    let count = text.chars().count();
    if count <= MAX_FRAGMENT_CHARS {
        return text;
    }
    let skip = count - MAX_FRAGMENT_CHARS;
    let idx = text
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[idx..]
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_FRAGMENT_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_FRAGMENT_CHARS).collect();
    out.push_str("...");
    out
}
