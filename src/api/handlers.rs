use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::response::DiffResponse;
use crate::error::{AppError, Result};
use crate::orchestrator::StartRequest;
use crate::registry::WorkflowSession;
use crate::server::AppState;
use crate::transcript::{ConversationEntry, Transcripts};
use crate::workspace::RepoInfo;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Include finished sessions. Defaults to true for the dashboard.
    pub all: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    #[serde(default)]
    pub archive: bool,
    #[serde(default)]
    pub cleanup_branch: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TerminateParams {
    #[serde(default)]
    pub cleanup: bool,
}

#[derive(Debug, Deserialize)]
pub struct RepoParams {
    pub repo_path: PathBuf,
}

pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<WorkflowSession>>> {
    let sessions = state
        .orchestrator
        .list(params.all.unwrap_or(true))
        .await?;
    Ok(Json(sessions))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartRequest>,
) -> Result<(StatusCode, Json<WorkflowSession>)> {
    let session = state.orchestrator.start(request).await?;
    tracing::info!(
        session_id = %session.session_id,
        repo = %session.repo_path.display(),
        base_branch = %session.base_branch,
        "Session created"
    );
    Ok((StatusCode::ACCEPTED, Json(session)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowSession>> {
    Ok(Json(state.orchestrator.get(&id).await?))
}

/// Deletes the session, or archives it when `archive=true`.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<WorkflowSession>> {
    let session = if params.archive {
        state
            .orchestrator
            .archive(&id, params.cleanup_branch)
            .await?
    } else {
        state.orchestrator.delete(&id).await?
    };
    Ok(Json(session))
}

pub async fn terminate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<TerminateParams>,
) -> Result<Json<WorkflowSession>> {
    Ok(Json(state.orchestrator.terminate(&id, params.cleanup).await?))
}

pub async fn get_transcripts(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Transcripts>> {
    Ok(Json(state.orchestrator.transcripts(&id).await?))
}

pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationEntry>>> {
    Ok(Json(state.orchestrator.conversation(&id).await?))
}

pub async fn get_diff(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DiffResponse>> {
    let diff = state.orchestrator.diff(&id).await?;
    Ok(Json(DiffResponse { diff }))
}

pub async fn get_repo_info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RepoParams>,
) -> Result<Json<RepoInfo>> {
    let info = state
        .orchestrator
        .repo_info(&params.repo_path)
        .await
        .map_err(|e| AppError::Config(format!("invalid repo_path: {e}")))?;
    Ok(Json(info))
}
