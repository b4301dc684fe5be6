use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers;
use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self::with_orchestrator(Orchestrator::from_config(config))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn config(&self) -> &AppConfig {
        self.orchestrator.config()
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route(
            "/api/sessions/{id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/api/sessions/{id}/terminate",
            post(handlers::terminate_session),
        )
        .route(
            "/api/sessions/{id}/transcripts",
            get(handlers::get_transcripts),
        )
        .route(
            "/api/sessions/{id}/conversation",
            get(handlers::get_conversation),
        )
        .route("/api/sessions/{id}/diff", get(handlers::get_diff))
        .route("/api/repos/info", get(handlers::get_repo_info))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}
