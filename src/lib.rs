pub mod agent;
pub mod api;
pub mod config;
pub mod error;
pub mod handoff;
pub mod orchestrator;
pub mod platform;
pub mod registry;
pub mod server;
pub mod setup;
pub mod shutdown;
pub mod transcript;
pub mod workflow;
pub mod workspace;
