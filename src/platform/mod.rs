pub mod gh;
pub mod types;

use async_trait::async_trait;

use crate::error::Result;
pub use gh::GhCliPlatform;
pub use types::*;

/// The collaborator that publishes an approved branch for human review.
#[async_trait]
pub trait PullRequestPlatform: Send + Sync {
    /// Push the head branch (when configured) and open a pull request.
    async fn create_pull_request(&self, pr: &CreatePullRequest) -> Result<PullRequest>;
}
