//! Forge API access.
//!
//! The task pipeline talks to the forge through the [`Forge`] trait so
//! tests can substitute an in-memory fake; [`GithubClient`] is the real
//! implementation.

mod client;
mod types;

pub use client::GithubClient;
pub use types::{NewPullRequest, PullRequest};

use async_trait::async_trait;
use claude_mobile_protocol::Repository;

/// Errors from forge operations.
#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("forge API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid access token")]
    InvalidToken,
}

/// Operations the agent needs from the forge.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Repositories accessible to the configured credential, sorted by
    /// last update, capped at 100.
    async fn list_repositories(&self) -> Result<Vec<Repository>, ForgeError>;

    /// Opens a pull request and returns it.
    async fn create_pull_request(
        &self,
        repo: &str,
        pr: NewPullRequest,
    ) -> Result<PullRequest, ForgeError>;
}
