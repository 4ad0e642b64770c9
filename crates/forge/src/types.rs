use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use claude_mobile_protocol::Repository;

/// Payload for opening a pull request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
}

/// A pull request as returned by the forge.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
    pub title: String,
}

/// A repository as the forge's REST API shapes it (snake_case fields).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RepoJson {
    pub id: u64,
    pub full_name: String,
    pub description: Option<String>,
    pub default_branch: String,
    pub language: Option<String>,
    pub private: bool,
    pub updated_at: DateTime<Utc>,
}

impl From<RepoJson> for Repository {
    fn from(raw: RepoJson) -> Self {
        Repository {
            id: raw.id,
            full_name: raw.full_name,
            description: raw.description,
            default_branch: raw.default_branch,
            language: raw.language,
            is_private: raw.private,
            updated_at: raw.updated_at,
        }
    }
}
