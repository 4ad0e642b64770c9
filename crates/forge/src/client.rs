//! GitHub REST API client.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};

use claude_mobile_protocol::Repository;

use crate::types::{NewPullRequest, PullRequest, RepoJson};
use crate::{Forge, ForgeError};

const DEFAULT_BASE_URL: &str = "https://api.github.com";

/// How many repositories a listing returns at most.
const REPO_LIST_LIMIT: u32 = 100;

/// GitHub client authenticated with a personal access token.
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

impl GithubClient {
    /// Creates a new client with the given access token.
    pub fn new(token: &str) -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ForgeError::InvalidToken)?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("claude-mobile-agent"));

        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Sets a custom base URL (for testing).
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ForgeError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ForgeError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Forge for GithubClient {
    async fn list_repositories(&self) -> Result<Vec<Repository>, ForgeError> {
        let url = format!("{}/user/repos", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("sort", "updated".to_string()),
                ("per_page", REPO_LIST_LIMIT.to_string()),
            ])
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let raw: Vec<RepoJson> = resp.json().await?;
        tracing::debug!(count = raw.len(), "listed repositories");
        Ok(raw.into_iter().map(Repository::from).collect())
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        pr: NewPullRequest,
    ) -> Result<PullRequest, ForgeError> {
        let url = format!("{}/repos/{repo}/pulls", self.base_url);
        let resp = self.http.post(&url).json(&pr).send().await?;
        let resp = Self::check(resp).await?;
        let created: PullRequest = resp.json().await?;
        tracing::info!(repo, number = created.number, "pull request opened");
        Ok(created)
    }
}
