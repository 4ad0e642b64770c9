//! Request pipelines: chat, autonomous task, repository listing.

use std::sync::Arc;

use tracing::{info, warn};

use claude_mobile_forge::{Forge, NewPullRequest, PullRequest};
use claude_mobile_protocol::Frame;
use claude_mobile_workspace::{Workspaces, git};

use crate::branch::{branch_name, commit_message, pr_body, pr_title};
use crate::tool::CodeTool;
use crate::{FrameSink, TaskError};

/// Executes inbound requests against the working copies, the code tool,
/// and the forge.
///
/// Each `handle_*` entry point is one request: it emits its reply frames
/// through the sink and reports any failure as exactly one `error` frame.
pub struct TaskPipeline {
    workspaces: Arc<Workspaces>,
    forge: Arc<dyn Forge>,
    tool: CodeTool,
}

impl TaskPipeline {
    pub fn new(workspaces: Arc<Workspaces>, forge: Arc<dyn Forge>, tool: CodeTool) -> Self {
        Self {
            workspaces,
            forge,
            tool,
        }
    }

    /// Chat: stream the tool's output back, no version-control effects.
    pub async fn handle_chat(
        &self,
        sink: &dyn FrameSink,
        session_id: &str,
        text: &str,
        repo: Option<&str>,
        branch: Option<&str>,
    ) {
        if let Err(e) = self.chat(sink, session_id, text, repo, branch).await {
            warn!(session = %session_id, "chat failed: {e}");
            sink.send(Frame::error(Some(session_id.to_string()), e.to_string()));
        }
    }

    async fn chat(
        &self,
        sink: &dyn FrameSink,
        session_id: &str,
        text: &str,
        repo: Option<&str>,
        branch: Option<&str>,
    ) -> Result<(), TaskError> {
        let dir = match repo {
            Some(repo) => {
                let _guard = self.workspaces.lock(repo).await;
                let dir = self.workspaces.ensure(repo).await?;
                if let Some(branch) = branch {
                    git::checkout(&dir, branch).await?;
                }
                dir
            }
            None => std::env::current_dir()?,
        };

        self.tool
            .run(&dir, text, |chunk| {
                sink.send(Frame::StreamChunk {
                    session_id: session_id.to_string(),
                    text: chunk,
                });
            })
            .await?;
        // Exit code is ignored for chat; the transcript already told the
        // user everything the tool had to say.
        sink.send(Frame::StreamEnd {
            session_id: session_id.to_string(),
        });
        Ok(())
    }

    /// Autonomous task: branch, stream the tool, commit, push, open a PR.
    pub async fn handle_task(
        &self,
        sink: &dyn FrameSink,
        session_id: &str,
        context: &str,
        repo: &str,
        base_branch: &str,
    ) {
        match self.task(sink, session_id, context, repo, base_branch).await {
            Ok(pr) => {
                sink.send(Frame::TaskDone {
                    session_id: session_id.to_string(),
                    pr_url: pr.html_url,
                    pr_title: pr.title,
                });
            }
            Err(e) => {
                warn!(session = %session_id, repo, "task failed: {e}");
                sink.send(Frame::error(Some(session_id.to_string()), e.to_string()));
            }
        }
    }

    async fn task(
        &self,
        sink: &dyn FrameSink,
        session_id: &str,
        context: &str,
        repo: &str,
        base_branch: &str,
    ) -> Result<PullRequest, TaskError> {
        // Exclusive for the whole clone/pull/branch/commit/push span.
        let guard = self.workspaces.lock(repo).await;
        let dir = self.workspaces.ensure(repo).await?;

        let branch = branch_name(context, now_millis());
        git::checkout(&dir, base_branch).await?;
        git::create_branch(&dir, &branch).await?;
        info!(repo, branch = %branch, "task branch created");

        sink.send(Frame::StreamChunk {
            session_id: session_id.to_string(),
            text: format!("Working on branch {branch}\n"),
        });

        let status = self
            .tool
            .run(&dir, context, |chunk| {
                sink.send(Frame::StreamChunk {
                    session_id: session_id.to_string(),
                    text: chunk,
                });
            })
            .await?;

        // Unlike chat, a task only commits what a clean tool run produced.
        if !status.success() {
            if let Err(e) = git::checkout_discard(&dir, base_branch).await {
                warn!(repo, "could not return to {base_branch}: {e}");
            }
            return Err(TaskError::ToolFailed { status });
        }

        if !git::has_changes(&dir).await? {
            // Leave the working copy where the next refresh expects it.
            git::checkout(&dir, base_branch).await?;
            return Err(TaskError::NoChanges);
        }

        git::stage_all(&dir).await?;
        git::commit(&dir, &commit_message(context)).await?;

        if let Err(first) = git::push_upstream(&dir, &branch).await {
            warn!(repo, branch = %branch, "push failed, retrying after fetch: {first}");
            git::fetch(&dir).await?;
            git::push_upstream(&dir, &branch).await?;
        }

        // Idempotence for the next refresh: base branch checked out, task
        // branch left in place.
        git::checkout(&dir, base_branch).await?;
        drop(guard);

        let pr = self
            .forge
            .create_pull_request(
                repo,
                NewPullRequest {
                    title: pr_title(context),
                    head: branch.clone(),
                    base: base_branch.to_string(),
                    body: pr_body(context, &branch),
                },
            )
            .await?;
        info!(repo, url = %pr.html_url, "task complete");
        Ok(pr)
    }

    /// Repository listing for the paired credential.
    pub async fn handle_repo_list(&self, sink: &dyn FrameSink, session_id: &str) {
        match self.forge.list_repositories().await {
            Ok(repos) => {
                sink.send(Frame::RepoListResult {
                    session_id: session_id.to_string(),
                    repos,
                });
            }
            Err(e) => {
                warn!(session = %session_id, "repo listing failed: {e}");
                sink.send(Frame::error(Some(session_id.to_string()), e.to_string()));
            }
        }
    }
}

fn now_millis() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
