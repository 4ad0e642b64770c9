//! Agent daemon wiring: relay client, pipelines, signal handling.

use std::path::PathBuf;
use std::sync::Arc;

use claude_mobile_forge::GithubClient;
use claude_mobile_protocol::Frame;
use claude_mobile_protocol::constants::HEARTBEAT_SESSION_ID;
use claude_mobile_relay_client::{ClientConfig, RelayClient};
use claude_mobile_tasks::{CodeTool, FrameSink, TaskPipeline};
use claude_mobile_workspace::Workspaces;

use crate::config::Config;

/// Frames flow out through the relay client; delivery is best-effort by
/// design (the relay drops frames for absent mobiles anyway).
struct ClientSink(Arc<RelayClient>);

impl FrameSink for ClientSink {
    fn send(&self, frame: Frame) -> bool {
        self.0.send(&frame)
    }
}

/// Runs the daemon until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let forge = Arc::new(GithubClient::new(&config.github_token)?);
    let workspaces = Arc::new(Workspaces::new(
        PathBuf::from(&config.workspace_root),
        config.github_token.clone(),
    ));
    let pipeline = Arc::new(TaskPipeline::new(
        workspaces,
        forge,
        CodeTool::new(config.tool_binary.clone()),
    ));

    let mut client_config = ClientConfig::new(&config.relay_url, &config.agent_id);
    client_config.version = env!("CARGO_PKG_VERSION").into();
    let client = Arc::new(RelayClient::new(client_config));
    let sink = Arc::new(ClientSink(Arc::clone(&client)));

    client.on_frame({
        let pipeline = Arc::clone(&pipeline);
        let sink = Arc::clone(&sink);
        move |frame| dispatch(frame, &pipeline, &sink)
    });

    client.start();
    tracing::info!(relay = %config.relay_url, "agent running");

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received");

    // In-flight tool children die with the process (kill-on-drop); no
    // commits are rolled back.
    client.shutdown().await;
    Ok(())
}

/// Routes one inbound frame. Long-running requests are spawned so
/// sessions proceed independently; per-repository serialization happens
/// inside the pipeline.
fn dispatch(frame: &Frame, pipeline: &Arc<TaskPipeline>, sink: &Arc<ClientSink>) {
    match frame {
        Frame::RegisterOk { pairing_code } => {
            // The operator reads this code off the terminal and types it
            // into the phone.
            tracing::info!(code = %pairing_code, "pairing code (enter on your phone)");
        }

        Frame::Ping { session_id } => {
            if session_id != HEARTBEAT_SESSION_ID {
                sink.send(Frame::Pong {
                    session_id: session_id.clone(),
                });
            }
        }

        Frame::RepoList { session_id } => {
            let pipeline = Arc::clone(pipeline);
            let sink = Arc::clone(sink);
            let session_id = session_id.clone();
            tokio::spawn(async move {
                pipeline.handle_repo_list(sink.as_ref(), &session_id).await;
            });
        }

        Frame::ChatMessage {
            session_id,
            text,
            repo_full_name,
            branch_name,
        } => {
            let pipeline = Arc::clone(pipeline);
            let sink = Arc::clone(sink);
            let session_id = session_id.clone();
            let text = text.clone();
            let repo = repo_full_name.clone();
            let branch = branch_name.clone();
            tokio::spawn(async move {
                pipeline
                    .handle_chat(
                        sink.as_ref(),
                        &session_id,
                        &text,
                        repo.as_deref(),
                        branch.as_deref(),
                    )
                    .await;
            });
        }

        Frame::TaskStart {
            session_id,
            context,
            repo_full_name,
            base_branch,
        } => {
            let pipeline = Arc::clone(pipeline);
            let sink = Arc::clone(sink);
            let session_id = session_id.clone();
            let context = context.clone();
            let repo = repo_full_name.clone();
            let base = base_branch.clone();
            tokio::spawn(async move {
                pipeline
                    .handle_task(sink.as_ref(), &session_id, &context, &repo, &base)
                    .await;
            });
        }

        Frame::Error { message, .. } => {
            tracing::warn!("relay reported: {message}");
        }

        _ => {}
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
