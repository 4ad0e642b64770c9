//! Agent-side request execution.
//!
//! Each inbound request runs the code tool as a streaming child process;
//! autonomous tasks additionally branch, commit, push, and open a pull
//! request. Replies flow through a [`FrameSink`] so the pipeline stays
//! independent of the relay link (and testable without one).

mod branch;
mod pipeline;
mod tool;

pub use branch::{branch_name, commit_message, pr_body, pr_title, slug};
pub use pipeline::TaskPipeline;
pub use tool::CodeTool;

use claude_mobile_forge::ForgeError;
use claude_mobile_protocol::Frame;
use claude_mobile_workspace::WorkspaceError;

/// Destination for frames produced by a pipeline.
///
/// `send` returns `false` when the relay link is down; pipelines keep
/// running regardless, since delivery is best-effort and never buffered.
pub trait FrameSink: Send + Sync {
    fn send(&self, frame: Frame) -> bool;
}

impl<F> FrameSink for F
where
    F: Fn(Frame) -> bool + Send + Sync,
{
    fn send(&self, frame: Frame) -> bool {
        self(frame)
    }
}

/// Errors from request execution.
///
/// The `Display` form of each variant is exactly what the mobile sees in
/// its `error` frame.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("Tool exited with {status}")]
    ToolFailed { status: std::process::ExitStatus },

    #[error("No changes to commit")]
    NoChanges,

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Forge(#[from] ForgeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
