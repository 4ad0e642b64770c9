//! Local working copies of forge repositories.
//!
//! One flat directory per repository under a workspace root. Clones on
//! first use with a single-use authenticated URL, idempotently refreshes
//! after that, and serializes mutation per repository. All version control
//! goes through the `git` CLI; stderr that could embed credentials is
//! redacted before it reaches an error or a log line.

pub mod git;
mod manager;

pub use manager::{Workspaces, sanitize};

/// Errors from working-copy operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to run git: {0}")]
    GitUnavailable(std::io::Error),

    #[error("git {op} failed: {detail}")]
    Git { op: String, detail: String },
}
