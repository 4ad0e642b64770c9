//! Streaming invocation of the code-generation tool.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::TaskError;

/// Read size per chunk. Output is forwarded as it arrives; there is no
/// line buffering.
const READ_BUF_SIZE: usize = 8192;

/// The external code-generation CLI.
///
/// Always invoked with `--dangerously-skip-permissions`: the agent has no
/// TTY to answer interactive permission prompts with.
#[derive(Debug, Clone)]
pub struct CodeTool {
    binary: String,
}

impl CodeTool {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Runs the tool in `dir` with the given prompt, forwarding every
    /// stdout/stderr chunk to `on_chunk` as it is read. Returns the exit
    /// status once both streams are drained.
    ///
    /// Intra-stream order is preserved; the two streams interleave
    /// arbitrarily. The child is killed if the agent shuts down mid-run.
    pub async fn run(
        &self,
        dir: &Path,
        prompt: &str,
        mut on_chunk: impl FnMut(String),
    ) -> Result<ExitStatus, TaskError> {
        let mut child = Command::new(&self.binary)
            .arg("--dangerously-skip-permissions")
            .arg("-p")
            .arg(prompt)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TaskError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        tracing::debug!(binary = %self.binary, dir = %dir.display(), "tool spawned");

        let (tx, mut rx) = mpsc::channel::<String>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_stream(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stream(stderr, tx.clone()));
        }
        drop(tx);

        while let Some(chunk) = rx.recv().await {
            on_chunk(chunk);
        }

        let status = child.wait().await?;
        tracing::debug!(code = status.code(), "tool exited");
        Ok(status)
    }
}

/// Forwards byte chunks from one child stream into the merge channel.
async fn pump_stream<R>(mut stream: R, tx: mpsc::Sender<String>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(text).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn write_script(dir: &Path, body: &str) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-tool.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn streams_stdout_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "printf 'a\\n'; printf 'b\\n'; printf 'c\\n'");
        let tool = CodeTool::new(script.to_str().unwrap());

        let mut collected = String::new();
        let status = tool
            .run(tmp.path(), "ignored", |chunk| collected.push_str(&chunk))
            .await
            .unwrap();

        assert!(status.success());
        assert_eq!(collected, "a\nb\nc\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stderr_too() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "echo out; echo err >&2");
        let tool = CodeTool::new(script.to_str().unwrap());

        let mut collected = String::new();
        tool.run(tmp.path(), "ignored", |chunk| collected.push_str(&chunk))
            .await
            .unwrap();

        assert!(collected.contains("out\n"));
        assert!(collected.contains("err\n"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "exit 3");
        let tool = CodeTool::new(script.to_str().unwrap());

        let status = tool.run(tmp.path(), "ignored", |_| {}).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[tokio::test]
    async fn spawn_failure_names_the_binary() {
        let tmp = tempfile::tempdir().unwrap();
        let tool = CodeTool::new("/does/not/exist/code-tool");

        let err = tool.run(tmp.path(), "hi", |_| {}).await.unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.starts_with("Failed to spawn '/does/not/exist/code-tool': "),
            "unexpected message: {msg}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_reaches_the_tool() {
        let tmp = tempfile::tempdir().unwrap();
        // $1 = --dangerously-skip-permissions, $2 = -p, $3 = prompt
        let script = write_script(tmp.path(), "printf '%s|%s|%s' \"$1\" \"$2\" \"$3\"");
        let tool = CodeTool::new(script.to_str().unwrap());

        let mut collected = String::new();
        tool.run(tmp.path(), "list files", |chunk| collected.push_str(&chunk))
            .await
            .unwrap();

        assert_eq!(
            collected,
            "--dangerously-skip-permissions|-p|list files"
        );
    }
}
