//! Spawning and supervising git subcommands.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::GatewayError;

pub(crate) const STATELESS_RPC_FLAG: &str = "--stateless-rpc";
pub(crate) const ADVERTISE_REFS_FLAG: &str = "--advertise-refs";

/// Upper bound on stderr kept for logging; anything past it is discarded so
/// a chatty subprocess cannot block on a full pipe.
const STDERR_CAPTURE_LIMIT: u64 = 16 * 1024;

/// Spawns git subcommands with a fixed executable path.
#[derive(Debug, Clone)]
pub(crate) struct GitRunner {
    executable: PathBuf,
}

/// A running git subcommand with all three stdio pipes attached.
pub(crate) struct GitChild {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

impl GitRunner {
    pub fn new(executable: PathBuf) -> Self {
        Self { executable }
    }

    /// Spawns `<executable> <args>... .` with the repository directory as
    /// working directory. Arguments are passed as a vector, never through a
    /// shell, so slugs and ref names cannot inject commands. A missing
    /// repository directory fails the spawn.
    pub fn spawn(&self, args: &[&str], repo_dir: &Path) -> Result<GitChild, GatewayError> {
        let mut child = Command::new(&self.executable)
            .args(args)
            .arg(".")
            .current_dir(repo_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(GatewayError::Spawn)?;
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;
        Ok(GitChild {
            child,
            stdin,
            stdout,
            stderr,
        })
    }
}

// Pipes configured with Stdio::piped are always present after spawn.
fn missing_pipe(name: &str) -> GatewayError {
    GatewayError::Spawn(std::io::Error::other(format!("{name} pipe unavailable")))
}

/// Waits for the subprocess in the background and logs abnormal exits. The
/// response stream outlives the handler, so this cannot be awaited inline.
pub(crate) fn reap(mut child: Child, context: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        match child.wait().await {
            Ok(status) if !status.success() => {
                warn!(%context, %status, "git subprocess exited with failure");
            }
            Err(error) => warn!(%context, %error, "failed to reap git subprocess"),
            Ok(_) => {}
        }
    })
}

/// Drains subprocess stderr in the background and logs whatever it wrote.
pub(crate) fn drain_stderr(stderr: ChildStderr, context: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let mut limited = stderr.take(STDERR_CAPTURE_LIMIT);
        let _ = limited.read_to_end(&mut captured).await;
        let mut rest = limited.into_inner();
        let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
        let text = String::from_utf8_lossy(&captured);
        let text = text.trim();
        if !text.is_empty() {
            warn!(%context, stderr = %text, "git subprocess wrote to stderr");
        }
    })
}

/// Reads a bounded stderr excerpt, for error reporting once the subprocess
/// is known to have failed.
pub(crate) async fn stderr_excerpt(stderr: ChildStderr) -> String {
    let mut captured = Vec::new();
    let _ = stderr
        .take(STDERR_CAPTURE_LIMIT)
        .read_to_end(&mut captured)
        .await;
    String::from_utf8_lossy(&captured).trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[tokio::test]
    async fn test_spawn_appends_working_directory_operand() {
        let runner = GitRunner::new("echo".into());
        let mut git = runner.spawn(&["upload-pack"], Path::new("/tmp")).unwrap();
        let mut output = String::new();
        git.stdout.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "upload-pack .\n");
        assert!(git.child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn test_spawn_missing_executable() {
        let runner = GitRunner::new("/nonexistent/not-a-real-binary".into());
        let result = runner.spawn(&["upload-pack"], Path::new("/tmp"));
        assert!(matches!(result, Err(GatewayError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_spawn_missing_repository_directory() {
        let runner = GitRunner::new("echo".into());
        let result = runner.spawn(&["upload-pack"], Path::new("/nonexistent/repo.git"));
        assert!(matches!(result, Err(GatewayError::Spawn(_))));
    }

    #[tokio::test]
    async fn test_stderr_excerpt_is_trimmed() {
        let runner = GitRunner::new("sh".into());
        let git = runner
            .spawn(&["-c", "echo boom >&2; true"], Path::new("/tmp"))
            .unwrap();
        let excerpt = stderr_excerpt(git.stderr).await;
        assert_eq!(excerpt, "boom");
    }
}
