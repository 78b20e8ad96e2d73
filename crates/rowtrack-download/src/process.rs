//! Subprocess execution with a hard timeout.
//!
//! Collaborators are synchronous and run on blocking worker threads, so the
//! entry point here is blocking too. The child itself is driven by tokio:
//! on a runtime's blocking thread the ambient handle is used, otherwise a
//! small current-thread runtime is built for the call.

use std::process::{Command, Stdio};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tracing::{debug, warn};

use crate::error::CollaboratorError;

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion, killing it once `timeout` has elapsed.
///
/// Must not be called from inside an async task; use a blocking worker
/// (`spawn_blocking`) or a plain thread.
pub fn run_with_timeout(command: Command, timeout: Duration) -> Result<CommandOutput, CollaboratorError> {
    let program = command.get_program().to_string_lossy().into_owned();
    if let Ok(handle) = Handle::try_current() {
        return handle.block_on(run_command(command, timeout));
    }
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CollaboratorError::Spawn {
            program,
            message: format!("failed to start process runtime: {e}"),
        })?;
    runtime.block_on(run_command(command, timeout))
}

/// Async form of [`run_with_timeout`].
pub async fn run_command(command: Command, timeout: Duration) -> Result<CommandOutput, CollaboratorError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let mut command = tokio::process::Command::from(command);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn().map_err(|e| CollaboratorError::Spawn {
        program: program.clone(),
        message: e.to_string(),
    })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let output = CommandOutput {
                code: output.status.code(),
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            };
            debug!(program = %program, code = ?output.code, "Process finished");
            Ok(output)
        }
        Ok(Err(e)) => Err(CollaboratorError::Spawn {
            program,
            message: e.to_string(),
        }),
        Err(_) => {
            warn!(program = %program, ?timeout, "Killing process after timeout");
            Err(CollaboratorError::Timeout { program, timeout })
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_captures_output_and_status() {
        let out = run_with_timeout(sh("echo hello; echo oops >&2; exit 3"), Duration::from_secs(5)).unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.code, Some(3));
        assert!(!out.success);
    }

    #[test]
    fn test_timeout_kills_process() {
        let started = Instant::now();
        let err = run_with_timeout(sh("sleep 5"), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, CollaboratorError::Timeout { .. }));
        assert!(err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run_with_timeout(Command::new("/nonexistent/rowtrack-tool"), Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, CollaboratorError::Spawn { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_runs_on_blocking_worker_with_ambient_runtime() {
        let out = tokio::task::spawn_blocking(|| run_with_timeout(sh("echo worker"), Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "worker");
    }

    #[tokio::test]
    async fn test_async_timeout_kills_process() {
        let started = Instant::now();
        let err = run_command(sh("sleep 5"), Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
