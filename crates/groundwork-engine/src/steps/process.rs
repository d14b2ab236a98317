//! Child process execution with streamed log capture
//!
//! Both stdout and stderr are forwarded to the log sink line-preserving
//! and unmodified while the child runs. A nonzero exit is a fatal step
//! failure.

use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::debug;

use super::StepError;
use crate::logbuf::StepLogBuffer;

async fn pump<R: AsyncRead + Unpin>(reader: R, logs: &StepLogBuffer) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        logs.write(&line).await;
    }
}

/// Run a command, streaming its output into the log sink, and fail on a
/// nonzero exit status.
pub async fn run_command(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    logs: &StepLogBuffer,
) -> Result<(), StepError> {
    debug!(%program, ?args, "spawning child process");
    logs.write(&format!("$ {} {}", program, args.join(" "))).await;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let mut child = command
        .spawn()
        .map_err(|e| StepError::Internal(format!("failed to spawn {program}: {e}")))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StepError::Internal("child stdout unavailable".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| StepError::Internal("child stderr unavailable".to_string()))?;

    let (status, _, _) = tokio::join!(child.wait(), pump(stdout, logs), pump(stderr, logs));

    let status =
        status.map_err(|e| StepError::Internal(format!("failed to wait for {program}: {e}")))?;

    if !status.success() {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(StepError::Failed(format!(
            "{program} exited with status {code}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::persistence::InMemoryPlatformStore;

    fn detached_logs() -> StepLogBuffer {
        StepLogBuffer::detached(Arc::new(InMemoryPlatformStore::new()))
    }

    #[tokio::test]
    async fn captures_stdout_lines() {
        let logs = detached_logs();
        run_command("sh", &["-c", "echo alpha; echo beta"], None, &logs)
            .await
            .unwrap();

        let content = logs.buffered();
        assert!(content.contains("alpha"));
        assert!(content.contains("beta"));
    }

    #[tokio::test]
    async fn captures_stderr_lines() {
        let logs = detached_logs();
        run_command("sh", &["-c", "echo oops >&2"], None, &logs)
            .await
            .unwrap();
        assert!(logs.buffered().contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails_the_step() {
        let logs = detached_logs();
        let err = run_command("sh", &["-c", "exit 3"], None, &logs)
            .await
            .unwrap_err();
        match err {
            StepError::Failed(msg) => assert!(msg.contains("status 3")),
            other => panic!("expected step failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_binary_is_internal() {
        let logs = detached_logs();
        let err = run_command("definitely-not-a-binary", &[], None, &logs)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Internal(_)));
    }
}
