//! Streaming subprocess execution for provider tasks.
//!
//! [`stream_command`] spawns a prepared [`tokio::process::Command`] and
//! forwards every stdout and stderr line into a [`LogSink`] as it arrives,
//! so a long-running tool's progress shows up in the job log immediately.

use std::process::{ExitStatus, Stdio};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::task::{LogSink, TaskError};

/// Spawn `cmd`, stream its output into `log`, and wait for it to exit.
///
/// The child is killed if the returned future is dropped, which is how a
/// cancelled in-process task stops its tool.
pub async fn stream_command(cmd: &mut Command, log: &LogSink) -> Result<ExitStatus, TaskError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    let stdout_task = tokio::spawn(forward_lines(child.stdout.take(), log.clone()));
    let stderr_task = tokio::spawn(forward_lines(child.stderr.take(), log.clone()));

    let status = child.wait().await?;

    // Drain whatever the pipes still hold once the process has exited.
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    Ok(status)
}

/// Forward an output stream line by line until EOF.
async fn forward_lines<R: AsyncRead + Unpin>(handle: Option<R>, log: LogSink) {
    let Some(handle) = handle else {
        return;
    };
    let mut lines = BufReader::new(handle).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log.line(line);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
