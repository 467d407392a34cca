//! Child-process isolation.
//!
//! Each job runs as `<program> run-job <id> --queue-dir <dir>` in a process
//! group of its own. The child reads its record, runs the task, and talks
//! back over its pipes:
//!
//! - every stdout line is one job log line, in order;
//! - on failure the last stderr line is the error message;
//! - exit code 0 means success.
//!
//! Stopping a job sends SIGINT to the whole process group so tools the task
//! spawned are interrupted too.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use lifted_core::{JobRecord, LogSink, TaskError, WorkerHandle};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use super::{Executor, Launched};
use crate::error::EngineError;

/// Subcommand of the worker binary that runs a single job.
pub const RUN_JOB_COMMAND: &str = "run-job";

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    program: PathBuf,
    queue_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl ProcessExecutor {
    /// `program` must understand the `run-job` protocol described above.
    pub fn new(program: impl Into<PathBuf>, queue_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            queue_dir: queue_dir.into(),
            env: Vec::new(),
        }
    }

    /// Set an environment variable for every worker process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn launch(&self, record: &JobRecord, log: LogSink) -> Result<Launched, EngineError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(RUN_JOB_COMMAND)
            .arg(record.id().to_string())
            .arg("--queue-dir")
            .arg(&self.queue_dir)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {e}", self.program.display())))?;
        let pid = child
            .id()
            .ok_or_else(|| EngineError::Launch("worker exited before reporting its pid".into()))?;

        tracing::debug!(job_id = %record.id(), pid, "Spawned worker process");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let outcome = tokio::spawn(async move {
            let stdout_task = tokio::spawn(forward_log(stdout, log));
            let stderr_task = tokio::spawn(last_line(stderr, pid));

            let status = child.wait().await?;
            let _ = stdout_task.await;
            let last = stderr_task.await.ok().flatten();

            if status.success() {
                Ok(())
            } else {
                Err(TaskError::Failed(
                    last.unwrap_or_else(|| format!("worker process exited with {status}")),
                ))
            }
        });

        Ok(Launched {
            handle: WorkerHandle::Process { pid },
            outcome,
        })
    }

    fn request_stop(&self, handle: WorkerHandle) {
        match handle {
            WorkerHandle::Process { pid } => signal_group(pid),
            WorkerHandle::Local { slot } => {
                tracing::warn!(slot, "Process executor cannot stop a local worker");
            }
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        tracing::warn!(pid, "Worker pid out of range, not signalling");
        return;
    };
    // Safety: kill(2) has no memory-safety preconditions. The worker was
    // started as a group leader, so its pid is also its group id.
    let ret = unsafe { libc::kill(-pgid, libc::SIGINT) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        tracing::warn!(pid, error = %err, "Failed to signal worker process group");
    }
}

#[cfg(not(unix))]
fn signal_group(pid: u32) {
    tracing::warn!(pid, "Stopping worker processes is not supported on this platform");
}

async fn forward_log<R: AsyncRead + Unpin>(handle: Option<R>, log: LogSink) {
    let Some(handle) = handle else {
        return;
    };
    let mut lines = BufReader::new(handle).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log.line(line);
    }
}

/// Drain stderr, keeping the last non-empty line.
async fn last_line<R: AsyncRead + Unpin>(handle: Option<R>, pid: u32) -> Option<String> {
    let handle = handle?;
    let mut lines = BufReader::new(handle).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::debug!(pid, "worker: {line}");
        if !line.trim().is_empty() {
            last = Some(line);
        }
    }
    last
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
