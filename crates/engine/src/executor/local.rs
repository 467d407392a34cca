use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lifted_core::{JobRecord, LogSink, ProviderRegistry, TaskError, UploadRequest, WorkerHandle};
use tokio_util::sync::CancellationToken;

use super::{Executor, Launched};
use crate::error::EngineError;

type Tokens = Arc<Mutex<HashMap<u64, CancellationToken>>>;

/// Runs tasks on the current tokio runtime, one spawned task per job.
///
/// Stopping a job cancels its token, which drops the task's future at its
/// next suspension point.
#[derive(Debug)]
pub struct LocalExecutor {
    registry: ProviderRegistry,
    next_slot: AtomicU64,
    tokens: Tokens,
}

impl LocalExecutor {
    pub fn new(registry: ProviderRegistry) -> Self {
        Self {
            registry,
            next_slot: AtomicU64::new(1),
            tokens: Arc::default(),
        }
    }

    /// Number of jobs currently running in this executor.
    pub fn active(&self) -> usize {
        lock(&self.tokens).len()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn launch(&self, record: &JobRecord, log: LogSink) -> Result<Launched, EngineError> {
        // Resolution failures surface as the job's outcome, so the job
        // fails through the usual path instead of being retried every tick.
        let prepared = self
            .registry
            .get(record.provider())
            .and_then(|task| Ok((task, UploadRequest::from_record(record)?)));

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        lock(&self.tokens).insert(slot, token.clone());

        let tokens = Arc::clone(&self.tokens);
        let outcome = tokio::spawn(async move {
            let mut run = tokio::spawn(async move {
                let (task, request) = prepared.map_err(|e| TaskError::Failed(e.to_string()))?;
                task.run(&request, &log).await
            });
            let result = tokio::select! {
                _ = token.cancelled() => {
                    run.abort();
                    Err(TaskError::Cancelled)
                }
                joined = &mut run => joined.unwrap_or_else(|e| Err(TaskError::Aborted(e.to_string()))),
            };
            lock(&tokens).remove(&slot);
            result
        });

        Ok(Launched {
            handle: WorkerHandle::Local { slot },
            outcome,
        })
    }

    fn request_stop(&self, handle: WorkerHandle) {
        match handle {
            WorkerHandle::Local { slot } => match lock(&self.tokens).get(&slot) {
                Some(token) => token.cancel(),
                None => tracing::debug!(slot, "Local worker already gone"),
            },
            WorkerHandle::Process { pid } => {
                tracing::warn!(pid, "Local executor cannot stop a process worker");
            }
        }
    }
}

fn lock(tokens: &Tokens) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
    tokens.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use lifted_core::providers::DummyTask;
    use lifted_core::Settings;

    use super::*;

    fn ready_record() -> JobRecord {
        let mut record = JobRecord::new("dummy", "img", Settings::new());
        record.mark_ready("/tmp/x.img").unwrap();
        record
    }

    fn executor(delay: Duration) -> LocalExecutor {
        LocalExecutor::new(ProviderRegistry::new().with(Arc::new(DummyTask::new(delay))))
    }

    #[tokio::test]
    async fn runs_task_to_completion() {
        let executor = executor(Duration::ZERO);
        let record = ready_record();
        let (sink, mut rx) = LogSink::channel(record.id());

        let launched = executor.launch(&record, sink).await.unwrap();
        assert_matches!(launched.handle, WorkerHandle::Local { .. });
        launched.outcome.await.unwrap().unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("Waiting..."));
        assert_eq!(rx.recv().await.as_deref(), Some("Waiting finished."));
        assert_eq!(executor.active(), 0);
    }

    #[tokio::test]
    async fn stop_cancels_running_task() {
        let executor = executor(Duration::from_secs(3600));
        let record = ready_record();
        let (sink, _rx) = LogSink::channel(record.id());

        let launched = executor.launch(&record, sink).await.unwrap();
        executor.request_stop(launched.handle);

        let result = tokio::time::timeout(Duration::from_secs(5), launched.outcome)
            .await
            .expect("task stops promptly")
            .unwrap();
        assert_matches!(result, Err(TaskError::Cancelled));
        assert_eq!(executor.active(), 0);
    }

    #[tokio::test]
    async fn unknown_provider_fails_the_job() {
        let executor = LocalExecutor::new(ProviderRegistry::new());
        let record = ready_record();
        let (sink, _rx) = LogSink::channel(record.id());

        let launched = executor.launch(&record, sink).await.unwrap();
        let result = launched.outcome.await.unwrap();
        assert_matches!(result, Err(TaskError::Failed(msg)) if msg.contains("dummy"));
        assert_eq!(executor.active(), 0);
    }
}
