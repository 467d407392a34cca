//! A provider that uploads nothing. It waits for a while and succeeds,
//! which makes it useful for exercising the queue end to end.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CoreError;
use crate::task::{LogSink, Task, TaskError, UploadRequest};
use crate::types::Settings;

pub const PROVIDER_NAME: &str = "dummy";

pub struct DummyTask {
    delay: Duration,
}

impl DummyTask {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Task for DummyTask {
    fn provider_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn validate_settings(&self, _settings: &Settings) -> Result<(), CoreError> {
        Ok(())
    }

    async fn run(&self, _request: &UploadRequest, log: &LogSink) -> Result<(), TaskError> {
        log.line("Waiting...");
        tokio::time::sleep(self.delay).await;
        log.line("Waiting finished.");
        Ok(())
    }
}
