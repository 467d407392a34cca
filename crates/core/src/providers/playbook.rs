//! Providers backed by an Ansible playbook.
//!
//! The playbook receives the job settings plus `image_path`, `image_name`
//! and `image_id` as extra variables. Its output is streamed into the job
//! log and a non-zero exit fails the upload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;

use crate::error::CoreError;
use crate::hashing;
use crate::settings::SettingsSchema;
use crate::subprocess::stream_command;
use crate::task::{LogSink, Task, TaskError, UploadRequest};
use crate::types::Settings;

/// Extension used for the uploaded object when the image has none.
const DEFAULT_EXTENSION: &str = "img";

pub struct PlaybookTask {
    name: String,
    playbook: PathBuf,
    program: String,
    schema: SettingsSchema,
}

impl PlaybookTask {
    pub fn new(name: impl Into<String>, playbook: impl Into<PathBuf>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            playbook: playbook.into(),
            program: program.into(),
            schema: SettingsSchema::open(),
        }
    }

    pub fn with_schema(mut self, schema: SettingsSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn playbook(&self) -> &Path {
        &self.playbook
    }

    fn extra_vars(request: &UploadRequest, image_id: &str) -> Settings {
        let mut vars = request.settings.clone();
        vars.insert(
            "image_path".into(),
            Value::String(request.image_path.display().to_string()),
        );
        vars.insert("image_name".into(), Value::String(request.image_name.clone()));
        vars.insert("image_id".into(), Value::String(image_id.to_string()));
        vars
    }
}

#[async_trait]
impl Task for PlaybookTask {
    fn provider_name(&self) -> &str {
        &self.name
    }

    fn validate_settings(&self, settings: &Settings) -> Result<(), CoreError> {
        self.schema.validate(settings)
    }

    async fn run(&self, request: &UploadRequest, log: &LogSink) -> Result<(), TaskError> {
        log.line(format!("Hashing image {}...", request.image_path.display()));
        let path = request.image_path.clone();
        let digest = tokio::task::spawn_blocking(move || hashing::hash_image(&path))
            .await
            .map_err(|e| TaskError::Aborted(format!("image hashing panicked: {e}")))??;

        let extension = request
            .image_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or(DEFAULT_EXTENSION);
        let image_id = hashing::image_id(&request.image_name, &digest, extension);
        log.line(format!("Image checksum is {digest}, uploading as {image_id}"));

        let vars = serde_json::to_string(&Self::extra_vars(request, &image_id))
            .map_err(|e| TaskError::Failed(format!("Could not encode playbook variables: {e}")))?;

        let mut cmd = Command::new(&self.program);
        cmd.arg(&self.playbook).arg("--extra-vars").arg(vars);
        let status = stream_command(&mut cmd, log).await?;

        if status.success() {
            log.line("Playbook finished.");
            Ok(())
        } else {
            let code = status
                .code()
                .map_or_else(|| "a signal".to_string(), |code| format!("exit code {code}"));
            Err(TaskError::Failed(format!(
                "{} playbook failed with {code}",
                self.name
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
