//! Built-in upload providers and the registry that resolves them.
//!
//! Job records store only a provider tag plus settings. The registry maps
//! the tag back to the [`Task`] implementation, both when a job is created
//! (to validate settings) and inside the worker that runs it.

pub mod dummy;
pub mod manifest;
pub mod playbook;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::CoreError;
use crate::task::Task;

pub use dummy::DummyTask;
pub use playbook::PlaybookTask;

/// File a provider directory must contain to be registered.
pub const PLAYBOOK_FILE: &str = "playbook.yaml";

/// Inputs for [`ProviderRegistry::discover`].
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Directory holding one sub-directory per playbook provider.
    pub providers_dir: PathBuf,
    /// How long the `dummy` provider waits.
    pub dummy_delay: Duration,
    /// Program that executes playbooks.
    pub ansible_program: String,
}

/// Provider tag -> task implementation.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under its provider name, replacing any previous
    /// provider with that name.
    pub fn register(&mut self, task: Arc<dyn Task>) {
        self.tasks.insert(task.provider_name().to_string(), task);
    }

    pub fn with(mut self, task: Arc<dyn Task>) -> Self {
        self.register(task);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Task>, CoreError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownProvider(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Register `dummy` plus one [`PlaybookTask`] per sub-directory of
    /// `providers_dir` that contains a `playbook.yaml`.
    ///
    /// A provider's `provider.toml`, when present, restricts the settings it
    /// accepts. Providers whose `provider.toml` cannot be read are skipped.
    /// A missing providers directory is not an error; only `dummy` is
    /// available then.
    pub fn discover(options: &ProviderOptions) -> std::io::Result<Self> {
        let mut registry = Self::new().with(Arc::new(DummyTask::new(options.dummy_delay)));

        let entries = match std::fs::read_dir(&options.providers_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    providers_dir = %options.providers_dir.display(),
                    "Providers directory does not exist, only the dummy provider is available",
                );
                return Ok(registry);
            }
            Err(e) => return Err(e),
        };

        for entry in entries {
            let entry = entry?;
            let playbook = entry.path().join(PLAYBOOK_FILE);
            if !playbook.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name == dummy::PROVIDER_NAME {
                tracing::warn!(provider = %name, "Ignoring playbook provider shadowing a built-in");
                continue;
            }
            let schema = match manifest::load_schema(&name, &entry.path()) {
                Ok(schema) => schema,
                Err(e) => {
                    tracing::error!(provider = %name, error = %e, "Skipping provider");
                    continue;
                }
            };
            tracing::debug!(provider = %name, playbook = %playbook.display(), "Registered playbook provider");
            let mut task = PlaybookTask::new(name, playbook, options.ansible_program.clone());
            if let Some(schema) = schema {
                task = task.with_schema(schema);
            }
            registry.register(Arc::new(task));
        }

        Ok(registry)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn options(dir: &std::path::Path) -> ProviderOptions {
        ProviderOptions {
            providers_dir: dir.to_path_buf(),
            dummy_delay: Duration::from_millis(1),
            ansible_program: "ansible-playbook".to_string(),
        }
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let registry = ProviderRegistry::new();
        assert_matches!(registry.get("aws").err(), Some(CoreError::UnknownProvider(name)) if name == "aws");
    }

    #[test]
    fn discover_without_directory_only_has_dummy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let registry = ProviderRegistry::discover(&options(&dir.path().join("missing"))).unwrap();
        assert_eq!(registry.names(), ["dummy"]);
    }

    #[test]
    fn discover_registers_directories_with_playbooks() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["aws", "azure", "empty"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("aws").join(PLAYBOOK_FILE), "- hosts: localhost\n").unwrap();
        std::fs::write(dir.path().join("azure").join(PLAYBOOK_FILE), "- hosts: localhost\n").unwrap();

        let registry = ProviderRegistry::discover(&options(dir.path())).unwrap();
        assert_eq!(registry.names(), ["aws", "azure", "dummy"]);
        assert_eq!(registry.get("aws").unwrap().provider_name(), "aws");
    }

    #[test]
    fn discovered_provider_uses_its_settings_info() {
        let dir = tempfile::tempdir().expect("tempdir");
        let aws = dir.path().join("aws");
        std::fs::create_dir(&aws).unwrap();
        std::fs::write(aws.join(PLAYBOOK_FILE), "- hosts: localhost\n").unwrap();
        std::fs::write(
            aws.join(manifest::MANIFEST_FILE),
            "[settings-info.aws_region]\ntype = \"string\"\nregex = \"^[a-z]{2}-[a-z]+-[0-9]$\"\n",
        )
        .unwrap();

        let registry = ProviderRegistry::discover(&options(dir.path())).unwrap();
        let aws = registry.get("aws").unwrap();

        let bogus = serde_json::json!({"totally_bogus_key": "x", "aws_region": "mars"});
        let serde_json::Value::Object(bogus) = bogus else { unreachable!() };
        assert_matches!(aws.validate_settings(&bogus), Err(CoreError::Validation(msg)) if msg.contains("totally_bogus_key"));

        let bad_region = serde_json::json!({"aws_region": "mars"});
        let serde_json::Value::Object(bad_region) = bad_region else { unreachable!() };
        assert_matches!(aws.validate_settings(&bad_region), Err(CoreError::Validation(msg)) if msg.contains("mars"));

        let good = serde_json::json!({"aws_region": "us-east-1"});
        let serde_json::Value::Object(good) = good else { unreachable!() };
        assert!(aws.validate_settings(&good).is_ok());
    }

    #[test]
    fn provider_with_broken_manifest_is_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let gcp = dir.path().join("gcp");
        std::fs::create_dir(&gcp).unwrap();
        std::fs::write(gcp.join(PLAYBOOK_FILE), "").unwrap();
        std::fs::write(gcp.join(manifest::MANIFEST_FILE), "[settings-info.x]\ntype = \"float\"\n").unwrap();

        let registry = ProviderRegistry::discover(&options(dir.path())).unwrap();
        assert_eq!(registry.names(), ["dummy"]);
    }

    #[test]
    fn playbook_cannot_shadow_dummy() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("dummy")).unwrap();
        std::fs::write(dir.path().join("dummy").join(PLAYBOOK_FILE), "").unwrap();

        let registry = ProviderRegistry::discover(&options(dir.path())).unwrap();
        assert!(registry.get("dummy").unwrap().validate_settings(&Default::default()).is_ok());
        assert_eq!(registry.names(), ["dummy"]);
    }
}
