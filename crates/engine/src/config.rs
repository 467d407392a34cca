use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use lifted_core::ProviderOptions;

/// A malformed environment value.
#[derive(Debug, thiserror::Error)]
#[error("{var} must be {expected}, got \"{value}\"")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub expected: &'static str,
}

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding one file per upload job.
    pub queue_dir: PathBuf,
    /// Directory scanned for playbook providers.
    pub providers_dir: PathBuf,
    /// Dispatcher polling interval.
    pub poll_interval: Duration,
    /// Number of uploads that may run at the same time.
    pub max_concurrent_uploads: usize,
    /// How long the `dummy` provider waits.
    pub dummy_delay: Duration,
    /// Program used to run provider playbooks.
    pub ansible_program: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_dir: PathBuf::from("/var/lib/lifted/upload_queue"),
            providers_dir: PathBuf::from("/usr/share/lifted/providers"),
            poll_interval: Duration::from_millis(1000),
            max_concurrent_uploads: 1,
            dummy_delay: Duration::from_secs(30),
            ansible_program: "ansible-playbook".into(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                         | Default                        |
    /// |---------------------------------|--------------------------------|
    /// | `LIFTED_QUEUE_DIR`              | `/var/lib/lifted/upload_queue` |
    /// | `LIFTED_PROVIDERS_DIR`          | `/usr/share/lifted/providers`  |
    /// | `LIFTED_POLL_INTERVAL_MS`       | `1000`                         |
    /// | `LIFTED_MAX_CONCURRENT_UPLOADS` | `1`                            |
    /// | `LIFTED_DUMMY_DELAY_SECS`       | `30`                           |
    /// | `LIFTED_ANSIBLE_PLAYBOOK`       | `ansible-playbook`             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let queue_dir = lookup("LIFTED_QUEUE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.queue_dir);
        let providers_dir = lookup("LIFTED_PROVIDERS_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.providers_dir);

        let poll_ms: u64 = parse(&lookup, "LIFTED_POLL_INTERVAL_MS", 1000, "a number of milliseconds")?;
        if poll_ms == 0 {
            return Err(invalid("LIFTED_POLL_INTERVAL_MS", "0", "greater than zero"));
        }

        let max_concurrent_uploads: usize =
            parse(&lookup, "LIFTED_MAX_CONCURRENT_UPLOADS", 1, "a positive integer")?;
        if max_concurrent_uploads == 0 {
            return Err(invalid("LIFTED_MAX_CONCURRENT_UPLOADS", "0", "at least 1"));
        }

        let dummy_secs: u64 = parse(&lookup, "LIFTED_DUMMY_DELAY_SECS", 30, "a number of seconds")?;

        let ansible_program = lookup("LIFTED_ANSIBLE_PLAYBOOK")
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(defaults.ansible_program);

        Ok(Self {
            queue_dir,
            providers_dir,
            poll_interval: Duration::from_millis(poll_ms),
            max_concurrent_uploads,
            dummy_delay: Duration::from_secs(dummy_secs),
            ansible_program,
        })
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            providers_dir: self.providers_dir.clone(),
            dummy_delay: self.dummy_delay,
            ansible_program: self.ansible_program.clone(),
        }
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| invalid(var, &raw, expected)),
    }
}

fn invalid(var: &'static str, value: &str, expected: &'static str) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        expected,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.queue_dir, PathBuf::from("/var/lib/lifted/upload_queue"));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.max_concurrent_uploads, 1);
        assert_eq!(config.dummy_delay, Duration::from_secs(30));
        assert_eq!(config.ansible_program, "ansible-playbook");
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("LIFTED_QUEUE_DIR", "/srv/q"),
            ("LIFTED_POLL_INTERVAL_MS", "250"),
            ("LIFTED_MAX_CONCURRENT_UPLOADS", "3"),
            ("LIFTED_DUMMY_DELAY_SECS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.queue_dir, PathBuf::from("/srv/q"));
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.max_concurrent_uploads, 3);
        assert_eq!(config.dummy_delay, Duration::ZERO);
        assert_eq!(config.provider_options().dummy_delay, Duration::ZERO);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("LIFTED_POLL_INTERVAL_MS", "soon")])).unwrap_err();
        assert_eq!(err.var, "LIFTED_POLL_INTERVAL_MS");
        assert_eq!(err.value, "soon");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = EngineConfig::from_lookup(lookup(&[("LIFTED_MAX_CONCURRENT_UPLOADS", "0")])).unwrap_err();
        assert_eq!(err.var, "LIFTED_MAX_CONCURRENT_UPLOADS");
    }
}
