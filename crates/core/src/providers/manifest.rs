//! `provider.toml` loading.
//!
//! A playbook provider may ship a `provider.toml` next to its playbook. Its
//! `settings-info` table lists the settings the provider accepts:
//!
//! ```toml
//! [settings-info.aws_region]
//! display = "AWS region"
//! type = "string"
//! regex = "^[a-z]{2}-[a-z]+-[0-9]$"
//! ```
//!
//! Display names and placeholders are front-end hints and are ignored here.

use std::collections::BTreeMap;
use std::path::Path;

use config::{Config, File, FileFormat};
use serde::Deserialize;

use crate::error::CoreError;
use crate::settings::{SettingSpec, SettingsSchema};

/// File describing a provider's settings.
pub const MANIFEST_FILE: &str = "provider.toml";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(rename = "settings-info", default)]
    settings_info: BTreeMap<String, SettingInfo>,
}

#[derive(Debug, Deserialize)]
struct SettingInfo {
    #[serde(rename = "type")]
    kind: String,
    regex: Option<String>,
    #[serde(default)]
    required: bool,
}

/// Read the settings schema of the provider in `dir`.
///
/// Returns `None` when the provider has no `provider.toml`.
pub fn load_schema(name: &str, dir: &Path) -> Result<Option<SettingsSchema>, CoreError> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }

    let invalid = |reason: String| CoreError::InvalidProvider {
        name: name.to_string(),
        reason,
    };

    let manifest: Manifest = Config::builder()
        .add_source(File::from(path.as_path()).format(FileFormat::Toml))
        .build()
        .and_then(|config| config.try_deserialize::<Manifest>())
        .map_err(|e| invalid(format!("{}: {e}", path.display())))?;

    let mut specs = Vec::with_capacity(manifest.settings_info.len());
    for (key, info) in manifest.settings_info {
        let mut spec = match info.kind.as_str() {
            "string" => SettingSpec::string(&key),
            "boolean" => SettingSpec::boolean(&key),
            other => {
                return Err(invalid(format!("setting \"{key}\" has unknown type \"{other}\"")));
            }
        };
        if info.required {
            spec = spec.required();
        }
        if let Some(regex) = info.regex {
            spec = spec.pattern(&regex).map_err(|e| invalid(e.to_string()))?;
        }
        specs.push(spec);
    }

    Ok(Some(SettingsSchema::new(specs)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::types::Settings;

    fn settings(value: serde_json::Value) -> Settings {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn provider(manifest: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(MANIFEST_FILE), manifest).unwrap();
        dir
    }

    #[test]
    fn missing_manifest_has_no_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_schema("aws", dir.path()).unwrap().is_none());
    }

    #[test]
    fn settings_info_becomes_schema() {
        let dir = provider(
            r#"
display = "AWS"

[settings-info.aws_region]
display = "Region"
type = "string"
regex = "^[a-z]{2}-[a-z]+-[0-9]$"

[settings-info.public]
display = "Public"
type = "boolean"
"#,
        );
        let schema = load_schema("aws", dir.path()).unwrap().unwrap();

        assert!(schema
            .validate(&settings(json!({"aws_region": "us-east-1", "public": true})))
            .is_ok());
        assert!(schema.validate(&settings(json!({"aws_region": "mars"}))).is_err());
        assert!(schema.validate(&settings(json!({"public": "yes"}))).is_err());
        assert!(schema.validate(&settings(json!({"bucket": "b"}))).is_err());
    }

    #[test]
    fn required_flag_is_honoured() {
        let dir = provider(
            r#"
[settings-info.bucket]
type = "string"
required = true
"#,
        );
        let schema = load_schema("aws", dir.path()).unwrap().unwrap();
        assert!(schema.validate(&Settings::new()).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let dir = provider("[settings-info.count]\ntype = \"integer\"\n");
        assert_matches!(
            load_schema("aws", dir.path()),
            Err(CoreError::InvalidProvider { reason, .. }) if reason.contains("integer")
        );
    }

    #[test]
    fn malformed_manifest_is_rejected() {
        let dir = provider("[settings-info\n");
        assert_matches!(load_schema("aws", dir.path()), Err(CoreError::InvalidProvider { .. }));
    }
}
