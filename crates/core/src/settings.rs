//! Provider settings validation.
//!
//! Settings are a flat JSON object. A provider describes the keys it
//! understands with a [`SettingsSchema`]; values are either strings
//! (optionally constrained by a regex) or booleans.

use regex::Regex;
use serde_json::Value;

use crate::error::CoreError;
use crate::types::Settings;

/// Value type of a single setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    String,
    Boolean,
}

impl SettingKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
        }
    }
}

/// Description of one accepted setting.
#[derive(Debug, Clone)]
pub struct SettingSpec {
    key: String,
    kind: SettingKind,
    required: bool,
    pattern: Option<Regex>,
}

impl SettingSpec {
    pub fn string(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: SettingKind::String,
            required: false,
            pattern: None,
        }
    }

    pub fn boolean(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: SettingKind::Boolean,
            required: false,
            pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Constrain a string setting. The pattern is anchored at the start of
    /// the value.
    pub fn pattern(mut self, pattern: &str) -> Result<Self, CoreError> {
        let anchored = format!("^(?:{pattern})");
        let regex = Regex::new(&anchored).map_err(|e| {
            CoreError::Validation(format!("Invalid pattern for setting \"{}\": {e}", self.key))
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The set of settings a provider accepts.
#[derive(Debug, Clone, Default)]
pub struct SettingsSchema {
    specs: Vec<SettingSpec>,
    open: bool,
}

impl SettingsSchema {
    pub fn new(specs: Vec<SettingSpec>) -> Self {
        Self { specs, open: false }
    }

    /// Accept any key, as long as every value is a string or a boolean.
    pub fn open() -> Self {
        Self {
            specs: Vec::new(),
            open: true,
        }
    }

    pub fn validate(&self, settings: &Settings) -> Result<(), CoreError> {
        for (key, value) in settings {
            match self.specs.iter().find(|spec| spec.key == *key) {
                Some(spec) => check_value(spec, value)?,
                None if self.open => {
                    if !(value.is_string() || value.is_boolean()) {
                        return Err(CoreError::Validation(format!(
                            "Expected a string or boolean for \"{key}\""
                        )));
                    }
                }
                None => {
                    return Err(CoreError::Validation(format!(
                        "Received unexpected setting: \"{key}\""
                    )));
                }
            }
        }

        if let Some(missing) = self
            .specs
            .iter()
            .find(|spec| spec.required && !settings.contains_key(&spec.key))
        {
            return Err(CoreError::Validation(format!(
                "Missing required setting: \"{}\"",
                missing.key
            )));
        }

        Ok(())
    }
}

fn check_value(spec: &SettingSpec, value: &Value) -> Result<(), CoreError> {
    if !spec.kind.matches(value) {
        return Err(CoreError::Validation(format!(
            "Expected a {} for \"{}\"",
            spec.kind.name(),
            spec.key
        )));
    }
    if let (Some(pattern), Some(text)) = (&spec.pattern, value.as_str()) {
        if !pattern.is_match(text) {
            return Err(CoreError::Validation(format!(
                "Value \"{text}\" is invalid for setting \"{}\"",
                spec.key
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn settings(value: Value) -> Settings {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    fn aws_like() -> SettingsSchema {
        SettingsSchema::new(vec![
            SettingSpec::string("region").required().pattern("[a-z]{2}-[a-z]+-[0-9]").unwrap(),
            SettingSpec::string("bucket").required(),
            SettingSpec::boolean("public"),
        ])
    }

    #[test]
    fn accepts_valid_settings() {
        let input = settings(json!({"region": "us-east-1", "bucket": "images", "public": false}));
        assert!(aws_like().validate(&input).is_ok());
    }

    #[test]
    fn rejects_unexpected_key() {
        let input = settings(json!({"region": "us-east-1", "bucket": "b", "color": "red"}));
        let err = aws_like().validate(&input).unwrap_err();
        assert!(err.to_string().contains("\"color\""));
    }

    #[test]
    fn rejects_wrong_type() {
        let input = settings(json!({"region": "us-east-1", "bucket": "b", "public": "yes"}));
        assert_matches!(aws_like().validate(&input), Err(CoreError::Validation(msg)) if msg.contains("boolean"));
    }

    #[test]
    fn rejects_pattern_mismatch() {
        let input = settings(json!({"region": "mars", "bucket": "b"}));
        assert_matches!(aws_like().validate(&input), Err(CoreError::Validation(msg)) if msg.contains("mars"));
    }

    #[test]
    fn rejects_missing_required() {
        let input = settings(json!({"region": "us-east-1"}));
        assert_matches!(aws_like().validate(&input), Err(CoreError::Validation(msg)) if msg.contains("bucket"));
    }

    #[test]
    fn open_schema_accepts_any_scalar_key() {
        let input = settings(json!({"anything": "goes", "flag": true}));
        assert!(SettingsSchema::open().validate(&input).is_ok());
    }

    #[test]
    fn open_schema_rejects_nested_values() {
        let input = settings(json!({"nested": {"a": 1}}));
        assert!(SettingsSchema::open().validate(&input).is_err());
    }

    #[test]
    fn invalid_pattern_is_reported() {
        assert_matches!(SettingSpec::string("x").pattern("("), Err(CoreError::Validation(_)));
    }
}
