//! Server settings.
//!
//! Loaded in three layers, lowest priority first:
//! 1. compiled defaults ([`ServerSettings::default()`])
//! 2. `~/.dirsess/settings.json`, deep-merged over the defaults
//! 3. `DIRSESS_*` environment variables

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Server-wide anonymous-access switch. Root-DSE reads ignore it.
    pub allow_anonymous: bool,
    /// Naming context new security contexts are rooted at.
    pub provider_url: String,
    pub max_line_bytes: usize,
    pub max_outstanding_per_session: usize,
    /// Simulated backend latency per operation.
    pub operation_delay_ms: u64,
    pub log_level: String,
    pub log_json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 10389,
            allow_anonymous: true,
            provider_url: String::new(),
            max_line_bytes: 64 * 1024,
            max_outstanding_per_session: 128,
            operation_delay_ms: 0,
            log_level: "info".into(),
            log_json: true,
        }
    }
}

impl ServerSettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_outstanding_per_session == 0 {
            return Err(SettingsError::InvalidValue(
                "max_outstanding_per_session must be at least 1".into(),
            ));
        }
        if self.max_line_bytes < 64 {
            return Err(SettingsError::InvalidValue(format!(
                "max_line_bytes too small: {}",
                self.max_line_bytes
            )));
        }
        Ok(())
    }
}

/// Resolve the path to the settings file (`~/.dirsess/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".dirsess").join("settings.json")
}

/// A `DIRSESS_*` value that could not be applied and was ignored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedOverride {
    pub key: &'static str,
    pub value: String,
}

impl RejectedOverride {
    pub fn log(&self) {
        tracing::warn!(key = self.key, value = %self.value, "invalid env override, ignoring");
    }
}

/// Settings plus any env overrides that were rejected. Loading happens
/// before logging is up, so the caller reports the rejects once it is.
pub type Loaded = (ServerSettings, Vec<RejectedOverride>);

pub fn load_settings() -> Result<Loaded> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file means defaults; a malformed one is an error.
pub fn load_settings_from_path(path: &Path) -> Result<Loaded> {
    let defaults = serde_json::to_value(ServerSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ServerSettings = serde_json::from_value(merged)?;
    let rejected = apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok((settings, rejected))
}

/// Recursive deep merge of two JSON values.
///
/// Objects merge per key, everything else is replaced, and nulls in
/// `source` are skipped.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

pub fn apply_env_overrides(settings: &mut ServerSettings) -> Vec<RejectedOverride> {
    apply_overrides_with(settings, |name| std::env::var(name).ok())
}

/// Apply overrides from an arbitrary lookup. Invalid values are skipped
/// and returned.
pub fn apply_overrides_with(
    settings: &mut ServerSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<RejectedOverride> {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());
    let mut rejected = Vec::new();
    let mut reject = |key: &'static str, value: String| rejected.push(RejectedOverride { key, value });

    if let Some(v) = read("DIRSESS_HOST") {
        settings.host = v;
    }
    if let Some(v) = read("DIRSESS_PORT") {
        match v.parse::<u16>() {
            Ok(port) => settings.port = port,
            Err(_) => reject("DIRSESS_PORT", v),
        }
    }
    if let Some(v) = read("DIRSESS_ALLOW_ANONYMOUS") {
        match parse_bool(&v) {
            Some(b) => settings.allow_anonymous = b,
            None => reject("DIRSESS_ALLOW_ANONYMOUS", v),
        }
    }
    if let Some(v) = read("DIRSESS_PROVIDER_URL") {
        settings.provider_url = v;
    }
    if let Some(v) = read("DIRSESS_MAX_LINE_BYTES") {
        match parse_usize_range(&v, 64, 16 * 1024 * 1024) {
            Some(n) => settings.max_line_bytes = n,
            None => reject("DIRSESS_MAX_LINE_BYTES", v),
        }
    }
    if let Some(v) = read("DIRSESS_MAX_OUTSTANDING") {
        match parse_usize_range(&v, 1, 100_000) {
            Some(n) => settings.max_outstanding_per_session = n,
            None => reject("DIRSESS_MAX_OUTSTANDING", v),
        }
    }
    if let Some(v) = read("DIRSESS_OPERATION_DELAY_MS") {
        match parse_u64_range(&v, 0, 600_000) {
            Some(n) => settings.operation_delay_ms = n,
            None => reject("DIRSESS_OPERATION_DELAY_MS", v),
        }
    }
    if let Some(v) = read("DIRSESS_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = read("DIRSESS_LOG_JSON") {
        match parse_bool(&v) {
            Some(b) => settings.log_json = b,
            None => reject("DIRSESS_LOG_JSON", v),
        }
    }
    rejected
}

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, _) = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.port, ServerSettings::default().port);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"port": 3890, "allow_anonymous": false, "host": null}}"#).unwrap();
        let (settings, _) = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.port, 3890);
        assert!(!settings.allow_anonymous);
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.max_outstanding_per_session, 128);
    }

    #[test]
    fn malformed_file_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load_settings_from_path(file.path()),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn invalid_file_value_fails_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"max_outstanding_per_session": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(file.path()),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn deep_merge_nested() {
        let target = serde_json::json!({"a": {"x": 1, "y": 2}, "b": [1]});
        let source = serde_json::json!({"a": {"y": 3}, "b": [2, 3], "c": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged, serde_json::json!({"a": {"x": 1, "y": 3}, "b": [2, 3]}));
    }

    #[test]
    fn overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = [
            ("DIRSESS_PORT", "0"),
            ("DIRSESS_ALLOW_ANONYMOUS", "off"),
            ("DIRSESS_MAX_OUTSTANDING", "not-a-number"),
            ("DIRSESS_OPERATION_DELAY_MS", "25"),
            ("DIRSESS_LOG_JSON", "maybe"),
            ("DIRSESS_HOST", ""),
        ]
        .into_iter()
        .collect();
        let mut settings = ServerSettings::default();
        let rejected = apply_overrides_with(&mut settings, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.port, 0);
        assert!(!settings.allow_anonymous);
        assert_eq!(settings.max_outstanding_per_session, 128);
        assert_eq!(settings.operation_delay_ms, 25);
        assert!(settings.log_json);
        assert_eq!(settings.host, "127.0.0.1");

        let keys: Vec<&str> = rejected.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec!["DIRSESS_MAX_OUTSTANDING", "DIRSESS_LOG_JSON"]);
        assert_eq!(rejected[0].value, "not-a-number");
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("sure"), None);
        assert_eq!(parse_u64_range("10", 0, 5), None);
        assert_eq!(parse_usize_range("3", 1, 5), Some(3));
    }

    #[test]
    fn bind_addr_format() {
        let settings = ServerSettings {
            host: "0.0.0.0".into(),
            port: 389,
            ..Default::default()
        };
        assert_eq!(settings.bind_addr(), "0.0.0.0:389");
    }
}
