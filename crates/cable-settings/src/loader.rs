//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects merge recursively (source overrides target per key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::CableSettings;

/// Resolve the settings file path (`~/.cable/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".cable").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<CableSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CableSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Defaults deep-merged with the file at `path`, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<CableSettings> {
    let defaults = serde_json::to_value(CableSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
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
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Reject settings that cannot run.
pub fn validate(settings: &CableSettings) -> Result<()> {
    if settings.server.worker_pool_size == 0 {
        return Err(SettingsError::InvalidValue(
            "workerPoolSize must be greater than zero".into(),
        ));
    }
    if settings.server.heartbeat_interval_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "heartbeatIntervalMs must be greater than zero".into(),
        ));
    }
    if !settings.server.mount_path.starts_with('/') {
        return Err(SettingsError::InvalidValue(format!(
            "mountPath must start with '/': {}",
            settings.server.mount_path
        )));
    }
    Ok(())
}

/// Apply `CABLE_*` environment overrides.
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut CableSettings) {
    if let Some(v) = read_env_string("CABLE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("CABLE_PORT", 0, 65_535) {
        #[allow(clippy::cast_possible_truncation)]
        let port = v as u16;
        settings.server.port = port;
    }
    if let Some(v) = read_env_string("CABLE_MOUNT_PATH") {
        settings.server.mount_path = v;
    }
    if let Some(v) = read_env_u64("CABLE_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.server.heartbeat_interval_ms = v;
    }
    if let Some(v) = read_env_u64("CABLE_WORKER_POOL_SIZE", 1, 1_024) {
        #[allow(clippy::cast_possible_truncation)]
        let size = v as usize;
        settings.server.worker_pool_size = size;
    }
    if let Some(v) = read_env_string("CABLE_ALLOWED_ORIGINS") {
        settings.server.allowed_request_origins = parse_list(&v);
    }
    if let Some(v) = read_env_bool("CABLE_DISABLE_FORGERY_PROTECTION") {
        settings.server.disable_request_forgery_protection = v;
    }
    if let Some(v) = read_env_string("CABLE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a boolean (`true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`).
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u64` within an inclusive range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

// ── Env var readers ─────────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"origins": ["a", "b"]});
        let source = serde_json::json!({"origins": ["c"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["origins"], serde_json::json!(["c"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1});
        let source = serde_json::json!({"a": null});
        assert_eq!(deep_merge(target, source)["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/cable.json")).unwrap();
        assert_eq!(settings, CableSettings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server":{"heartbeatIntervalMs":500,"allowedRequestOrigins":["http://rubyonrails.com"]}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.server.heartbeat_interval_ms, 500);
        assert_eq!(
            settings.server.allowed_request_origins,
            vec!["http://rubyonrails.com".to_string()]
        );
        assert_eq!(settings.server.worker_pool_size, 4);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = load_file_layer(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Json(_)));
    }

    #[test]
    fn validate_rejects_zero_pool() {
        let mut settings = CableSettings::default();
        settings.server.worker_pool_size = 0;
        assert!(matches!(
            validate(&settings),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn validate_rejects_relative_mount_path() {
        let mut settings = CableSettings::default();
        settings.server.mount_path = "cable".into();
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn validate_accepts_defaults() {
        assert!(validate(&CableSettings::default()).is_ok());
    }

    #[test]
    fn parse_bool_values() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("3000", 100, 600_000), Some(3000));
        assert_eq!(parse_u64_range("50", 100, 600_000), None);
        assert_eq!(parse_u64_range("abc", 0, 10), None);
    }

    #[test]
    fn parse_list_trims() {
        assert_eq!(
            parse_list(" http://a.com, ,http://b.com "),
            vec!["http://a.com".to_string(), "http://b.com".to_string()]
        );
    }
}
