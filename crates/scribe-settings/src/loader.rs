//! Settings loading: defaults, JSON file, environment overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::PrepSettings;

/// File used when no explicit `--config` is given.
pub const DEFAULT_SETTINGS_FILE: &str = "scribe.json";

/// Resolve the settings file path.
///
/// `SCRIBE_CONFIG` wins; otherwise [`DEFAULT_SETTINGS_FILE`] in the current
/// directory.
pub fn settings_path() -> PathBuf {
    std::env::var_os("SCRIBE_CONFIG")
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from)
}

/// Keys whose `null` means "unset" rather than "keep the default".
const NULLABLE_KEYS: &[&str] = &["save_total_limit"];

/// Recursively merge `overlay` into `base`.
///
/// Objects merge key by key and `null` overlay values are skipped; every
/// other value in `overlay` replaces the value in `base`.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                if value.is_null() {
                    continue;
                }
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = base.insert(key, merged);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Load settings from the default location.
///
/// A missing default file is not an error: compiled defaults plus env
/// overrides are returned.
pub fn load_settings() -> Result<PrepSettings> {
    let path = settings_path();
    if path.exists() {
        load_settings_from_path(&path)
    } else {
        tracing::debug!(?path, "no settings file, using defaults");
        let mut settings = PrepSettings::default();
        apply_env_overrides(&mut settings, |k| std::env::var(k).ok());
        settings.validate();
        Ok(settings)
    }
}

/// Load settings from an explicit file, which must exist.
pub fn load_settings_from_path(path: &Path) -> Result<PrepSettings> {
    let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings = parse_settings(&raw)?;
    apply_env_overrides(&mut settings, |k| std::env::var(k).ok());
    settings.validate();
    tracing::debug!(?path, "settings loaded");
    Ok(settings)
}

/// Deep-merge a JSON document over compiled defaults.
pub fn parse_settings(raw: &str) -> Result<PrepSettings> {
    let user: Value = serde_json::from_str(raw)?;
    let defaults = serde_json::to_value(PrepSettings::default())?;
    let mut merged = deep_merge(defaults, user.clone());
    if let (Value::Object(merged), Value::Object(user)) = (&mut merged, &user) {
        for key in NULLABLE_KEYS {
            if user.get(*key).is_some_and(Value::is_null) {
                let _ = merged.insert((*key).to_string(), Value::Null);
            }
        }
    }
    Ok(serde_json::from_value(merged)?)
}

/// Apply `SCRIBE_*` overrides read through `lookup`.
///
/// Unparseable values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut PrepSettings, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let v = raw.trim().parse().ok();
        if v.is_none() {
            tracing::warn!(key, value = raw, "ignoring unparseable env override");
        }
        v
    }

    if let Some(v) = lookup("SCRIBE_TRAIN_DATA_PATH") {
        settings.data.train_data_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("SCRIBE_TEST_DATA_PATH") {
        settings.data.test_data_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("SCRIBE_VOCAB_PATH") {
        settings.data.vocab_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("SCRIBE_OUTPUT_DIR") {
        settings.data.output_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SCRIBE_MAKE_VOCAB").and_then(|v| parsed("SCRIBE_MAKE_VOCAB", &v)) {
        settings.data.make_vocab = v;
    }
    if let Some(v) = lookup("SCRIBE_NUM_WORKERS").and_then(|v| parsed("SCRIBE_NUM_WORKERS", &v)) {
        settings.pipeline.num_workers = v;
    }
    if let Some(v) = lookup("SCRIBE_BATCH_SIZE").and_then(|v| parsed("SCRIBE_BATCH_SIZE", &v)) {
        settings.training.batch_size = v;
    }
    if let Some(v) = lookup("SCRIBE_CHECKPOINT_DIR") {
        settings.training.checkpoint_dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("SCRIBE_LOG_LEVEL") {
        settings.logging.log_level = v;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn deep_merge_objects_recursively() {
        let a = json!({"x": {"a": 1, "b": 2}, "y": 1});
        let b = json!({"x": {"b": 3}});
        let merged = deep_merge(a, b);
        assert_eq!(merged, json!({"x": {"a": 1, "b": 3}, "y": 1}));
    }

    #[test]
    fn deep_merge_scalar_replaces_but_null_is_skipped() {
        assert_eq!(deep_merge(json!(1), json!("two")), json!("two"));
        assert_eq!(deep_merge(json!({"a": 1}), json!(null)), json!({"a": 1}));
    }

    #[test]
    fn parse_settings_keeps_defaults_for_missing_keys() {
        let s = parse_settings(r#"{"vocab_path": "v.json", "learning_rate": 0.001}"#).unwrap();
        assert_eq!(s.data.vocab_path, PathBuf::from("v.json"));
        assert!((s.training.learning_rate - 0.001).abs() < f64::EPSILON);
        assert_eq!(s.training.save_steps, 400);
    }

    #[test]
    fn null_keeps_default() {
        let s = parse_settings(r#"{"batch_size": null, "vocab_path": null}"#).unwrap();
        assert_eq!(s.training.batch_size, 16);
        assert_eq!(s.data.vocab_path, PathBuf::from("vocab.json"));
        assert_eq!(s.training.save_total_limit, Some(2));
    }

    #[test]
    fn null_save_total_limit_keeps_everything() {
        let s = parse_settings(r#"{"save_total_limit": null}"#).unwrap();
        assert_eq!(s.training.save_total_limit, None);
    }

    #[test]
    fn parse_settings_rejects_bad_json() {
        assert_matches!(parse_settings("{not json"), Err(SettingsError::Json(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_settings_from_path(Path::new("/nonexistent/scribe.json")).unwrap_err();
        assert_matches!(err, SettingsError::Io { ref path, .. } if path.ends_with("scribe.json"));
    }

    #[test]
    fn load_from_file_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scribe.json");
        std::fs::write(&path, r#"{"layerdrop": 3.0, "batch_size": 2}"#).unwrap();
        let s = load_settings_from_path(&path).unwrap();
        assert_eq!(s.model.layerdrop, 1.0);
        assert_eq!(s.training.batch_size, 2);
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("SCRIBE_VOCAB_PATH", "/tmp/v.json"),
            ("SCRIBE_MAKE_VOCAB", "false"),
            ("SCRIBE_NUM_WORKERS", "8"),
            ("SCRIBE_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut s = PrepSettings::default();
        apply_env_overrides(&mut s, |k| env.get(k).map(|v| (*v).to_string()));
        assert_eq!(s.data.vocab_path, PathBuf::from("/tmp/v.json"));
        assert!(!s.data.make_vocab);
        assert_eq!(s.pipeline.num_workers, 8);
        assert_eq!(s.logging.log_level, "debug");
    }

    #[test]
    fn unparseable_env_override_is_ignored() {
        let mut s = PrepSettings::default();
        apply_env_overrides(&mut s, |k| {
            (k == "SCRIBE_BATCH_SIZE").then(|| "many".to_string())
        });
        assert_eq!(s.training.batch_size, 16);
    }
}
