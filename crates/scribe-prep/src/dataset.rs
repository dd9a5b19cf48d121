//! Train/test record files.
//!
//! Accepts JSON Lines (one object per line) or a single top-level JSON
//! array of objects. Every object needs `audio_path` and `transcript`;
//! other keys are ignored.

use std::path::Path;

use tracing::info;

use crate::types::{PrepError, Record, Result, ResultExt};

/// Read all records from `path`.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let raw = std::fs::read_to_string(path).map_err(|e| PrepError::io(path, e))?;
    let records = parse_records(&raw).map_err(|e| match e {
        PrepError::Dataset(msg) => PrepError::Dataset(format!("{}: {msg}", path.display())),
        other => other,
    })?;
    info!(path = %path.display(), records = records.len(), "records loaded");
    Ok(records)
}

/// Parse record file contents.
pub fn parse_records(raw: &str) -> Result<Vec<Record>> {
    if raw.trim_start().starts_with('[') {
        return serde_json::from_str(raw).dataset("json array");
    }
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).dataset(&format!("line {}", i + 1)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::path::PathBuf;

    #[test]
    fn parses_json_lines_skipping_blanks() {
        let raw = r#"{"audio_path": "a.pcm", "transcript": "hi there"}

{"audio_path": "b.pcm", "transcript": "", "speaker": "x"}
"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].audio_path, PathBuf::from("a.pcm"));
        assert_eq!(records[0].transcript, "hi there");
        assert_eq!(records[1].transcript, "");
    }

    #[test]
    fn parses_json_array() {
        let raw = r#"[{"audio_path": "a.pcm", "transcript": "x"}]"#;
        let records = parse_records(raw).unwrap();
        assert_eq!(records[0].transcript, "x");
    }

    #[test]
    fn reports_line_number_of_bad_record() {
        let raw = "{\"audio_path\": \"a.pcm\", \"transcript\": \"a\"}\n{\"audio_path\": \"b.pcm\"}\n";
        let err = parse_records(raw).unwrap_err();
        assert_matches!(err, PrepError::Dataset(ref msg) if msg.starts_with("line 2"));
    }

    #[test]
    fn empty_file_has_no_records() {
        assert!(parse_records("").unwrap().is_empty());
    }

    #[test]
    fn load_records_prefixes_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let err = load_records(&path).unwrap_err();
        assert!(err.to_string().contains("train.jsonl"), "Got: {err}");
    }

    #[test]
    fn load_records_missing_file() {
        assert_matches!(
            load_records(Path::new("/nonexistent/train.jsonl")),
            Err(PrepError::Io { .. })
        );
    }
}
