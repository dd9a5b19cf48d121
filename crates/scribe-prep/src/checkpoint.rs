//! Checkpoint directories with a retention bound.
//!
//! Layout: `<dir>/checkpoint-<step>/trainer_state.json`. After every save the
//! oldest checkpoints (by step) beyond `save_total_limit` are removed.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::types::{PrepError, Result, ResultExt};

const PREFIX: &str = "checkpoint-";

/// State file written into every checkpoint directory.
pub const STATE_FILE: &str = "trainer_state.json";

/// A checkpoint on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// Optimizer step it was taken at.
    pub step: usize,
    /// Checkpoint directory.
    pub path: PathBuf,
}

/// Saves checkpoints and enforces the retention limit.
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
    save_total_limit: Option<usize>,
}

impl CheckpointManager {
    /// Manage checkpoints under `dir`. `None` keeps every checkpoint.
    pub fn new(dir: impl Into<PathBuf>, save_total_limit: Option<usize>) -> Self {
        Self {
            dir: dir.into(),
            save_total_limit,
        }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Existing checkpoints, oldest first. A missing root is empty.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PrepError::io(&self.dir, e)),
        };
        let mut checkpoints: Vec<Checkpoint> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let name = entry.file_name();
                let step = name.to_str()?.strip_prefix(PREFIX)?.parse().ok()?;
                Some(Checkpoint {
                    step,
                    path: entry.path(),
                })
            })
            .collect();
        checkpoints.sort_by_key(|c| c.step);
        Ok(checkpoints)
    }

    /// Write `state` as the checkpoint for `step`, then rotate.
    pub fn save<T: Serialize>(&self, step: usize, state: &T) -> Result<Checkpoint> {
        let path = self.dir.join(format!("{PREFIX}{step}"));
        std::fs::create_dir_all(&path).map_err(|e| PrepError::io(&path, e))?;
        let json = serde_json::to_vec_pretty(state).checkpoint("encode state")?;
        let state_path = path.join(STATE_FILE);
        std::fs::write(&state_path, json).map_err(|e| PrepError::io(&state_path, e))?;
        info!(step, path = %path.display(), "checkpoint saved");

        self.rotate()?;
        Ok(Checkpoint { step, path })
    }

    /// Delete the oldest checkpoints beyond the limit.
    pub fn rotate(&self) -> Result<Vec<Checkpoint>> {
        let Some(limit) = self.save_total_limit else {
            return Ok(Vec::new());
        };
        let checkpoints = self.list()?;
        let excess = checkpoints.len().saturating_sub(limit);
        let removed: Vec<Checkpoint> = checkpoints.into_iter().take(excess).collect();
        for c in &removed {
            std::fs::remove_dir_all(&c.path).map_err(|e| PrepError::io(&c.path, e))?;
            debug!(step = c.step, "old checkpoint removed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_missing_dir_is_empty() {
        let m = CheckpointManager::new("/nonexistent/ckpt", Some(2));
        assert!(m.list().unwrap().is_empty());
    }

    #[test]
    fn save_writes_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let m = CheckpointManager::new(dir.path(), None);
        let c = m.save(400, &json!({"step": 400})).unwrap();
        assert_eq!(c.step, 400);
        let raw = std::fs::read_to_string(c.path.join(STATE_FILE)).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["step"], 400);
    }

    #[test]
    fn keeps_only_newest_by_step() {
        let dir = tempfile::tempdir().unwrap();
        let m = CheckpointManager::new(dir.path(), Some(2));
        for step in [100, 900, 1000, 200] {
            let _ = m.save(step, &json!({})).unwrap();
        }
        let steps: Vec<usize> = m.list().unwrap().iter().map(|c| c.step).collect();
        assert_eq!(steps, vec![900, 1000]);
    }

    #[test]
    fn unbounded_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let m = CheckpointManager::new(dir.path(), None);
        for step in 1..=5 {
            let _ = m.save(step, &json!({})).unwrap();
        }
        assert_eq!(m.list().unwrap().len(), 5);
    }

    #[test]
    fn foreign_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("runs")).unwrap();
        std::fs::create_dir(dir.path().join("checkpoint-abc")).unwrap();
        std::fs::write(dir.path().join("checkpoint-7"), b"file").unwrap();
        let m = CheckpointManager::new(dir.path(), Some(1));
        assert!(m.list().unwrap().is_empty());
    }
}
