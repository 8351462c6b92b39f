//! Durable progress checkpoint for the resumable embedding pipeline.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CheckpointError;

/// Which chunk ids have completed embedding, and how far the run got.
///
/// The processed set only grows within a run; it is discarded solely by an
/// explicit external reset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Serialized as a sorted list; round-trips losslessly.
    pub processed_chunk_ids: BTreeSet<String>,
    pub last_batch: u64,
    pub timestamp: i64,
}

impl CheckpointState {
    pub fn is_processed(&self, chunk_id: &str) -> bool {
        self.processed_chunk_ids.contains(chunk_id)
    }

    pub fn mark_processed<I>(&mut self, chunk_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.processed_chunk_ids.extend(chunk_ids);
    }

    pub fn processed_count(&self) -> usize {
        self.processed_chunk_ids.len()
    }

    /// Stamp the state with the current time before persisting.
    pub fn touch(&mut self) {
        self.timestamp = Utc::now().timestamp();
    }
}

/// File-backed checkpoint persistence.
///
/// Saves rewrite the file wholesale through a temp file and an atomic rename,
/// so a concurrent reader observes either the previous complete state or the
/// new one, never a mix.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, or the default when none exists.
    pub fn load(&self) -> Result<CheckpointState, CheckpointError> {
        if !self.path.exists() {
            return Ok(CheckpointState::default());
        }
        let data = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&data)?;
        Ok(state)
    }

    /// Persist the state durably. Idempotent on repeated identical saves.
    pub fn save(&self, state: &CheckpointState) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let serialized = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Discard the checkpoint. This is the external reset action; the
    /// pipeline itself never calls it.
    pub fn reset(&self) -> Result<(), CheckpointError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));
        let state = store.load().unwrap();
        assert!(state.processed_chunk_ids.is_empty());
        assert_eq!(state.last_batch, 0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut state = CheckpointState::default();
        state.mark_processed(["1_0".to_string(), "1_1".to_string()]);
        state.last_batch = 2;
        state.touch();
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.is_processed("1_0"));
        assert!(!loaded.is_processed("2_0"));
    }

    #[test]
    fn test_save_overwrites_wholesale() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut state = CheckpointState::default();
        state.mark_processed(["1_0".to_string()]);
        store.save(&state).unwrap();

        state.mark_processed(["1_1".to_string()]);
        state.last_batch = 1;
        store.save(&state).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.processed_count(), 2);
        assert_eq!(loaded.last_batch, 1);
        // No leftover temp file after the rename
        assert!(!dir.path().join("progress.json.tmp").exists());
    }

    #[test]
    fn test_save_creates_parent_dir() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested").join("progress.json"));
        store.save(&CheckpointState::default()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_reset_discards_state() {
        let dir = tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("progress.json"));

        let mut state = CheckpointState::default();
        state.mark_processed(["1_0".to_string()]);
        store.save(&state).unwrap();

        store.reset().unwrap();
        assert!(!store.path().exists());
        assert_eq!(store.load().unwrap(), CheckpointState::default());
        // Resetting twice is fine
        store.reset().unwrap();
    }
}
