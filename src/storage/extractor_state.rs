//! Persisted state for the PTY activity extractor: revisions, the open
//! window, and the last frame-log offset processed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OrbitMeshError, Result};

use super::atomic_write;

/// `sessions/<id>.extractor.json` contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExtractorState {
    /// Last revision emitted per entry id.
    pub last_rev: HashMap<String, u64>,
    /// Entry ids currently inside the recent-open window, in insertion order.
    pub open_entries: Vec<String>,
    /// Frame-log byte offset up to which this state already reflects.
    pub last_offset: u64,
}

impl ExtractorState {
    fn path(dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{session_id}.extractor.json"))
    }

    /// Loads persisted state, or a fresh default if none exists yet.
    pub fn load(dir: &Path, session_id: &str) -> Result<Self> {
        let path = Self::path(dir, session_id);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)?;
        serde_json::from_str(&contents)
            .map_err(|e| OrbitMeshError::Parse(format!("corrupt extractor state: {e}")))
    }

    /// Persists this state atomically.
    pub fn store(&self, dir: &Path, session_id: &str) -> Result<()> {
        let path = Self::path(dir, session_id);
        let contents = serde_json::to_vec_pretty(self)
            .map_err(|e| OrbitMeshError::Parse(format!("failed to encode extractor state: {e}")))?;
        atomic_write(&path, &contents)?;
        Ok(())
    }

    /// Records a new revision for `entry_id`, marking it open and pushing it
    /// to the back of the open-window insertion order. Returns any entry id
    /// evicted because the window overflowed past `capacity`.
    pub fn record_open(&mut self, entry_id: &str, rev: u64, capacity: usize) -> Option<String> {
        self.last_rev.insert(entry_id.to_string(), rev);
        self.open_entries.retain(|id| id != entry_id);
        self.open_entries.push(entry_id.to_string());

        if self.open_entries.len() > capacity {
            Some(self.open_entries.remove(0))
        } else {
            None
        }
    }

    /// Records a revision for an entry finalized outright (not tracked in
    /// the open window).
    pub fn record_finalized(&mut self, entry_id: &str, rev: u64) {
        self.last_rev.insert(entry_id.to_string(), rev);
        self.open_entries.retain(|id| id != entry_id);
    }

    /// Whether `entry_id` is currently inside the open window.
    pub fn is_open(&self, entry_id: &str) -> bool {
        self.open_entries.iter().any(|id| id == entry_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn overflowing_open_window_evicts_oldest() {
        let mut state = ExtractorState::default();
        for i in 0..8 {
            assert!(state.record_open(&format!("act_{i}"), 1, 8).is_none());
        }
        let evicted = state.record_open("act_8", 1, 8);
        assert_eq!(evicted, Some("act_0".to_string()));
        assert!(!state.is_open("act_0"));
        assert!(state.is_open("act_8"));
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut state = ExtractorState::default();
        state.record_open("act_1", 3, 8);
        state.last_offset = 128;
        state.store(dir.path(), "s1").unwrap();

        let loaded = ExtractorState::load(dir.path(), "s1").unwrap();
        assert_eq!(loaded.last_offset, 128);
        assert_eq!(loaded.last_rev.get("act_1"), Some(&3));
    }

    #[test]
    fn missing_state_is_fresh_default() {
        let dir = TempDir::new().unwrap();
        let state = ExtractorState::load(dir.path(), "s1").unwrap();
        assert!(state.open_entries.is_empty());
        assert_eq!(state.last_offset, 0);
    }
}
