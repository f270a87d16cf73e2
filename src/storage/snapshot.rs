//! Session snapshot store: `sessions/<id>.json`.

use std::path::{Path, PathBuf};

use crate::error::{OrbitMeshError, Result};
use crate::model::Session;

use super::atomic_write;

/// Loads and atomically persists a single session's snapshot file.
pub struct SessionSnapshot;

impl SessionSnapshot {
    fn path(dir: &Path, session_id: &str) -> PathBuf {
        dir.join(format!("{session_id}.json"))
    }

    /// Loads the snapshot for `session_id`, returning `Ok(None)` if no
    /// snapshot file exists (the session is new).
    pub fn load(dir: &Path, session_id: &str) -> Result<Option<Session>> {
        let path = Self::path(dir, session_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let session = serde_json::from_str(&contents)
            .map_err(|e| OrbitMeshError::Parse(format!("corrupt snapshot {}: {e}", path.display())))?;
        Ok(Some(session))
    }

    /// Writes `session`'s snapshot atomically (temp file + rename).
    pub fn store(dir: &Path, session: &Session) -> Result<()> {
        let path = Self::path(dir, &session.id);
        let contents = serde_json::to_vec_pretty(session)
            .map_err(|e| OrbitMeshError::Parse(format!("failed to encode snapshot: {e}")))?;
        atomic_write(&path, &contents)?;
        Ok(())
    }

    /// Lists every session id with a persisted snapshot, for the boot-time
    /// recovery sweep.
    pub fn list_ids(dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !dir.exists() {
            return Ok(ids);
        }
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> Session {
        Session::new(
            "s1".into(),
            "claude-cli".into(),
            "/tmp/work".into(),
            "Test".into(),
        )
    }

    #[test]
    fn missing_snapshot_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(SessionSnapshot::load(dir.path(), "s1").unwrap().is_none());
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let session = sample_session();
        SessionSnapshot::store(dir.path(), &session).unwrap();
        let loaded = SessionSnapshot::load(dir.path(), "s1").unwrap().unwrap();
        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.title, session.title);
    }

    #[test]
    fn corrupt_snapshot_is_an_error_not_silent_truncation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("s1.json"), b"{not json").unwrap();
        assert!(SessionSnapshot::load(dir.path(), "s1").is_err());
    }

    #[test]
    fn list_ids_finds_every_snapshot() {
        let dir = TempDir::new().unwrap();
        SessionSnapshot::store(dir.path(), &sample_session()).unwrap();
        let mut other = sample_session();
        other.id = "s2".into();
        SessionSnapshot::store(dir.path(), &other).unwrap();

        let mut ids = SessionSnapshot::list_ids(dir.path()).unwrap();
        ids.sort();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
    }
}
