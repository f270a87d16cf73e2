//! Append-only JSONL event log, one file per session.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{OrbitMeshError, Result};
use crate::model::{Event, EventKind};

/// The append-only log of domain events for a single session.
///
/// The writer guarantees sequence monotonicity by holding a mutex around
/// `(read last_seq -> format line -> append)`; readers tail the file
/// directly and never contend with the writer beyond normal OS file
/// locking.
pub struct EventLog {
    path: PathBuf,
    writer: Mutex<AppendState>,
}

struct AppendState {
    file: File,
    last_seq: u64,
}

impl EventLog {
    /// Opens (creating if absent) the log file for `session_id` under `dir`.
    pub fn open(dir: &Path, session_id: &str) -> Result<Self> {
        let path = dir.join(format!("{session_id}.messages.jsonl"));
        let last_seq = Self::scan_last_seq(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(AppendState { file, last_seq }),
        })
    }

    fn scan_last_seq(path: &Path) -> Result<u64> {
        if !path.exists() {
            return Ok(0);
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut last_seq = 0;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .map_err(|e| OrbitMeshError::Parse(format!("corrupt log line: {e}")))?;
            last_seq = event.seq;
        }
        Ok(last_seq)
    }

    /// Appends `kind` as the next sequence number, `fsync`ing when the kind
    /// is a run-terminal event so a crash immediately after never loses it.
    pub fn append(&self, kind: EventKind) -> Result<Event> {
        self.append_raw(kind, None)
    }

    /// Appends `kind` with the original wire line attached as `raw`.
    pub fn append_raw(&self, kind: EventKind, raw: Option<String>) -> Result<Event> {
        let mut state = self.writer.lock().expect("event log mutex poisoned");
        let seq = state.last_seq + 1;
        let fsync = is_terminal_kind(&kind);
        let mut event = Event::new(seq, kind);
        event.raw = raw;

        let mut line = serde_json::to_string(&event)
            .map_err(|e| OrbitMeshError::Parse(format!("failed to encode event: {e}")))?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        if fsync {
            state.file.sync_all()?;
        }
        state.last_seq = seq;
        Ok(event)
    }

    /// The highest sequence number written so far.
    pub fn last_seq(&self) -> u64 {
        self.writer.lock().expect("event log mutex poisoned").last_seq
    }

    /// Reads every event currently in the log, in order.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .map_err(|e| OrbitMeshError::Parse(format!("corrupt log line: {e}")))?;
            events.push(event);
        }
        Ok(events)
    }

    /// Whether the given `run_id` already has a terminal event recorded,
    /// used to enforce terminal-event idempotency.
    pub fn has_terminal_event(&self, run_id: &str) -> Result<bool> {
        Ok(self.read_all()?.iter().any(|e| match &e.kind {
            EventKind::RunCompleted { run_id: r, .. } => r == run_id,
            _ => false,
        }))
    }
}

fn is_terminal_kind(kind: &EventKind) -> bool {
    matches!(kind, EventKind::RunCompleted { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_assigns_monotonic_sequence() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path(), "s1").unwrap();
        let e1 = log
            .append(EventKind::MessageUser { content: "hi".into() })
            .unwrap();
        let e2 = log
            .append(EventKind::MessageUser { content: "there".into() })
            .unwrap();
        assert_eq!(e1.seq, 1);
        assert_eq!(e2.seq, 2);
        assert_eq!(log.last_seq(), 2);
    }

    #[test]
    fn reopening_resumes_from_last_seq() {
        let dir = TempDir::new().unwrap();
        {
            let log = EventLog::open(dir.path(), "s1").unwrap();
            log.append(EventKind::MessageUser { content: "hi".into() })
                .unwrap();
        }
        let log = EventLog::open(dir.path(), "s1").unwrap();
        assert_eq!(log.last_seq(), 1);
        let event = log
            .append(EventKind::MessageUser { content: "again".into() })
            .unwrap();
        assert_eq!(event.seq, 2);
    }

    #[test]
    fn corrupt_line_surfaces_as_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s1.messages.jsonl");
        std::fs::write(&path, "not json\n").unwrap();
        let result = EventLog::open(dir.path(), "s1");
        assert!(result.is_err());
    }

    #[test]
    fn terminal_event_idempotency_check() {
        let dir = TempDir::new().unwrap();
        let log = EventLog::open(dir.path(), "s1").unwrap();
        assert!(!log.has_terminal_event("r1").unwrap());
        log.append(EventKind::RunCompleted {
            run_id: "r1".into(),
            outcome: crate::model::event::RunOutcome::Completed,
        })
        .unwrap();
        assert!(log.has_terminal_event("r1").unwrap());
    }
}
