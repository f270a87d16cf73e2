//! Activity entries produced by the PTY screen-diff extractor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured, revisable fact extracted from a terminal screen.
///
/// Invariant: two upserts sharing `id` differ only in `rev` (strictly
/// increasing) and `data`/`open` — `id`, `session_id`, and `kind` are fixed
/// at first emission.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Deterministic from `(rule_id, identity_key)` — see `activity::id_for`.
    pub id: String,
    /// Session this entry belongs to.
    pub session_id: String,
    /// The emitting rule's configured kind (e.g. `"file_edit"`, `"test_run"`).
    pub kind: String,
    /// When this revision was produced.
    pub ts: DateTime<Utc>,
    /// Per-entry monotonic revision, starting at 1.
    pub rev: u64,
    /// Whether this entry is still within the recent-open window and may be
    /// revised again.
    pub open: bool,
    /// Extracted payload (captured regex groups, or `{text}` for plain
    /// region extraction).
    pub data: Value,
}

impl ActivityEntry {
    /// Builds the first revision of an entry.
    pub fn first(id: String, session_id: String, kind: String, data: Value) -> Self {
        Self {
            id,
            session_id,
            kind,
            ts: Utc::now(),
            rev: 1,
            open: true,
            data,
        }
    }

    /// Produces the next revision, bumping `rev` and replacing `data`/`open`.
    pub fn revise(&self, data: Value, open: bool) -> Self {
        Self {
            rev: self.rev + 1,
            ts: Utc::now(),
            data,
            open,
            ..self.clone()
        }
    }
}
