//! Run and wait records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RunId;

/// One subprocess lifecycle bound to a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    /// Stable run identifier, minted by the coordinator.
    pub run_id: RunId,
    /// Which process instance started this run.
    pub boot_id: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state, if it has.
    pub ended_at: Option<DateTime<Utc>>,
    /// Present only while the provider has yielded control awaiting an
    /// out-of-band response.
    pub wait: Option<Wait>,
}

impl Run {
    /// Starts a new run bound to the given boot id.
    pub fn start(run_id: RunId, boot_id: String) -> Self {
        Self {
            run_id,
            boot_id,
            started_at: Utc::now(),
            ended_at: None,
            wait: None,
        }
    }

    /// Whether this run has reached a terminal event.
    pub fn is_terminal(&self) -> bool {
        self.ended_at.is_some()
    }
}

/// A run's pause awaiting an out-of-band response, gated by a resume token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Wait {
    /// What kind of out-of-band response is awaited.
    pub kind: WaitKind,
    /// Sequence number at which the wait began.
    pub since_seq: u64,
    /// Resume token that authorizes completing this wait.
    pub resume_token_id: String,
    /// Deadline after which the wait is considered interrupted.
    pub deadline_at: DateTime<Utc>,
    /// Cached validity of `resume_token_id` as of the last status
    /// recomputation (the coordinator refreshes this from the token store;
    /// kept here so `derived_status` stays a pure function of the snapshot).
    pub resume_token_valid: bool,
}

impl Wait {
    /// Whether the wait's deadline has passed.
    pub fn deadline_passed(&self) -> bool {
        Utc::now() > self.deadline_at
    }
}

/// What the provider is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    /// Waiting for a tool invocation's result to be supplied out-of-band.
    ToolResult,
    /// Waiting for an arbitrary caller-supplied continuation payload.
    Continuation,
}
