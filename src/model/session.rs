//! Session record and derived-status computation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::Run;
use super::SessionId;

/// A durable conversation with one agent.
///
/// Invariants (enforced by the coordinator, not by this struct alone):
/// `last_seq` equals the highest `seq` in the session's event log;
/// `updated_at >= created_at`; `run` is present iff the log's latest run is
/// non-terminal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    /// Stable session identifier.
    pub id: SessionId,
    /// Which provider family this session talks to (`claude-cli`, `claude-ws`, `pty`, ...).
    pub provider_type: String,
    /// A specific provider instance id, if the caller pinned one.
    pub preferred_provider_id: Option<String>,
    /// Working directory the provider subprocess runs in.
    pub working_dir: String,
    /// Owning project, if any (opaque to this crate).
    pub project_id: Option<String>,
    /// Human-facing title.
    pub title: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub updated_at: DateTime<Utc>,
    /// Highest sequence number written to this session's event log.
    pub last_seq: u64,
    /// The session's active run, if its most recent run is non-terminal.
    pub run: Option<Run>,
}

impl Session {
    /// Creates a brand-new idle session.
    pub fn new(id: SessionId, provider_type: String, working_dir: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            provider_type,
            preferred_provider_id: None,
            working_dir,
            project_id: None,
            title,
            created_at: now,
            updated_at: now,
            last_seq: 0,
            run: None,
        }
    }

    /// Derives the session's status from its snapshot and the process's
    /// current boot id, per this precedence:
    /// `interrupted_startup > interrupted_waiting > waiting > running > idle`.
    pub fn derived_status(&self, current_boot_id: &str) -> DerivedStatus {
        let Some(run) = &self.run else {
            return DerivedStatus::Idle;
        };

        if run.boot_id != current_boot_id && run.ended_at.is_none() {
            return DerivedStatus::InterruptedStartup;
        }

        if let Some(wait) = &run.wait {
            if !wait.resume_token_valid || wait.deadline_passed() {
                return DerivedStatus::InterruptedWaiting;
            }
            return DerivedStatus::Waiting;
        }

        if run.ended_at.is_none() {
            return DerivedStatus::Running;
        }

        DerivedStatus::Idle
    }

    /// Maps a derived status onto the three-state session lifecycle.
    pub fn lifecycle(&self, current_boot_id: &str) -> SessionLifecycle {
        self.derived_status(current_boot_id).lifecycle()
    }
}

/// Status computed from snapshot + latest log events. Never persisted as
/// authoritative.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedStatus {
    /// A non-terminal run was started by a prior process instance.
    InterruptedStartup,
    /// A run is waiting, but its resume token is invalid/expired/missing.
    InterruptedWaiting,
    /// A run is waiting on a valid, active resume token.
    Waiting,
    /// A run is in flight with no terminal event yet.
    Running,
    /// No in-flight run.
    Idle,
}

impl DerivedStatus {
    /// Maps this status onto the three-state session lifecycle
    /// (`idle` / `running` / `suspended`).
    pub fn lifecycle(self) -> SessionLifecycle {
        match self {
            Self::Waiting | Self::InterruptedWaiting => SessionLifecycle::Suspended,
            Self::Running | Self::InterruptedStartup => SessionLifecycle::Running,
            Self::Idle => SessionLifecycle::Idle,
        }
    }
}

/// The three-state session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionLifecycle {
    /// No active run; ready to accept `send_message`.
    Idle,
    /// A run is actively streaming.
    Running,
    /// A run is waiting on an out-of-band response.
    Suspended,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::run::{Run, Wait, WaitKind};

    fn base_session() -> Session {
        Session::new(
            "s1".into(),
            "claude-cli".into(),
            "/tmp/work".into(),
            "Test session".into(),
        )
    }

    #[test]
    fn idle_with_no_run() {
        let session = base_session();
        assert_eq!(session.derived_status("boot-1"), DerivedStatus::Idle);
        assert_eq!(session.lifecycle("boot-1"), SessionLifecycle::Idle);
    }

    #[test]
    fn running_with_open_run_same_boot() {
        let mut session = base_session();
        session.run = Some(Run::start("r1".into(), "boot-1".into()));
        assert_eq!(session.derived_status("boot-1"), DerivedStatus::Running);
    }

    #[test]
    fn interrupted_startup_when_boot_differs_and_no_terminal_event() {
        let mut session = base_session();
        session.run = Some(Run::start("r1".into(), "boot-OLD".into()));
        assert_eq!(
            session.derived_status("boot-NEW"),
            DerivedStatus::InterruptedStartup
        );
        assert_eq!(session.lifecycle("boot-NEW"), SessionLifecycle::Running);
    }

    #[test]
    fn waiting_with_valid_token() {
        let mut run = Run::start("r1".into(), "boot-1".into());
        run.wait = Some(Wait {
            kind: WaitKind::ToolResult,
            since_seq: 3,
            resume_token_id: "rt_1".into(),
            deadline_at: Utc::now() + chrono::Duration::seconds(60),
            resume_token_valid: true,
        });
        let mut session = base_session();
        session.run = Some(run);
        assert_eq!(session.derived_status("boot-1"), DerivedStatus::Waiting);
        assert_eq!(session.lifecycle("boot-1"), SessionLifecycle::Suspended);
    }

    #[test]
    fn interrupted_waiting_when_token_invalid() {
        let mut run = Run::start("r1".into(), "boot-1".into());
        run.wait = Some(Wait {
            kind: WaitKind::ToolResult,
            since_seq: 3,
            resume_token_id: "rt_1".into(),
            deadline_at: Utc::now() + chrono::Duration::seconds(60),
            resume_token_valid: false,
        });
        let mut session = base_session();
        session.run = Some(run);
        assert_eq!(
            session.derived_status("boot-1"),
            DerivedStatus::InterruptedWaiting
        );
    }

    #[test]
    fn interrupted_waiting_when_deadline_passed() {
        let mut run = Run::start("r1".into(), "boot-1".into());
        run.wait = Some(Wait {
            kind: WaitKind::ToolResult,
            since_seq: 3,
            resume_token_id: "rt_1".into(),
            deadline_at: Utc::now() - chrono::Duration::seconds(1),
            resume_token_valid: true,
        });
        let mut session = base_session();
        session.run = Some(run);
        assert_eq!(
            session.derived_status("boot-1"),
            DerivedStatus::InterruptedWaiting
        );
    }

    #[test]
    fn idle_once_run_has_terminal_event() {
        let mut run = Run::start("r1".into(), "boot-1".into());
        run.ended_at = Some(Utc::now());
        let mut session = base_session();
        session.run = Some(run);
        assert_eq!(session.derived_status("boot-1"), DerivedStatus::Idle);
    }
}
