//! Boot-time recovery sweep: reconciles every persisted session against a
//! freshly minted `boot_id`, closing out runs that can no longer make
//! progress.

use crate::config::Config;
use crate::error::Result;
use crate::model::event::RunOutcome;
use crate::model::{new_id, EventKind, Session};
use crate::storage::{EventLog, SessionSnapshot, TokenStore};

/// Tally of what the sweep did, for the `recover` CLI subcommand's output.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct RecoverySummary {
    /// Persisted sessions examined.
    pub sessions_scanned: usize,
    /// Runs interrupted because they belonged to a prior boot.
    pub interrupted_process_restart: usize,
    /// Waits interrupted because their deadline had passed.
    pub interrupted_wait_timeout: usize,
    /// Waits interrupted because their resume token was missing or invalid.
    pub interrupted_stale_token: usize,
}

/// Mints a fresh boot id and reconciles every persisted session against it.
///
/// For every snapshot with a non-terminal run that has no terminal event
/// yet:
/// - if the run belongs to a different boot, append
///   `run.interrupted{reason=process_restart}` then a terminal
///   `run.completed{outcome=interrupted}`;
/// - else if the run is waiting and its token is missing/invalid or its
///   deadline has passed, do the same with `reason=wait_timeout` or
///   `reason=stale_token`, and mark the token expired/revoked.
///
/// Every examined session gets a recomputed `status.derived` event,
/// whether or not it needed interrupting. Idempotent: relies on
/// [`EventLog::has_terminal_event`], the same mechanism the coordinator
/// uses to guarantee exactly one terminal event per run.
pub fn run_boot_sweep(config: &Config, boot_id: &str) -> Result<RecoverySummary> {
    let dir = config.sessions_dir()?;
    let mut summary = RecoverySummary::default();

    for id in SessionSnapshot::list_ids(&dir)? {
        let Some(mut session) = SessionSnapshot::load(&dir, &id)? else { continue };
        let Some(run) = session.run.clone() else { continue };
        if run.is_terminal() {
            continue;
        }
        summary.sessions_scanned += 1;

        let event_log = EventLog::open(&dir, &id)?;
        let token_store = TokenStore::open(&dir, &id)?;

        if event_log.has_terminal_event(&run.run_id)? {
            // Already closed out by a previous sweep or a live run driver
            // racing this one; just let derived status reflect reality.
            publish_derived_status(&event_log, &mut session, boot_id)?;
            SessionSnapshot::store(&dir, &session)?;
            continue;
        }

        if run.boot_id != boot_id {
            interrupt_run(&event_log, &run.run_id, "process_restart")?;
            session.run = None;
            summary.interrupted_process_restart += 1;
        } else if let Some(wait) = &run.wait {
            let token_active = token_store
                .get(&wait.resume_token_id)
                .is_some_and(|t| t.state == crate::model::TokenState::Active);

            if wait.deadline_passed() {
                token_store.expire(&wait.resume_token_id)?;
                interrupt_run(&event_log, &run.run_id, "wait_timeout")?;
                session.run = None;
                summary.interrupted_wait_timeout += 1;
            } else if !token_active {
                token_store.revoke(&wait.resume_token_id)?;
                interrupt_run(&event_log, &run.run_id, "stale_token")?;
                session.run = None;
                summary.interrupted_stale_token += 1;
            }
        }

        publish_derived_status(&event_log, &mut session, boot_id)?;
        SessionSnapshot::store(&dir, &session)?;
    }

    Ok(summary)
}

fn interrupt_run(event_log: &EventLog, run_id: &str, reason: &str) -> Result<()> {
    event_log.append(EventKind::RunInterrupted {
        run_id: run_id.to_string(),
        reason: reason.to_string(),
    })?;
    event_log.append(EventKind::RunCompleted {
        run_id: run_id.to_string(),
        outcome: RunOutcome::Interrupted,
    })?;
    Ok(())
}

fn publish_derived_status(event_log: &EventLog, session: &mut Session, boot_id: &str) -> Result<()> {
    let status = session.derived_status(boot_id);
    session.updated_at = chrono::Utc::now();
    event_log.append(EventKind::StatusDerived { status })?;
    session.last_seq = event_log.last_seq();
    Ok(())
}

/// Mints a fresh boot id for this process instance.
pub fn mint_boot_id() -> String {
    new_id("boot")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::run::{Run, Wait, WaitKind};
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.base_dir = dir.path().to_path_buf();
        config
    }

    #[test]
    fn stale_run_from_prior_boot_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let sessions_dir = config.sessions_dir().unwrap();

        let mut session = Session::new("s1".into(), "claude-cli".into(), "/tmp".into(), "t".into());
        session.run = Some(Run::start("r1".into(), "boot-OLD".into()));
        SessionSnapshot::store(&sessions_dir, &session).unwrap();

        let summary = run_boot_sweep(&config, "boot-NEW").unwrap();
        assert_eq!(summary.interrupted_process_restart, 1);

        let log = EventLog::open(&sessions_dir, "s1").unwrap();
        assert!(log.has_terminal_event("r1").unwrap());
        let events = log.read_all().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(&e.kind, EventKind::RunInterrupted { reason, .. } if reason == "process_restart")));

        let reloaded = SessionSnapshot::load(&sessions_dir, "s1").unwrap().unwrap();
        assert!(reloaded.run.is_none());
    }

    #[test]
    fn expired_wait_is_interrupted_as_wait_timeout() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let sessions_dir = config.sessions_dir().unwrap();

        let token_store = TokenStore::open(&sessions_dir, "s1").unwrap();
        let (token, _secret) = crate::model::ResumeToken::mint(
            "rt_1".into(),
            "s1".into(),
            "r1".into(),
            "tool_result".into(),
            chrono::Duration::seconds(60),
        );
        token_store.insert(token).unwrap();

        let mut run = Run::start("r1".into(), "boot-1".into());
        run.wait = Some(Wait {
            kind: WaitKind::ToolResult,
            since_seq: 1,
            resume_token_id: "rt_1".into(),
            deadline_at: chrono::Utc::now() - chrono::Duration::seconds(1),
            resume_token_valid: true,
        });
        let mut session = Session::new("s1".into(), "claude-cli".into(), "/tmp".into(), "t".into());
        session.run = Some(run);
        SessionSnapshot::store(&sessions_dir, &session).unwrap();

        let summary = run_boot_sweep(&config, "boot-1").unwrap();
        assert_eq!(summary.interrupted_wait_timeout, 1);

        let reloaded = SessionSnapshot::load(&sessions_dir, "s1").unwrap().unwrap();
        assert!(reloaded.run.is_none());

        let token = token_store.get("rt_1").unwrap();
        assert_eq!(token.state, crate::model::TokenState::Expired);
    }

    #[test]
    fn missing_token_is_interrupted_as_stale_token() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let sessions_dir = config.sessions_dir().unwrap();

        let mut run = Run::start("r1".into(), "boot-1".into());
        run.wait = Some(Wait {
            kind: WaitKind::ToolResult,
            since_seq: 1,
            resume_token_id: "rt_missing".into(),
            deadline_at: chrono::Utc::now() + chrono::Duration::seconds(60),
            resume_token_valid: true,
        });
        let mut session = Session::new("s1".into(), "claude-cli".into(), "/tmp".into(), "t".into());
        session.run = Some(run);
        SessionSnapshot::store(&sessions_dir, &session).unwrap();

        let summary = run_boot_sweep(&config, "boot-1").unwrap();
        assert_eq!(summary.interrupted_stale_token, 1);
    }

    #[test]
    fn sweep_is_idempotent_across_repeated_runs() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let sessions_dir = config.sessions_dir().unwrap();

        let mut session = Session::new("s1".into(), "claude-cli".into(), "/tmp".into(), "t".into());
        session.run = Some(Run::start("r1".into(), "boot-OLD".into()));
        SessionSnapshot::store(&sessions_dir, &session).unwrap();

        run_boot_sweep(&config, "boot-NEW").unwrap();
        run_boot_sweep(&config, "boot-NEWER").unwrap();

        let log = EventLog::open(&sessions_dir, "s1").unwrap();
        let interrupted_count = log
            .read_all()
            .unwrap()
            .iter()
            .filter(|e| matches!(&e.kind, EventKind::RunInterrupted { .. }))
            .count();
        assert_eq!(interrupted_count, 1);
    }

    #[test]
    fn healthy_running_session_is_left_alone_but_gets_status_event() {
        let dir = TempDir::new().unwrap();
        let config = config_for(&dir);
        let sessions_dir = config.sessions_dir().unwrap();

        let mut session = Session::new("s1".into(), "claude-cli".into(), "/tmp".into(), "t".into());
        session.run = Some(Run::start("r1".into(), "boot-1".into()));
        SessionSnapshot::store(&sessions_dir, &session).unwrap();

        let summary = run_boot_sweep(&config, "boot-1").unwrap();
        assert_eq!(summary.interrupted_process_restart, 0);
        assert_eq!(summary.interrupted_wait_timeout, 0);

        let reloaded = SessionSnapshot::load(&sessions_dir, "s1").unwrap().unwrap();
        assert!(reloaded.run.is_some());

        let log = EventLog::open(&sessions_dir, "s1").unwrap();
        assert!(log
            .read_all()
            .unwrap()
            .iter()
            .any(|e| matches!(&e.kind, EventKind::StatusDerived { .. })));
    }
}
