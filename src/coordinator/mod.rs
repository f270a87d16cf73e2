//! Session coordinator: owns the session map, is the single writer to each
//! session's persisted state, and drives runs from start through exactly
//! one terminal event.

pub mod recovery;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::constants::{PTY_DEFAULT_COLS, PTY_DEFAULT_ROWS, STOP_GRACE_PERIOD};
use crate::error::{OrbitMeshError, Result};
use crate::model::event::RunOutcome;
use crate::model::run::Run;
use crate::model::{new_id, Event, EventKind, ResumeToken, Session, SessionId};
use crate::provider::{PtyAdapter, ProviderAdapter, ProviderInput, StdioJsonAdapter, WebSocketAdapter};
use crate::storage::{EventLog, FrameLog, SessionSnapshot, TokenStore};

/// Runtime state for one session beyond what lives in its persisted files.
struct SessionEntry {
    event_log: Arc<EventLog>,
    token_store: Arc<TokenStore>,
    events: Arc<Broadcaster<Event>>,
    /// Serializes `send_message`/`cancel`/`resume`/`suspend` on this session.
    lock: AsyncMutex<()>,
    active: AsyncMutex<Option<ActiveRun>>,
}

struct ActiveRun {
    run_id: String,
    adapter: Arc<dyn ProviderAdapter>,
    cancel: CancellationToken,
    cancelled: Arc<AtomicBool>,
}

/// Owns every live session's runtime state. `send_message`/`cancel`/
/// `resume`/`suspend` are the only mutating entry points; everything else
/// routes through a session's single writer lock.
pub struct SessionCoordinator {
    config: Arc<Config>,
    boot_id: String,
    sessions: RwLock<HashMap<SessionId, Arc<SessionEntry>>>,
    /// Broadcasts the full session record whenever it changes, for the
    /// realtime hub's `sessions.state` topic. `Arc`-wrapped so spawned run
    /// driver tasks can publish without borrowing the coordinator.
    state_changes: Arc<Broadcaster<Session>>,
    root_cancel: CancellationToken,
}

impl SessionCoordinator {
    /// Builds a coordinator for one process instance, minting `boot_id`
    /// fresh at construction (callers should run [`recovery::run_boot_sweep`]
    /// before accepting traffic).
    pub fn new(config: Arc<Config>, boot_id: String) -> Self {
        Self {
            config,
            boot_id,
            sessions: RwLock::new(HashMap::new()),
            state_changes: Arc::new(Broadcaster::new()),
            root_cancel: CancellationToken::new(),
        }
    }

    /// This process instance's boot id.
    pub fn boot_id(&self) -> &str {
        &self.boot_id
    }

    /// Subscribes to every session-record change, for the hub's
    /// `sessions.state` topic.
    pub fn subscribe_state_changes(&self, buffer: usize) -> tokio::sync::mpsc::Receiver<Session> {
        self.state_changes.subscribe(buffer)
    }

    /// Subscribes to one session's domain event stream, for the hub's
    /// `sessions.activity:<id>` topic and the SSE endpoint.
    pub async fn subscribe_session_events(
        &self,
        session_id: &str,
    ) -> Result<tokio::sync::mpsc::Receiver<Event>> {
        let entry = self.entry_for(session_id).await?;
        Ok(entry.events.subscribe(0))
    }

    /// Creates a brand-new idle session.
    pub async fn create_session(
        &self,
        provider_type: String,
        working_dir: String,
        title: String,
    ) -> Result<Session> {
        let id = new_id("sess");
        let session = Session::new(id.clone(), provider_type, working_dir, title);
        self.persist(&session)?;
        self.entry_for(&id).await?;
        Ok(session)
    }

    /// Loads a session's current snapshot.
    pub fn get_session(&self, id: &str) -> Result<Session> {
        SessionSnapshot::load(&self.config.sessions_dir()?, id)?
            .ok_or_else(|| OrbitMeshError::SessionNotFound(id.to_string()))
    }

    /// Reads a session's full event log, for the HTTP surface's paginated
    /// messages endpoint.
    pub fn read_events(&self, session_id: &str) -> Result<Vec<Event>> {
        self.get_session(session_id)?;
        let dir = self.config.sessions_dir()?;
        EventLog::open(&dir, session_id)?.read_all()
    }

    /// Lists every persisted session.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let dir = self.config.sessions_dir()?;
        let mut sessions = Vec::new();
        for id in SessionSnapshot::list_ids(&dir)? {
            if let Some(session) = SessionSnapshot::load(&dir, &id)? {
                sessions.push(session);
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    /// Deletes a session durably: drops its runtime state and every
    /// persisted file.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        if let Some(entry) = self.sessions.write().await.remove(id) {
            if let Some(active) = entry.active.lock().await.take() {
                active.cancel.cancel();
            }
            entry.events.close();
        }
        let dir = self.config.sessions_dir()?;
        for suffix in [".json", ".messages.jsonl", ".tokens.json", ".extractor.json", ".frames.bin"] {
            let _ = std::fs::remove_file(dir.join(format!("{id}{suffix}")));
        }
        let _ = std::fs::remove_dir_all(dir.join(id));
        Ok(())
    }

    /// Idle → starts a new run. Running → enqueues into the active run.
    pub async fn send_message(
        &self,
        session_id: &str,
        text: String,
        provider_override: Option<String>,
    ) -> Result<()> {
        let entry = self.entry_for(session_id).await?;
        let _guard = entry.lock.lock().await;

        let mut active = entry.active.lock().await;
        if let Some(active_run) = active.as_ref() {
            active_run
                .adapter
                .send_input(ProviderInput::Text(text))
                .await?;
            return Ok(());
        }

        let mut session = self.get_session(session_id)?;
        let provider_type = provider_override.unwrap_or_else(|| session.provider_type.clone());
        let run_id = new_id("run");

        entry.event_log.append(EventKind::RunStarted { run_id: run_id.clone() })?;
        session.run = Some(Run::start(run_id.clone(), self.boot_id.clone()));
        session.last_seq = entry.event_log.last_seq();
        self.persist(&session)?;

        let adapter = self.build_adapter(&provider_type, &session)?;
        let receiver = adapter.send_input(ProviderInput::Text(text)).await?;

        let cancel = self.root_cancel.child_token();
        let cancelled = Arc::new(AtomicBool::new(false));
        *active = Some(ActiveRun {
            run_id: run_id.clone(),
            adapter: adapter.clone(),
            cancel: cancel.clone(),
            cancelled: cancelled.clone(),
        });
        drop(active);

        self.spawn_run_driver(session_id.to_string(), run_id, entry.clone(), receiver, cancel, cancelled);
        Ok(())
    }

    /// Cancels the active run, if any. The session returns to idle
    /// immediately; the subprocess is given [`STOP_GRACE_PERIOD`] to exit
    /// before being killed.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let entry = self.entry_for(session_id).await?;
        let _guard = entry.lock.lock().await;

        let active = entry.active.lock().await;
        let Some(active_run) = active.as_ref() else {
            return Err(OrbitMeshError::RunNotActive(session_id.to_string()));
        };
        active_run.cancelled.store(true, Ordering::SeqCst);
        let adapter = active_run.adapter.clone();
        let cancel = active_run.cancel.clone();
        drop(active);

        adapter.stop().await?;
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE_PERIOD).await;
            if !cancel.is_cancelled() {
                let _ = adapter.kill().await;
            }
        });
        Ok(())
    }

    /// Validates and consumes a resume token, then forwards `payload` to
    /// the waiting run.
    pub async fn resume(&self, session_id: &str, token_id: &str, secret: &str, payload: String) -> Result<()> {
        let entry = self.entry_for(session_id).await?;
        let _guard = entry.lock.lock().await;

        let token = entry.token_store.consume(token_id, secret)?;
        let active = entry.active.lock().await;
        let Some(active_run) = active.as_ref() else {
            return Err(OrbitMeshError::RunNotActive(session_id.to_string()));
        };
        let adapter = active_run.adapter.clone();
        let run_id = active_run.run_id.clone();
        drop(active);

        entry.event_log.append(EventKind::RunResumed { run_id })?;
        let mut session = self.get_session(session_id)?;
        if let Some(run) = session.run.as_mut() {
            run.wait = None;
        }
        session.last_seq = entry.event_log.last_seq();
        self.persist(&session)?;

        adapter.send_input(ProviderInput::Text(payload)).await?;
        let _ = token.token_id;
        Ok(())
    }

    /// Captures provider-specific suspension state for durable restart.
    pub async fn suspend(&self, session_id: &str) -> Result<serde_json::Value> {
        let entry = self.entry_for(session_id).await?;
        let active = entry.active.lock().await;
        let Some(active_run) = active.as_ref() else {
            return Err(OrbitMeshError::RunNotActive(session_id.to_string()));
        };
        active_run.adapter.suspend().await
    }

    fn build_adapter(
        &self,
        provider_type: &str,
        session: &Session,
    ) -> Result<Arc<dyn ProviderAdapter>> {
        let breaker = crate::circuit_breaker::CircuitBreaker::new(
            self.config.circuit_breaker_threshold,
            self.config.circuit_breaker_cooldown,
        );
        match provider_type {
            "claude-ws" => Ok(Arc::new(WebSocketAdapter::new(
                provider_type.to_string(),
                session.working_dir.clone(),
                &self.config,
                None,
            ))),
            "pty" => {
                let frame_log = Arc::new(FrameLog::open(
                    &self.config.sessions_dir()?,
                    &session.id,
                    self.config.frame_log_max_frame_bytes,
                )?);
                let (cols, rows) = (PTY_DEFAULT_COLS, PTY_DEFAULT_ROWS);
                let args = Vec::new();
                let profile = crate::activity::rules::load_matching_profile(
                    &self.config.extractors_dir()?,
                    provider_type,
                    &args,
                )?;
                let extractor = profile.map(|profile| {
                    crate::activity::Extractor::new(profile, cols, rows, self.config.open_window_size)
                });
                Ok(Arc::new(PtyAdapter::new(
                    provider_type.to_string(),
                    args,
                    session.working_dir.clone(),
                    session.id.clone(),
                    &self.config,
                    frame_log,
                    extractor,
                    cols,
                    rows,
                )))
            }
            _ => Ok(Arc::new(StdioJsonAdapter::new(
                provider_type.to_string(),
                session.working_dir.clone(),
                breaker,
            ))),
        }
    }

    fn spawn_run_driver(
        &self,
        session_id: SessionId,
        run_id: String,
        entry: Arc<SessionEntry>,
        mut receiver: tokio::sync::mpsc::Receiver<EventKind>,
        cancel: CancellationToken,
        cancelled: Arc<AtomicBool>,
    ) {
        let config = self.config.clone();
        let boot_id = self.boot_id.clone();
        let state_changes_handle = self.clone_state_sink();

        tokio::spawn(async move {
            let mut saw_error = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => {
                        match event {
                            Some(kind) => {
                                if matches!(kind, EventKind::Error { .. }) {
                                    saw_error = true;
                                }
                                if let Ok(event) = entry.event_log.append(kind) {
                                    entry.events.broadcast(event);
                                }
                            }
                            None => break,
                        }
                    }
                }
            }

            // The provider's event stream is closed (or we were told to stop
            // externally) by the time we get here; tell anyone waiting on
            // this run's grace-period kill that it no longer needs to fire.
            cancel.cancel();

            let outcome = if cancelled.load(Ordering::SeqCst) {
                RunOutcome::Cancelled
            } else if saw_error {
                RunOutcome::Failed
            } else {
                RunOutcome::Completed
            };

            if !entry.event_log.has_terminal_event(&run_id).unwrap_or(false) {
                if let Ok(event) = entry.event_log.append(EventKind::RunCompleted {
                    run_id: run_id.clone(),
                    outcome,
                }) {
                    entry.events.broadcast(event);
                }
            }

            *entry.active.lock().await = None;

            if let Ok(dir) = config.sessions_dir() {
                if let Ok(Some(mut session)) = SessionSnapshot::load(&dir, &session_id) {
                    if let Some(run) = session.run.as_mut() {
                        if run.run_id == run_id {
                            run.ended_at = Some(chrono::Utc::now());
                        }
                    }
                    session.run = None;
                    session.updated_at = chrono::Utc::now();
                    session.last_seq = entry.event_log.last_seq();
                    if SessionSnapshot::store(&dir, &session).is_ok() {
                        state_changes_handle.broadcast(session);
                    }
                }
            }
            let _ = boot_id;
        });
    }

    /// Returns a cheap handle for broadcasting state changes from spawned
    /// tasks without holding a reference to the coordinator itself.
    fn clone_state_sink(&self) -> Arc<Broadcaster<Session>> {
        self.state_changes.clone()
    }

    async fn entry_for(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            return Ok(entry.clone());
        }
        let dir = self.config.sessions_dir()?;
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(session_id) {
            return Ok(entry.clone());
        }
        let entry = Arc::new(SessionEntry {
            event_log: Arc::new(EventLog::open(&dir, session_id)?),
            token_store: Arc::new(TokenStore::open(&dir, session_id)?),
            events: Arc::new(Broadcaster::new()),
            lock: AsyncMutex::new(()),
            active: AsyncMutex::new(None),
        });
        sessions.insert(session_id.to_string(), entry.clone());
        Ok(entry)
    }

    fn persist(&self, session: &Session) -> Result<()> {
        SessionSnapshot::store(&self.config.sessions_dir()?, session)?;
        self.state_changes.broadcast(session.clone());
        Ok(())
    }

    /// Mints a resume token for `session_id`'s active run and records the
    /// corresponding `run.waiting` event.
    pub async fn begin_wait(
        &self,
        session_id: &str,
        kind: crate::model::run::WaitKind,
        scope: String,
        ttl: chrono::Duration,
    ) -> Result<String> {
        let entry = self.entry_for(session_id).await?;
        let run_id = {
            let active = entry.active.lock().await;
            active
                .as_ref()
                .map(|a| a.run_id.clone())
                .ok_or_else(|| OrbitMeshError::RunNotActive(session_id.to_string()))?
        };

        let token_id = new_id("rt");
        let (token, secret) =
            ResumeToken::mint(token_id.clone(), session_id.to_string(), run_id.clone(), scope, ttl);
        entry.token_store.insert(token)?;

        let event = entry.event_log.append(EventKind::RunWaiting {
            run_id: run_id.clone(),
            resume_token_id: token_id.clone(),
        })?;
        entry.events.broadcast(event);

        let mut session = self.get_session(session_id)?;
        session.last_seq = entry.event_log.last_seq();
        if let Some(run) = session.run.as_mut() {
            run.wait = Some(crate::model::run::Wait {
                kind,
                since_seq: session.last_seq,
                resume_token_id: token_id.clone(),
                deadline_at: chrono::Utc::now() + ttl,
                resume_token_valid: true,
            });
        }
        self.persist(&session)?;

        Ok(secret)
    }
}
