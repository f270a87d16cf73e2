//! PTY adapter: launches the agent under a pseudo-terminal, tees raw
//! output into the frame log, and feeds a terminal emulator plus optional
//! activity extractor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::activity::Extractor;
use crate::config::Config;
use crate::error::{OrbitMeshError, Result};
use crate::model::terminal::DiffReason;
use crate::model::EventKind;
use crate::storage::frame_log::{FrameDirection, FrameLog};
use crate::terminal::{AlacrittyEmulator, TerminalEvent, TerminalFacade};

use super::common::{ProviderAdapter, ProviderInput, ProviderStatus, SuspensionState};

/// PTY provider adapter. Unlike the stdio and WebSocket adapters, this one
/// owns a terminal emulator and (optionally) an activity extractor rather
/// than just translating wire events.
pub struct PtyAdapter {
    command: String,
    args: Vec<String>,
    working_dir: String,
    frame_log: Arc<FrameLog>,
    emulator: Arc<AlacrittyEmulator>,
    extractor: Option<Mutex<Extractor>>,
    session_id: String,
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    child: Mutex<Option<Box<dyn Child + Send + Sync>>>,
    writer: Mutex<Option<Box<dyn std::io::Write + Send>>>,
    started: AtomicBool,
}

impl PtyAdapter {
    /// Builds a PTY adapter. `extractor` is `Some` when a rules profile
    /// matched this command line.
    pub fn new(
        command: String,
        args: Vec<String>,
        working_dir: String,
        session_id: String,
        config: &Config,
        frame_log: Arc<FrameLog>,
        extractor: Option<Extractor>,
        cols: u16,
        rows: u16,
    ) -> Self {
        Self {
            command,
            args,
            working_dir,
            frame_log,
            emulator: Arc::new(AlacrittyEmulator::new(cols, rows, config.pty_debounce_interval)),
            extractor: extractor.map(Mutex::new),
            session_id,
            master: Mutex::new(None),
            child: Mutex::new(None),
            writer: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    /// Subscribes to raw terminal events (bell, region changes, scroll,
    /// cursor moves), independent of the activity extractor's derived
    /// entries.
    pub fn subscribe_terminal_events(&self, buffer: usize) -> mpsc::Receiver<TerminalEvent> {
        self.emulator.subscribe(buffer)
    }

    fn spawn(&self) -> Result<mpsc::Receiver<EventKind>> {
        let pty_system = native_pty_system();
        let (cols, rows) = self.emulator.size();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| OrbitMeshError::Subprocess(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(&self.command);
        cmd.args(&self.args);
        cmd.cwd(&self.working_dir);

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| OrbitMeshError::Subprocess(format!("failed to spawn {}: {e}", self.command)))?;
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| OrbitMeshError::Subprocess(format!("failed to clone pty reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| OrbitMeshError::Subprocess(format!("failed to take pty writer: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let emulator = self.emulator.clone();
        let frame_log = self.frame_log.clone();

        let mut terminal_events = self.emulator.subscribe(64);
        let output_tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = terminal_events.recv().await {
                if let TerminalEvent::RegionChanged(diff) = event {
                    if output_tx.send(EventKind::Output { diff }).await.is_err() {
                        break;
                    }
                }
            }
        });

        std::thread::spawn(move || {
            let mut buf = [0u8; 8192];
            loop {
                let n = match std::io::Read::read(&mut reader, &mut buf) {
                    Ok(0) => return,
                    Ok(n) => n,
                    Err(e) => {
                        log::warn!("pty read error: {e}");
                        return;
                    }
                };
                let chunk = &buf[..n];
                if let Err(e) = frame_log.append(FrameDirection::Output, chunk) {
                    log::warn!("failed to append pty frame: {e}");
                }
                if emulator.write(chunk).is_err() {
                    return;
                }
                let _ = event_tx.blocking_send(EventKind::Metadata {
                    data: serde_json::json!({"pty_bytes": n}),
                });
            }
        });

        *self.master.lock().expect("adapter mutex poisoned") = Some(pair.master);
        *self.child.lock().expect("adapter mutex poisoned") = Some(child);
        *self.writer.lock().expect("adapter mutex poisoned") = Some(writer);
        self.started.store(true, Ordering::SeqCst);

        Ok(event_rx)
    }

    /// Feeds a full-screen refresh through the activity extractor, if one
    /// is hosted, returning its activity outputs.
    pub fn extract_activity(&self) -> Vec<crate::activity::ActivityOutput> {
        let Some(extractor) = &self.extractor else { return Vec::new() };
        let mut lines = Vec::new();
        self.emulator.with_lock(&mut |screen| lines = screen.to_vec());
        let mut extractor = extractor.lock().expect("extractor mutex poisoned");
        extractor.apply_snapshot(lines, &self.session_id)
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.frame_log.append(FrameDirection::Input, bytes)?;
        let mut guard = self.writer.lock().expect("adapter mutex poisoned");
        let writer = guard
            .as_mut()
            .ok_or_else(|| OrbitMeshError::Subprocess("adapter not started".into()))?;
        writer.write_all(bytes).map_err(OrbitMeshError::Storage)
    }
}

#[async_trait]
impl ProviderAdapter for PtyAdapter {
    async fn send_input(&self, input: ProviderInput) -> Result<mpsc::Receiver<EventKind>> {
        if !self.started.load(Ordering::SeqCst) {
            return self.spawn();
        }

        match input {
            ProviderInput::Text(text) => self.write_bytes(text.as_bytes())?,
            ProviderInput::Key(key) => {
                let bytes = self.emulator.send_key(key)?;
                self.write_bytes(&bytes)?;
            }
            ProviderInput::Resize { cols, rows } => {
                self.emulator.resize(cols, rows)?;
                if let Some(master) = self.master.lock().expect("adapter mutex poisoned").as_ref() {
                    let _ = master.resize(PtySize {
                        rows,
                        cols,
                        pixel_width: 0,
                        pixel_height: 0,
                    });
                }
            }
        }

        let (_, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn status(&self) -> ProviderStatus {
        if !self.started.load(Ordering::SeqCst) {
            return ProviderStatus::NotStarted;
        }
        let mut guard = self.child.lock().expect("adapter mutex poisoned");
        match guard.as_mut().and_then(|c| c.try_wait().ok().flatten()) {
            Some(_) => ProviderStatus::Stopped,
            None => ProviderStatus::Running,
        }
    }

    async fn stop(&self) -> Result<()> {
        self.write_bytes(&[0x03])?; // Ctrl-C first, graceful
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let mut guard = self.child.lock().expect("adapter mutex poisoned");
        if let Some(child) = guard.as_mut() {
            child.kill().map_err(|e| OrbitMeshError::Subprocess(e.to_string()))?;
        }
        Ok(())
    }

    async fn suspend(&self) -> Result<SuspensionState> {
        let (cols, rows) = self.emulator.size();
        Ok(serde_json::json!({"cols": cols, "rows": rows}))
    }

    async fn resume(&self, state: SuspensionState) -> Result<()> {
        if let (Some(cols), Some(rows)) = (
            state.get("cols").and_then(|v| v.as_u64()),
            state.get("rows").and_then(|v| v.as_u64()),
        ) {
            self.emulator.resize(cols as u16, rows as u16)?;
        }
        Ok(())
    }
}

/// Maps an emulator event to the diff reason used for the debounced
/// whole-screen refresh that accompanies it, for callers translating
/// [`TerminalEvent`]s into domain metadata events.
pub fn refresh_reason(event: &TerminalEvent) -> Option<DiffReason> {
    match event {
        TerminalEvent::RegionChanged(diff) => Some(diff.reason),
        _ => None,
    }
}
