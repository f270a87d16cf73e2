//! Line-delimited JSON adapter: spawns the provider CLI over stdio pipes.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::circuit_breaker::CircuitBreaker;
use crate::constants::STDIO_MAX_LINE_BYTES;
use crate::error::{OrbitMeshError, Result};
use crate::model::EventKind;

use super::common::{ProviderAdapter, ProviderInput, ProviderStatus, SuspensionState};
use super::dispatch::dispatch;

/// Spawns `<cli> --output-format=stream-json --input-format=stream-json
/// --include-partial-messages` and translates its stdout, one JSON object
/// per line, into domain events.
pub struct StdioJsonAdapter {
    cli_path: String,
    working_dir: String,
    circuit_breaker: CircuitBreaker,
    child: Mutex<Option<Child>>,
    stdin_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    started: AtomicBool,
}

impl StdioJsonAdapter {
    /// Builds an adapter for the given CLI binary and working directory.
    pub fn new(cli_path: String, working_dir: String, circuit_breaker: CircuitBreaker) -> Self {
        Self {
            cli_path,
            working_dir,
            circuit_breaker,
            child: Mutex::new(None),
            stdin_tx: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    async fn spawn(&self) -> Result<mpsc::Receiver<EventKind>> {
        self.circuit_breaker.check()?;

        let mut child = Command::new(&self.cli_path)
            .arg("--output-format=stream-json")
            .arg("--input-format=stream-json")
            .arg("--include-partial-messages")
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                OrbitMeshError::Subprocess(format!("failed to spawn {}: {e}", self.cli_path))
            })?;
        self.circuit_breaker.record_success();

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        let (event_tx, event_rx) = mpsc::channel(256);
        let (input_tx, mut input_rx) = mpsc::channel::<Vec<u8>>(64);

        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(bytes) = input_rx.recv().await {
                if stdin.write_all(&bytes).await.is_err() {
                    break;
                }
                let _ = stdin.write_all(b"\n").await;
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::with_capacity(STDIO_MAX_LINE_BYTES, stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        for event in decode_line(&line) {
                            if event_tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        log::warn!("stdio adapter stdout read error: {e}");
                        return;
                    }
                }
            }
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::debug!("provider stderr: {line}");
            }
        });

        *self.child.lock().expect("adapter mutex poisoned") = Some(child);
        *self.stdin_tx.lock().expect("adapter mutex poisoned") = Some(input_tx);
        self.started.store(true, Ordering::SeqCst);

        Ok(event_rx)
    }
}

/// Decodes one stdout line into domain events. Unwraps a single
/// `stream_event` envelope, then dispatches on the inner `type`. Malformed
/// lines surface as metadata, never fatal.
fn decode_line(line: &str) -> Vec<EventKind> {
    let raw = line.to_string();
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return vec![EventKind::Metadata {
                data: serde_json::json!({"parse_error": e.to_string(), "raw": raw}),
            }]
        }
    };
    dispatch(&value)
}

#[async_trait]
impl ProviderAdapter for StdioJsonAdapter {
    async fn send_input(&self, input: ProviderInput) -> Result<mpsc::Receiver<EventKind>> {
        if !self.started.load(Ordering::SeqCst) {
            return self.spawn().await;
        }

        let ProviderInput::Text(text) = input else {
            return Err(OrbitMeshError::Protocol(
                "stdio adapter only accepts text input".into(),
            ));
        };
        let tx = self
            .stdin_tx
            .lock()
            .expect("adapter mutex poisoned")
            .clone()
            .ok_or_else(|| OrbitMeshError::Subprocess("adapter not started".into()))?;
        let line = serde_json::json!({"type": "user", "message": {"content": text}}).to_string();
        tx.send(line.into_bytes())
            .await
            .map_err(|_| OrbitMeshError::Transport("stdin closed".into()))?;

        let (_, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn status(&self) -> ProviderStatus {
        if !self.started.load(Ordering::SeqCst) {
            return ProviderStatus::NotStarted;
        }
        let mut guard = self.child.lock().expect("adapter mutex poisoned");
        match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(Some(_)) => ProviderStatus::Stopped,
                Ok(None) => ProviderStatus::Running,
                Err(_) => ProviderStatus::Stopped,
            },
            None => ProviderStatus::NotStarted,
        }
    }

    async fn stop(&self) -> Result<()> {
        let pid = {
            let guard = self.child.lock().expect("adapter mutex poisoned");
            guard.as_ref().and_then(|c| c.id())
        };
        if let Some(pid) = pid {
            #[cfg(unix)]
            {
                // SIGTERM: ask nicely first, let the caller escalate to kill().
                let _ = nix_kill(pid as i32);
            }
        }
        Ok(())
    }

    async fn kill(&self) -> Result<()> {
        let mut guard = self.child.lock().expect("adapter mutex poisoned");
        if let Some(child) = guard.as_mut() {
            child.start_kill().map_err(OrbitMeshError::Storage)?;
        }
        Ok(())
    }

    async fn suspend(&self) -> Result<SuspensionState> {
        Ok(serde_json::json!({}))
    }

    async fn resume(&self, _state: SuspensionState) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn nix_kill(pid: i32) -> std::io::Result<()> {
    // SAFETY: sending SIGTERM to a PID we spawned ourselves.
    let ret = unsafe { libc::kill(pid, libc::SIGTERM) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_line_dispatches_known_kind() {
        let events = decode_line(r#"{"type":"ping"}"#);
        assert!(events.is_empty());
    }

    #[test]
    fn decode_line_surfaces_malformed_json_as_metadata() {
        let events = decode_line("not json");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EventKind::Metadata { .. }));
    }

    #[test]
    fn decode_line_unwraps_stream_event_envelope() {
        let line = r#"{"type":"stream_event","event":{"type":"content_block_delta","delta":{"text":"ok"}}}"#;
        let events = decode_line(line);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EventKind::MessageAssistantDelta { content } if content == "ok"));
    }
}
