//! WebSocket control-plane adapter: launches the agent pointed at a
//! loopback listener instead of piping stdio, and speaks its richer
//! control protocol (including tool-permission callbacks).

use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Config;
use crate::error::{OrbitMeshError, Result};
use crate::model::event::ToolCallStatus;
use crate::model::EventKind;

use super::common::{Interruptible, ProviderAdapter, ProviderInput, ProviderStatus, SuspensionState};
use super::dispatch::dispatch;
use super::wire::{get_obj, get_str};

/// A caller-injected hook deciding whether a tool invocation may proceed.
/// Absent, every tool call is auto-allowed.
pub type PermissionHandler =
    Box<dyn Fn(&str, &Value) -> PermissionDecision + Send + Sync>;

/// The outcome of a permission check.
pub struct PermissionDecision {
    pub allow: bool,
    pub updated_input: Option<Value>,
    pub reason: Option<String>,
}

/// WebSocket control-plane provider adapter.
pub struct WebSocketAdapter {
    cli_path: String,
    working_dir: String,
    circuit_breaker: CircuitBreaker,
    connect_deadline: Duration,
    message_cap: usize,
    heartbeat_interval: Duration,
    permission_handler: Arc<Option<PermissionHandler>>,
    child: Mutex<Option<Child>>,
    outbound_tx: Mutex<Option<mpsc::Sender<Message>>>,
    started: AtomicBool,
}

impl WebSocketAdapter {
    /// Builds an adapter using the given config's timing tunables.
    pub fn new(
        cli_path: String,
        working_dir: String,
        config: &Config,
        permission_handler: Option<PermissionHandler>,
    ) -> Self {
        Self {
            cli_path,
            working_dir,
            circuit_breaker: CircuitBreaker::new(
                config.circuit_breaker_threshold,
                config.circuit_breaker_cooldown,
            ),
            connect_deadline: config.ws_connect_deadline,
            message_cap: 4 * 1024 * 1024,
            heartbeat_interval: config.ws_heartbeat_interval,
            permission_handler: Arc::new(permission_handler),
            child: Mutex::new(None),
            outbound_tx: Mutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    async fn spawn(&self) -> Result<mpsc::Receiver<EventKind>> {
        self.circuit_breaker.check()?;

        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(OrbitMeshError::Storage)?;
        let addr: SocketAddr = listener.local_addr().map_err(OrbitMeshError::Storage)?;

        let child = Command::new(&self.cli_path)
            .arg(format!("--sdk-url=ws://{addr}"))
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                self.circuit_breaker.record_failure();
                OrbitMeshError::Subprocess(format!("failed to spawn {}: {e}", self.cli_path))
            })?;

        let accept = tokio::time::timeout(self.connect_deadline, listener.accept());
        let (stream, _) = match accept.await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.circuit_breaker.record_failure();
                return Err(OrbitMeshError::Transport(format!("accept failed: {e}")));
            }
            Err(_) => {
                self.circuit_breaker.record_failure();
                return Err(OrbitMeshError::Transport("connect_timeout".into()));
            }
        };
        self.circuit_breaker.record_success();

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| OrbitMeshError::Transport(format!("ws upgrade failed: {e}")))?;
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let (event_tx, event_rx) = mpsc::channel(256);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(64);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if ws_tx.send(message).await.is_err() {
                    return;
                }
            }
        });

        let heartbeat_tx = outbound_tx.clone();
        let heartbeat_interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                if heartbeat_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    return;
                }
            }
        });

        let message_cap = self.message_cap;
        let reply_tx = outbound_tx.clone();
        let permission_handler = self.permission_handler.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_rx.next().await {
                let Ok(msg) = msg else { return };
                let Message::Text(text) = msg else { continue };
                if text.len() > message_cap {
                    log::warn!("dropping oversized control message ({} bytes)", text.len());
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(&text) else {
                    let _ = event_tx
                        .send(EventKind::Metadata {
                            data: json!({"parse_error": "invalid control json"}),
                        })
                        .await;
                    continue;
                };

                for event in handle_control_message(&value, permission_handler.as_deref(), &reply_tx).await {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        *self.child.lock().expect("adapter mutex poisoned") = Some(child);
        *self.outbound_tx.lock().expect("adapter mutex poisoned") = Some(outbound_tx);
        self.started.store(true, Ordering::SeqCst);

        Ok(event_rx)
    }
}

async fn handle_control_message(
    value: &Value,
    permission_handler: Option<&PermissionHandler>,
    reply_tx: &mpsc::Sender<Message>,
) -> Vec<EventKind> {
    let outer_type = get_str(value, "type").unwrap_or("");

    if outer_type != "control_request" {
        return dispatch(value);
    }

    let Some(request) = get_obj(value, "request") else {
        return vec![];
    };
    match get_str(request, "subtype") {
        Some("can_use_tool") => handle_can_use_tool(value, request, permission_handler, reply_tx).await,
        Some("interrupt") => vec![], // adapter-originated only; never received
        _ => {
            // Unknown subtype: respond with empty success so the agent never
            // deadlocks waiting for a control_response.
            let _ = send_control_response(reply_tx, get_str(value, "request_id"), json!({})).await;
            vec![]
        }
    }
}

async fn handle_can_use_tool(
    outer: &Value,
    request: &Value,
    permission_handler: Option<&PermissionHandler>,
    reply_tx: &mpsc::Sender<Message>,
) -> Vec<EventKind> {
    let tool_call_id = get_str(request, "tool_use_id").unwrap_or("").to_string();
    let name = get_str(request, "tool_name").unwrap_or("").to_string();
    let input = request.get("input").cloned().unwrap_or(Value::Null);

    let mut events = vec![EventKind::ToolCallStart {
        tool_call_id: tool_call_id.clone(),
        name: name.clone(),
        input: input.clone(),
        status: Some(ToolCallStatus::PermissionRequest),
    }];

    let decision = match permission_handler {
        Some(handler) => handler(&name, &input),
        None => PermissionDecision {
            allow: true,
            updated_input: None,
            reason: None,
        },
    };

    let response = if decision.allow {
        json!({"behavior": "allow", "updatedInput": decision.updated_input})
    } else {
        json!({"behavior": "deny", "message": decision.reason})
    };
    let _ = send_control_response(reply_tx, get_str(outer, "request_id"), response).await;

    events.push(EventKind::ToolCallStart {
        tool_call_id,
        name,
        input,
        status: Some(if decision.allow {
            ToolCallStatus::PermissionGranted
        } else {
            ToolCallStatus::PermissionDenied
        }),
    });
    events
}

/// Builds and sends the canonical control-response envelope: a
/// `control_response` outer message carrying `subtype`, `request_id`, and
/// the inner `response` payload all nested under `response`.
async fn send_control_response(
    reply_tx: &mpsc::Sender<Message>,
    request_id: Option<&str>,
    response: Value,
) -> Result<()> {
    let envelope = json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": response,
        },
    });
    reply_tx
        .send(Message::Text(envelope.to_string().into()))
        .await
        .map_err(|_| OrbitMeshError::Transport("control-plane connection closed".into()))
}

#[async_trait]
impl ProviderAdapter for WebSocketAdapter {
    async fn send_input(&self, input: ProviderInput) -> Result<mpsc::Receiver<EventKind>> {
        if !self.started.load(Ordering::SeqCst) {
            return self.spawn().await;
        }

        let ProviderInput::Text(text) = input else {
            return Err(OrbitMeshError::Protocol(
                "websocket adapter only accepts text input".into(),
            ));
        };
        let tx = self
            .outbound_tx
            .lock()
            .expect("adapter mutex poisoned")
            .clone()
            .ok_or_else(|| OrbitMeshError::Subprocess("adapter not started".into()))?;
        let envelope = json!({"type": "user", "message": {"content": text}}).to_string();
        tx.send(Message::Text(envelope.into()))
            .await
            .map_err(|_| OrbitMeshError::Transport("control-plane connection closed".into()))?;

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
        self.interrupt().await
    }

    async fn kill(&self) -> Result<()> {
        let mut guard = self.child.lock().expect("adapter mutex poisoned");
        if let Some(child) = guard.as_mut() {
            child.start_kill().map_err(OrbitMeshError::Storage)?;
        }
        Ok(())
    }

    async fn suspend(&self) -> Result<SuspensionState> {
        Ok(json!({}))
    }

    async fn resume(&self, _state: SuspensionState) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Interruptible for WebSocketAdapter {
    async fn interrupt(&self) -> Result<()> {
        let tx = self
            .outbound_tx
            .lock()
            .expect("adapter mutex poisoned")
            .clone()
            .ok_or_else(|| OrbitMeshError::Subprocess("adapter not started".into()))?;
        let envelope = json!({"type": "control_request", "request": {"subtype": "interrupt"}}).to_string();
        tx.send(Message::Text(envelope.into()))
            .await
            .map_err(|_| OrbitMeshError::Transport("control-plane connection closed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_control_subtype_gets_empty_success() {
        let (tx, mut rx) = mpsc::channel(4);
        let value = json!({
            "type": "control_request",
            "request_id": "req_1",
            "request": {"subtype": "mystery"},
        });
        let events = handle_control_message(&value, None, &tx).await;
        assert!(events.is_empty());
        let sent = rx.recv().await.unwrap();
        let Message::Text(text) = sent else { panic!("expected text message") };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["response"]["subtype"], "success");
        assert_eq!(parsed["response"]["request_id"], "req_1");
        assert_eq!(parsed["response"]["response"], json!({}));
    }

    #[tokio::test]
    async fn can_use_tool_auto_allows_without_handler() {
        let (tx, mut rx) = mpsc::channel(4);
        let value = json!({
            "type": "control_request",
            "request_id": "req_2",
            "request": {"subtype": "can_use_tool", "tool_use_id": "t1", "tool_name": "bash", "input": {}},
        });
        let events = handle_control_message(&value, None, &tx).await;
        assert_eq!(events.len(), 2);
        let reply = rx.recv().await.unwrap();
        let Message::Text(text) = reply else { panic!("expected text message") };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["response"]["subtype"], "success");
        assert_eq!(parsed["response"]["request_id"], "req_2");
        assert_eq!(parsed["response"]["response"]["behavior"], "allow");
    }

    #[tokio::test]
    async fn can_use_tool_denial_replies_deny_and_tags_the_event_denied() {
        let (tx, mut rx) = mpsc::channel(4);
        let handler: PermissionHandler = Box::new(|_name, _input| PermissionDecision {
            allow: false,
            updated_input: None,
            reason: Some("blocked by policy".into()),
        });
        let value = json!({
            "type": "control_request",
            "request_id": "req_3",
            "request": {"subtype": "can_use_tool", "tool_use_id": "t1", "tool_name": "rm", "input": {}},
        });

        let events = handle_control_message(&value, Some(&handler), &tx).await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            EventKind::ToolCallStart { status: Some(ToolCallStatus::PermissionDenied), .. }
        ));

        let reply = rx.recv().await.unwrap();
        let Message::Text(text) = reply else { panic!("expected text message") };
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["response"]["subtype"], "success");
        assert_eq!(parsed["response"]["request_id"], "req_3");
        assert_eq!(parsed["response"]["response"]["behavior"], "deny");
        assert_eq!(parsed["response"]["response"]["message"], "blocked by policy");
    }
}
