//! Realtime hub: one multiplexed WebSocket endpoint, one connection per
//! client, fanning out session/activity state behind a small subscribe
//! protocol.
//!
//! Per-connection transport shape is grounded on `coopmux`'s downstream WS
//! handler (`transport/ws.rs`): `ws.on_upgrade(...)` into a task built
//! around `tokio::select!` over an outbound channel and the inbound
//! `WebSocket` stream, with a shared cancellation token tearing the whole
//! connection down on any terminal condition.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::HUB_CLIENT_QUEUE_CAPACITY;
use crate::coordinator::SessionCoordinator;
use crate::model::{DerivedStatus, Event, Session};

const TOPIC_SESSIONS_STATE: &str = "sessions.state";
const TOPIC_TERMINALS_STATE: &str = "terminals.state";
const ACTIVITY_PREFIX: &str = "sessions.activity:";

/// Message a client sends over the realtime socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

/// Message the hub sends over the realtime socket.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Snapshot { topic: String, payload: serde_json::Value },
    Event { topic: String, payload: serde_json::Value },
    Error { message: String },
    Pong,
}

/// A session record plus its computed status, the shape handed to hub
/// subscribers (`Session` alone has no status field — see `derived_status`).
#[derive(Serialize)]
struct SessionView {
    #[serde(flatten)]
    session: Session,
    status: DerivedStatus,
}

/// Owns nothing beyond a handle to the coordinator; all subscriber state
/// lives per-connection in [`handle_socket`].
pub struct Hub {
    coordinator: Arc<SessionCoordinator>,
}

impl Hub {
    pub fn new(coordinator: Arc<SessionCoordinator>) -> Self {
        Self { coordinator }
    }

    /// Drives one client connection end to end. Returns once the socket
    /// closes, backpressure forces a disconnect, or the client sends a
    /// close frame.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(HUB_CLIENT_QUEUE_CAPACITY);
        let disconnect = CancellationToken::new();
        let mut topics: HashMap<String, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                _ = disconnect.cancelled() => break,

                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            let Ok(text) = serde_json::to_string(&msg) else { continue };
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }

                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_client_message(&text.to_string(), &out_tx, &disconnect, &mut topics).await;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        for (_, handle) in topics.drain() {
            handle.abort();
        }
    }

    async fn handle_client_message(
        &self,
        text: &str,
        out_tx: &mpsc::Sender<ServerMessage>,
        disconnect: &CancellationToken,
        topics: &mut HashMap<String, JoinHandle<()>>,
    ) {
        let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
        match parsed {
            Ok(ClientMessage::Subscribe { topics: names }) => {
                for topic in names {
                    if topics.contains_key(&topic) {
                        continue;
                    }
                    let handle = self.spawn_topic(topic.clone(), out_tx.clone(), disconnect.clone());
                    topics.insert(topic, handle);
                }
            }
            Ok(ClientMessage::Unsubscribe { topics: names }) => {
                for topic in names {
                    if let Some(handle) = topics.remove(&topic) {
                        handle.abort();
                    }
                }
            }
            Ok(ClientMessage::Ping) => {
                let _ = out_tx.try_send(ServerMessage::Pong);
            }
            Err(e) => {
                let _ = out_tx
                    .try_send(ServerMessage::Error { message: format!("bad client message: {e}") });
            }
        }
    }

    /// Spawns the forwarder task for one topic: one initial snapshot, then
    /// events until unsubscribed or the connection tears down. A full
    /// outbound queue cancels `disconnect` rather than blocking — per the
    /// hub's backpressure rule, overflow disconnects the client.
    fn spawn_topic(
        &self,
        topic: String,
        out_tx: mpsc::Sender<ServerMessage>,
        disconnect: CancellationToken,
    ) -> JoinHandle<()> {
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            if let Err(()) = run_topic(coordinator, topic, out_tx, disconnect.clone()).await {
                disconnect.cancel();
            }
        })
    }
}

/// Runs one topic's snapshot-then-event stream. Returns `Err(())` on the
/// first send failure (outbound queue full or already closed), which the
/// caller treats as a disconnect signal.
async fn run_topic(
    coordinator: Arc<SessionCoordinator>,
    topic: String,
    out_tx: mpsc::Sender<ServerMessage>,
    disconnect: CancellationToken,
) -> Result<(), ()> {
    if topic == TOPIC_SESSIONS_STATE || topic == TOPIC_TERMINALS_STATE {
        let is_terminal_topic = topic == TOPIC_TERMINALS_STATE;
        let snapshot = session_views(&coordinator, is_terminal_topic).unwrap_or_default();
        send(&out_tx, ServerMessage::Snapshot {
            topic: topic.clone(),
            payload: serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
        })
        .await?;

        let mut rx = coordinator.subscribe_state_changes(0);
        loop {
            tokio::select! {
                _ = disconnect.cancelled() => return Ok(()),
                session = rx.recv() => {
                    let Some(session) = session else { return Ok(()) };
                    if is_terminal_topic && session.provider_type != "pty" {
                        continue;
                    }
                    let view = to_view(&coordinator, session);
                    send(&out_tx, ServerMessage::Event {
                        topic: topic.clone(),
                        payload: serde_json::to_value(view).unwrap_or(serde_json::Value::Null),
                    })
                    .await?;
                }
            }
        }
    }

    if let Some(session_id) = topic.strip_prefix(ACTIVITY_PREFIX) {
        let snapshot = coordinator
            .get_session(session_id)
            .ok()
            .map(|s| to_view(&coordinator, s));
        send(&out_tx, ServerMessage::Snapshot {
            topic: topic.clone(),
            payload: serde_json::to_value(snapshot).unwrap_or(serde_json::Value::Null),
        })
        .await?;

        let Ok(mut rx) = coordinator.subscribe_session_events(session_id).await else {
            return send(&out_tx, ServerMessage::Error {
                message: format!("unknown session: {session_id}"),
            })
            .await;
        };
        loop {
            tokio::select! {
                _ = disconnect.cancelled() => return Ok(()),
                event = rx.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    send(&out_tx, ServerMessage::Event {
                        topic: topic.clone(),
                        payload: event_payload(&event),
                    })
                    .await?;
                }
            }
        }
    }

    send(&out_tx, ServerMessage::Error { message: format!("unknown topic: {topic}") }).await
}

fn session_views(
    coordinator: &SessionCoordinator,
    pty_only: bool,
) -> crate::error::Result<Vec<SessionView>> {
    Ok(coordinator
        .list_sessions()?
        .into_iter()
        .filter(|s| !pty_only || s.provider_type == "pty")
        .map(|s| to_view(coordinator, s))
        .collect())
}

fn to_view(coordinator: &SessionCoordinator, session: Session) -> SessionView {
    let status = session.derived_status(coordinator.boot_id());
    SessionView { session, status }
}

fn event_payload(event: &Event) -> serde_json::Value {
    serde_json::to_value(event).unwrap_or(serde_json::Value::Null)
}

async fn send(out_tx: &mpsc::Sender<ServerMessage>, msg: ServerMessage) -> Result<(), ()> {
    out_tx.try_send(msg).map_err(|_| ())
}
