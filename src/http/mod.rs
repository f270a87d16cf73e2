//! HTTP/WebSocket surface: thin `axum` handlers translating requests into
//! coordinator/hub calls and back. No business logic lives here — see
//! `coordinator` and `hub` for that (grounded on `coopmux`'s
//! `transport/http.rs`, which keeps the same separation between its
//! handlers and `MuxState`).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::coordinator::SessionCoordinator;
use crate::error::OrbitMeshError;
use crate::hub::Hub;
use crate::model::event::merge_assistant_deltas;
use crate::model::{DerivedStatus, Event, Session};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<SessionCoordinator>,
    pub hub: Arc<Hub>,
}

/// Builds the full router: session CRUD/messaging, the realtime WS upgrade,
/// and the per-session SSE stream. Routing/auth policy (CSRF, multi-tenant
/// auth, reverse-proxy concerns) is out of scope.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/messages", post(send_message).get(list_messages))
        .route("/sessions/{id}/cancel", post(cancel_session))
        .route("/sessions/{id}/resume", post(resume_session))
        .route("/realtime", get(realtime))
        .route("/sessions/{id}/events", get(session_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wraps [`OrbitMeshError`] so it can be returned directly from a handler.
struct ApiError(OrbitMeshError);

impl From<OrbitMeshError> for ApiError {
    fn from(err: OrbitMeshError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = Json(serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}

/// A session record plus its computed status — `Session` alone has no
/// status field (see [`Session::derived_status`]).
#[derive(Serialize)]
struct SessionView {
    #[serde(flatten)]
    session: Session,
    status: DerivedStatus,
}

fn to_view(coordinator: &SessionCoordinator, session: Session) -> SessionView {
    let status = session.derived_status(coordinator.boot_id());
    SessionView { session, status }
}

#[derive(Deserialize)]
struct CreateSessionRequest {
    provider_type: String,
    working_dir: String,
    #[serde(default)]
    title: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state
        .coordinator
        .create_session(req.provider_type, req.working_dir, req.title)
        .await?;
    Ok(Json(to_view(&state.coordinator, session)))
}

#[derive(Deserialize)]
struct ListSessionsQuery {
    project_id: Option<String>,
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    let sessions = state.coordinator.list_sessions()?;
    let views = sessions
        .into_iter()
        .filter(|s| query.project_id.is_none() || s.project_id == query.project_id)
        .map(|s| to_view(&state.coordinator, s))
        .collect();
    Ok(Json(views))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.coordinator.get_session(&id)?;
    Ok(Json(to_view(&state.coordinator, session)))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.delete_session(&id).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SendMessageRequest {
    text: String,
    #[serde(default)]
    provider_id: Option<String>,
}

async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.send_message(&id, req.text, req.provider_id).await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct MessagesQuery {
    cursor: Option<u64>,
}

#[derive(Serialize)]
struct MessagesPage {
    events: Vec<Event>,
    next_cursor: u64,
}

async fn list_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesPage>, ApiError> {
    let cursor = query.cursor.unwrap_or(0);
    let raw: Vec<Event> = state
        .coordinator
        .read_events(&id)?
        .into_iter()
        .filter(|e| e.seq > cursor)
        .collect();
    let next_cursor = raw.last().map(|e| e.seq).unwrap_or(cursor);
    let events = merge_assistant_deltas(raw);
    Ok(Json(MessagesPage { events, next_cursor }))
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.coordinator.cancel(&id).await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct ResumeRequest {
    token_id: String,
    secret: String,
    payload: String,
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .coordinator
        .resume(&id, &req.token_id, &req.secret, req.payload)
        .await?;
    Ok(axum::http::StatusCode::ACCEPTED)
}

async fn realtime(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| async move { hub.handle_socket(socket).await })
}

async fn session_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    let rx = state.coordinator.subscribe_session_events(&id).await?;
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        let event = tokio::select! {
            event = rx.recv() => match event {
                Some(event) => SseEvent::default()
                    .event("message")
                    .data(serde_json::to_string(&event).unwrap_or_default()),
                None => return None,
            },
            _ = tokio::time::sleep(Duration::from_secs(10)) => {
                SseEvent::default().event("heartbeat").data("")
            }
        };
        Some((Ok(event), rx))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
