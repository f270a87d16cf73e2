//! Error taxonomy for the session runtime.
//!
//! Component-level code returns a typed [`OrbitMeshError`] so the
//! coordinator and HTTP surface can branch on error category; top-level
//! plumbing (CLI, storage I/O wrapping) uses `anyhow::Result` with
//! `.context(...)` instead.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors surfaced by the session runtime's public operations.
#[derive(Debug, Error)]
pub enum OrbitMeshError {
    /// A wire message could not be parsed. Never fatal to the session —
    /// callers should emit a `metadata{parse_error}` event and continue.
    #[error("failed to parse wire message: {0}")]
    Parse(String),

    /// The underlying transport (pipe, WebSocket, PTY) failed outside of
    /// an intentional shutdown.
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider subprocess exited non-zero or failed to spawn.
    #[error("subprocess failure: {0}")]
    Subprocess(String),

    /// A control-protocol message was malformed or used an unknown subtype.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A storage operation (log append, snapshot write, frame read) failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The circuit breaker is in its cooldown window; `retry_after` is the
    /// remaining cooldown.
    #[error("circuit open, retry after {retry_after_secs}s")]
    CooldownActive {
        /// Seconds remaining before a new run may be attempted.
        retry_after_secs: u64,
    },

    /// The referenced session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The referenced run does not exist or is not the active run.
    #[error("run not found or not active: {0}")]
    RunNotActive(String),

    /// A resume token could not be validated (unknown, wrong scope, etc.).
    #[error("invalid resume token: {0}")]
    InvalidToken(String),

    /// A resume token was already consumed, revoked, or expired.
    #[error("token already consumed")]
    TokenAlreadyConsumed,

    /// The session has an in-flight run and cannot start another.
    #[error("session {0} already has an active run")]
    RunInProgress(String),
}

impl OrbitMeshError {
    /// Maps this error to the HTTP status code the `http` module should
    /// return (grounded on `coopmux::error::MuxError::http_status`).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Parse(_) | Self::Protocol(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) | Self::RunNotActive(_) => StatusCode::NOT_FOUND,
            Self::InvalidToken(_) | Self::TokenAlreadyConsumed => StatusCode::CONFLICT,
            Self::RunInProgress(_) => StatusCode::CONFLICT,
            Self::CooldownActive { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transport(_) | Self::Subprocess(_) | Self::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code, mirrored in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Subprocess(_) => "SUBPROCESS_ERROR",
            Self::Protocol(_) => "PROTOCOL_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::CooldownActive { .. } => "COOLDOWN_ACTIVE",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::RunNotActive(_) => "RUN_NOT_ACTIVE",
            Self::InvalidToken(_) => "INVALID_TOKEN",
            Self::TokenAlreadyConsumed => "TOKEN_ALREADY_CONSUMED",
            Self::RunInProgress(_) => "RUN_IN_PROGRESS",
        }
    }
}

/// Convenience alias for component-level results.
pub type Result<T> = std::result::Result<T, OrbitMeshError>;
