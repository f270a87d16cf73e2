//! Application-wide constants for OrbitMesh.
//!
//! Centralizes ambient defaults so they are defined once and threaded
//! through [`crate::config::Config`] rather than scattered across call
//! sites.

use std::time::Duration;

// ============================================================================
// Persistence
// ============================================================================

/// Default base directory name under the user's home directory.
pub const DEFAULT_BASE_DIR_NAME: &str = ".orbitmesh";

/// Subdirectory (under the base dir) holding per-session files.
pub const SESSIONS_DIR: &str = "sessions";

/// Subdirectory (under the base dir) holding shared extractor rule profiles.
pub const EXTRACTORS_DIR: &str = "extractors";

// ============================================================================
// Circuit breaker
// ============================================================================

/// Consecutive failures before the circuit breaker trips.
pub const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Cooldown duration once the circuit breaker trips.
pub const CIRCUIT_BREAKER_COOLDOWN: Duration = Duration::from_secs(30);

// ============================================================================
// Provider adapters
// ============================================================================

/// Maximum single line size accepted from the line-delimited JSON adapter.
pub const STDIO_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Deadline for accepting the single WebSocket upgrade in the control-plane adapter.
pub const WS_CONNECT_DEADLINE: Duration = Duration::from_secs(15);

/// Maximum WebSocket message size accepted by the control-plane adapter.
pub const WS_MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Heartbeat ping interval for the control-plane WebSocket connection.
pub const WS_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Graceful-stop timeout before a provider adapter escalates to `Kill`.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

// ============================================================================
// PTY
// ============================================================================

/// Debounce window collapsing PTY "dirty" notifications into one refresh.
pub const PTY_DEBOUNCE_INTERVAL: Duration = Duration::from_millis(200);

/// Maximum frame size accepted by the frame log.
pub const FRAME_LOG_MAX_FRAME_BYTES: u64 = 16 * 1024 * 1024;

/// Default PTY width, used until the caller sends a resize.
pub const PTY_DEFAULT_COLS: u16 = 80;

/// Default PTY height, used until the caller sends a resize.
pub const PTY_DEFAULT_ROWS: u16 = 24;

// ============================================================================
// Activity extractor
// ============================================================================

/// Default size of the recent-open window tracked per profile.
pub const DEFAULT_OPEN_WINDOW_SIZE: usize = 8;

// ============================================================================
// Realtime hub
// ============================================================================

/// Bound on each realtime client's outbound queue before it is disconnected.
pub const HUB_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Bound on each per-session subscriber's buffer (event broadcaster).
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 128;
