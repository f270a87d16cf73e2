//! Process-wide configuration, built once at startup.
//!
//! An explicit environment variable override wins, otherwise we fall back
//! to a platform default. Every ambient tunable (circuit breaker
//! thresholds, WS connect deadline, heartbeat interval, debounce interval,
//! frame-size cap, open-window size) lives here rather than at call sites.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants;

/// Environment variable naming the base directory for persisted state.
pub const ENV_BASE_DIR: &str = "ORBITMESH_BASE_DIR";

/// Environment variable naming the git directory passed through to providers.
pub const ENV_GIT_DIR: &str = "ORBITMESH_GIT_DIR";

/// Environment variable selecting the runtime environment (`test`, `production`, ...).
pub const ENV_ENVIRONMENT: &str = "ORBITMESH_ENV";

/// Process-wide configuration record.
///
/// Created once at process start (see `main.rs`) and passed by `Arc` to
/// every component that needs a tunable rather than re-read per call.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base directory under which `sessions/` and `extractors/` live.
    pub base_dir: PathBuf,
    /// Git directory forwarded to provider subprocesses, if set.
    pub git_dir: Option<PathBuf>,
    /// Consecutive provider-start failures before the circuit breaker trips.
    pub circuit_breaker_threshold: u32,
    /// Cooldown duration once the circuit breaker trips.
    pub circuit_breaker_cooldown: Duration,
    /// Deadline for accepting the WebSocket control-plane upgrade.
    pub ws_connect_deadline: Duration,
    /// Heartbeat ping interval for the WebSocket control-plane connection.
    pub ws_heartbeat_interval: Duration,
    /// Debounce window for PTY whole-screen refresh notifications.
    pub pty_debounce_interval: Duration,
    /// Maximum frame size accepted by the frame log and WS adapter.
    pub frame_log_max_frame_bytes: u64,
    /// Size of the activity extractor's recent-open window.
    pub open_window_size: usize,
    /// Graceful-stop timeout before a provider escalates to `Kill`.
    pub stop_grace_period: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let base_dir = Self::default_base_dir();

        Self {
            base_dir,
            git_dir: std::env::var(ENV_GIT_DIR).ok().map(PathBuf::from),
            circuit_breaker_threshold: constants::CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_cooldown: constants::CIRCUIT_BREAKER_COOLDOWN,
            ws_connect_deadline: constants::WS_CONNECT_DEADLINE,
            ws_heartbeat_interval: constants::WS_HEARTBEAT_INTERVAL,
            pty_debounce_interval: constants::PTY_DEBOUNCE_INTERVAL,
            frame_log_max_frame_bytes: constants::FRAME_LOG_MAX_FRAME_BYTES,
            open_window_size: constants::DEFAULT_OPEN_WINDOW_SIZE,
            stop_grace_period: constants::STOP_GRACE_PERIOD,
        }
    }
}

impl Config {
    /// Builds the default configuration, honoring `ORBITMESH_BASE_DIR` and
    /// `ORBITMESH_GIT_DIR` overrides.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Resolves the base directory: `ORBITMESH_BASE_DIR` override, else
    /// `~/.orbitmesh`, else a `tmp/` fallback when the home directory is
    /// unknown.
    fn default_base_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_BASE_DIR) {
            return PathBuf::from(dir);
        }

        if std::env::var(ENV_ENVIRONMENT).as_deref() == Ok("test") {
            return std::env::temp_dir().join("orbitmesh-test");
        }

        dirs::home_dir()
            .map(|home| home.join(constants::DEFAULT_BASE_DIR_NAME))
            .unwrap_or_else(|| {
                log::warn!("could not determine home directory, using relative base dir");
                PathBuf::from(constants::DEFAULT_BASE_DIR_NAME)
            })
    }

    /// Directory holding per-session persisted files, creating it if absent.
    pub fn sessions_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.base_dir.join(constants::SESSIONS_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Directory holding shared extractor rule profiles, creating it if absent.
    pub fn extractors_dir(&self) -> std::io::Result<PathBuf> {
        let dir = self.base_dir.join(constants::EXTRACTORS_DIR);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}
