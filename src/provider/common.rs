//! The contract every provider adapter implements, independent of its wire
//! transport (stdio pipe, WebSocket control-plane, or PTY).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::model::EventKind;

/// Caller-supplied input to a provider's subprocess. Most providers only
/// use `Text`; the PTY adapter also accepts structured terminal operations.
#[derive(Clone, Debug)]
pub enum ProviderInput {
    /// Plain text, forwarded to the subprocess's stdin or the vendor
    /// protocol's message field.
    Text(String),
    /// A single key, dispatched to the terminal facade (PTY only).
    Key(crate::terminal::Key),
    /// A terminal resize (PTY only).
    Resize { cols: u16, rows: u16 },
}

/// A provider's point-in-time status, for `Status()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderStatus {
    /// No subprocess has been started yet.
    NotStarted,
    /// The subprocess is running.
    Running,
    /// The subprocess has been asked to stop and is winding down.
    Stopping,
    /// The subprocess has exited.
    Stopped,
}

/// Opaque, provider-specific state captured by `suspend` and handed back to
/// `resume` to restore minimal continuation state (vendor session id,
/// in-flight tool-call bookkeeping, etc).
pub type SuspensionState = serde_json::Value;

/// Common contract every provider adapter implements.
///
/// `send_input`'s first call starts the subprocess and returns the event
/// stream for its whole lifetime; subsequent calls enqueue further input
/// into the same run.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Starts the subprocess on first call, or enqueues `input` into the
    /// already-running one. Returns a receiver yielding domain events for
    /// the run's lifetime.
    async fn send_input(&self, input: ProviderInput) -> Result<mpsc::Receiver<EventKind>>;

    /// The adapter's current status.
    fn status(&self) -> ProviderStatus;

    /// Requests a graceful stop: SIGTERM (or transport-equivalent), then
    /// waits up to the configured grace period before the caller should
    /// escalate to `kill`.
    async fn stop(&self) -> Result<()>;

    /// Kills the subprocess immediately, with no grace period.
    async fn kill(&self) -> Result<()>;

    /// Captures minimal state needed to resume this run later.
    async fn suspend(&self) -> Result<SuspensionState>;

    /// Restores a previously captured suspension state.
    async fn resume(&self, state: SuspensionState) -> Result<()>;
}

/// Implemented by providers whose transport supports an in-band cancel
/// (WebSocket control-plane providers; stdio and PTY providers only
/// support out-of-band `stop`/`kill`).
#[async_trait]
pub trait Interruptible: Send + Sync {
    /// Sends an in-band interrupt to the running subprocess.
    async fn interrupt(&self) -> Result<()>;
}
