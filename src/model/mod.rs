//! Value types shared across the session runtime.
//!
//! Cyclic-looking relationships (session → run → wait → token) are
//! represented as flat records keyed by stable ids; navigation is always by
//! lookup through storage, never by pointer (see `DESIGN.md`, "cyclic
//! references").

pub mod activity;
pub mod event;
pub mod run;
pub mod session;
pub mod terminal;
pub mod token;

pub use activity::ActivityEntry;
pub use event::{Event, EventKind};
pub use run::{Run, Wait, WaitKind};
pub use session::{DerivedStatus, Session, SessionLifecycle};
pub use token::{ResumeToken, TokenState};

/// A session identifier. Newtyped over `String` (not `Uuid`) because
/// sessions are addressed by the caller (e.g. `task-1234`) rather than
/// minted by us.
pub type SessionId = String;

/// A run identifier, minted by the coordinator when a run starts.
pub type RunId = String;

/// A boot identifier, minted once per process start (see `recovery` module).
pub type BootId = String;

/// Mints a new random identifier suitable for run ids, boot ids, token ids.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}_{}", uuid::Uuid::new_v4().simple())
}
