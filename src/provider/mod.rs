//! Provider adapters: the three ways a session's agent subprocess can be
//! supervised (line-delimited JSON over stdio, a WebSocket control-plane,
//! or a raw PTY), behind one common contract.

pub mod common;
pub mod dispatch;
pub mod pty;
pub mod stdio_json;
pub mod websocket;
pub mod wire;

pub use common::{Interruptible, ProviderAdapter, ProviderInput, ProviderStatus, SuspensionState};
pub use pty::PtyAdapter;
pub use stdio_json::StdioJsonAdapter;
pub use websocket::{PermissionDecision, PermissionHandler, WebSocketAdapter};
