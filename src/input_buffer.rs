//! Bounded input queue feeding a provider adapter, with a pause gate and
//! cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{OrbitMeshError, Result};

/// Bounded queue of caller-supplied input, consumed by one provider adapter
/// task. Input enqueued while paused is held, not dropped; `cancel` wakes
/// any pending `recv` immediately.
pub struct InputBuffer {
    tx: mpsc::Sender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    paused: AtomicBool,
    cancel: CancellationToken,
}

impl InputBuffer {
    /// Creates a buffer with the given capacity, a child of `parent_cancel`
    /// so cancelling the session tree also unblocks this buffer.
    pub fn new(capacity: usize, parent_cancel: &CancellationToken) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            paused: AtomicBool::new(false),
            cancel: parent_cancel.child_token(),
        }
    }

    /// Enqueues input for the adapter to send. Fails with `Transport` if the
    /// buffer is full (callers should retry or surface backpressure).
    pub fn push(&self, bytes: Vec<u8>) -> Result<()> {
        self.tx
            .try_send(bytes)
            .map_err(|_| OrbitMeshError::Transport("input buffer full".into()))
    }

    /// Stops delivering queued input until `resume` is called. Does not
    /// drop already-queued input.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes delivering queued input.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Cancels this buffer's token, unblocking any pending `recv`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the next queued input, honoring the pause gate and
    /// cancellation. Returns `None` once cancelled or the sender is
    /// dropped.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        loop {
            if self.paused.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => continue,
                }
            }
            let mut rx = self.rx.lock().await;
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                item = rx.recv() => return item,
            }
        }
    }
}
