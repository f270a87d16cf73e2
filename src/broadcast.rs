//! Per-session event fan-out: non-blocking and lossy per subscriber.

use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::constants::DEFAULT_SUBSCRIBER_BUFFER;

/// Fans a stream of `T` out to any number of live subscribers without
/// coupling the producer's pace to the slowest consumer.
///
/// Broadcast is non-blocking: if a subscriber's buffer is full, the event
/// is dropped for that subscriber only and counted in `dropped`. Closing
/// drains and closes every subscriber channel exactly once; broadcasts
/// after close are no-ops.
pub struct Broadcaster<T: Clone + Send + 'static> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    closed: Mutex<bool>,
}

struct Subscriber<T> {
    id: u64,
    tx: mpsc::Sender<T>,
    dropped: std::sync::atomic::AtomicU64,
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            closed: Mutex::new(false),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new subscriber with the given buffer capacity, returning
    /// its receiver and a handle that unsubscribes on drop.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<T> {
        let buffer = if buffer == 0 {
            DEFAULT_SUBSCRIBER_BUFFER
        } else {
            buffer
        };
        let (tx, rx) = mpsc::channel(buffer);
        let mut subscribers = self.subscribers.lock().expect("broadcaster mutex poisoned");
        let id = subscribers.len() as u64;
        subscribers.push(Subscriber {
            id,
            tx,
            dropped: std::sync::atomic::AtomicU64::new(0),
        });
        rx
    }

    /// Delivers `value` to every current subscriber. Full subscriber
    /// buffers drop the value for that subscriber only; this call never
    /// blocks.
    pub fn broadcast(&self, value: T) {
        if *self.closed.lock().expect("broadcaster mutex poisoned") {
            return;
        }
        let mut subscribers = self.subscribers.lock().expect("broadcaster mutex poisoned");
        subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                return false;
            }
            if sub.tx.try_send(value.clone()).is_err() {
                sub.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
            true
        });
    }

    /// Current subscriber count, for diagnostics.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("broadcaster mutex poisoned").len()
    }

    /// Closes the broadcaster: drops every subscriber sender, which closes
    /// their receivers, and marks future broadcasts as no-ops.
    pub fn close(&self) {
        let mut closed = self.closed.lock().expect("broadcaster mutex poisoned");
        if *closed {
            return;
        }
        *closed = true;
        self.subscribers.lock().expect("broadcaster mutex poisoned").clear();
    }

    #[cfg(test)]
    fn dropped_for(&self, id: u64) -> u64 {
        self.subscribers
            .lock()
            .expect("broadcaster mutex poisoned")
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.dropped.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_delivers_to_every_subscriber() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new();
        let mut rx1 = broadcaster.subscribe(4);
        let mut rx2 = broadcaster.subscribe(4);

        broadcaster.broadcast(7);
        assert_eq!(rx1.recv().await, Some(7));
        assert_eq!(rx2.recv().await, Some(7));
    }

    #[tokio::test]
    async fn full_subscriber_buffer_drops_without_blocking_others() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new();
        let mut slow_rx = broadcaster.subscribe(1);
        let mut fast_rx = broadcaster.subscribe(4);

        broadcaster.broadcast(1);
        broadcaster.broadcast(2); // slow subscriber's buffer is now full; dropped for it only

        assert_eq!(slow_rx.recv().await, Some(1));
        assert_eq!(fast_rx.recv().await, Some(1));
        assert_eq!(fast_rx.recv().await, Some(2));
        assert_eq!(broadcaster.dropped_for(0), 1);
    }

    #[tokio::test]
    async fn close_drains_and_future_broadcasts_are_noops() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new();
        let mut rx = broadcaster.subscribe(4);
        broadcaster.close();
        broadcaster.broadcast(9);
        assert_eq!(rx.recv().await, None);
    }
}
