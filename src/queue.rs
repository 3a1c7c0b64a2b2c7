//! Bounded drop-newest queues for the RX and TX pipelines.
//!
//! Producers on the interrupt and UDP paths must never block, so a full
//! queue drops the *newest* item and bumps a counter instead of waiting.
//! Older in-flight traffic survives; the drop is visible in the stats.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::time::Duration;

/// Sending half of a bounded queue. Cloneable; every clone shares the same
/// drop counter.
pub struct QueueSender<T> {
    tx: SyncSender<T>,
    dropped: Arc<AtomicU32>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

/// Receiving half of a bounded queue.
pub struct QueueReceiver<T> {
    rx: Receiver<T>,
    dropped: Arc<AtomicU32>,
}

/// Create a bounded queue with the given capacity.
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = sync_channel(capacity);
    let dropped = Arc::new(AtomicU32::new(0));
    (
        QueueSender {
            tx,
            dropped: dropped.clone(),
        },
        QueueReceiver { rx, dropped },
    )
}

impl<T> QueueSender<T> {
    /// Enqueue without blocking. On overflow the item is dropped and the
    /// drop counter incremented; returns `false` in that case. Also returns
    /// `false` once the receiver is gone.
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Number of items dropped on overflow so far.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> QueueReceiver<T> {
    /// Blocking receive with a timeout; `None` on timeout or when all
    /// senders are gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}
