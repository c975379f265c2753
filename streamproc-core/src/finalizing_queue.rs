use std::time::Duration;

use crate::{error::Error, event::AsyncEvent};

/// Cross-thread, multiple-producer/single-consumer queue delivering
/// completed events from workers back to the driver.
///
/// `submit` never blocks. Events are delivered in submission order from
/// any single producer, but interleavings across producers are
/// unspecified: finalization re-serializes side effects on a per-event
/// basis, so cross-worker interleaving at this queue is harmless.
pub struct FinalizingQueue<K, C> {
    sender: flume::Sender<AsyncEvent<K, C>>,
    receiver: flume::Receiver<AsyncEvent<K, C>>,
}

impl<K, C> FinalizingQueue<K, C> {
    /// Creates a new, empty finalizing queue.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        Self { sender, receiver }
    }

    /// A cloneable handle workers use to submit completed events.
    pub fn sender(&self) -> FinalizingSink<K, C> {
        FinalizingSink {
            sender: self.sender.clone(),
        }
    }

    /// Non-blocking receive. Returns `None` if nothing is ready.
    pub fn try_next(&self) -> Option<AsyncEvent<K, C>> {
        self.receiver.try_recv().ok()
    }

    /// Blocks up to `timeout` for the next event.
    ///
    /// Returns `Ok(None)` on a plain timeout. Returns
    /// [`Error::FinalizeInterrupted`] if every sink has been dropped
    /// while the driver still expected events to arrive (the worker pool
    /// was torn down from under an in-flight `flush_and_await`).
    pub fn wait_next(&self, timeout: Duration) -> Result<Option<AsyncEvent<K, C>>, Error> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => Err(Error::FinalizeInterrupted),
        }
    }

    /// True iff no completed event is currently buffered.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<K, C> Default for FinalizingQueue<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The producer half handed to workers. Cloning is cheap; every worker
/// holds one.
pub struct FinalizingSink<K, C> {
    sender: flume::Sender<AsyncEvent<K, C>>,
}

impl<K, C> Clone for FinalizingSink<K, C> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<K, C> FinalizingSink<K, C> {
    /// Hands off a completed event. Never blocks.
    pub fn submit(&self, event: AsyncEvent<K, C>) {
        // The only way this can fail is if the driver dropped the
        // receiver, which only happens when the processor instance is
        // already being torn down; a late submit is then harmless to
        // drop.
        let _ = self.sender.send(event);
    }
}
