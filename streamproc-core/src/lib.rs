//! Core data model for the async per-key ordered processor runtime:
//! events, the scheduling queue, the finalizing queue, configuration, and
//! the host integration traits. No threads are spawned in this crate;
//! that is [`streamproc_worker`]'s job.

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod finalizing_queue;
pub mod instance;
pub mod scheduling_queue;

pub use config::RuntimeConfig;
pub use context::{AsyncStore, HostContext, OutputRecord, RecordContext, WriteOp};
pub use error::Error;
pub use event::{AsyncEvent, PendingForward, PendingWrite, State, UserCallback};
pub use finalizing_queue::{FinalizingQueue, FinalizingSink};
pub use instance::ProcessorId;
pub use scheduling_queue::SchedulingQueue;

#[cfg(loom)]
mod loom_tests {
    use loom::sync::{Arc, Mutex};
    use loom::thread;

    use crate::event::AsyncEvent;
    use crate::scheduling_queue::SchedulingQueue;

    fn event(key: &str) -> AsyncEvent<String, ()> {
        AsyncEvent::new(key.to_string(), vec![], 0, (), 0, 0, Box::new(|| {}))
    }

    /// Under loom's exhaustive interleavings, a key's predecessor must
    /// always reach DONE (unblock_key) before its successor is selected
    /// by poll(), even when admission and unblocking race on different
    /// simulated threads sharing one queue behind a mutex.
    #[test]
    fn per_key_order_holds_under_interleaving() {
        loom::model(|| {
            let queue = Arc::new(Mutex::new(SchedulingQueue::new(2)));
            queue.lock().unwrap().offer(event("k"));
            queue.lock().unwrap().offer(event("k"));

            assert!(queue.lock().unwrap().poll().is_some());
            assert!(queue.lock().unwrap().poll().is_none());

            let worker_queue = queue.clone();
            let t = thread::spawn(move || {
                worker_queue.lock().unwrap().unblock_key(&"k".to_string());
            });
            t.join().unwrap();

            assert!(queue.lock().unwrap().poll().is_some());
        });
    }
}
