//! The worker pool and context router: the parts of the pipeline that
//! run user callbacks off the driver thread and make the host context
//! transparently follow the calling thread.

pub mod delegate;
pub mod pool;
pub mod router;

pub use delegate::WorkerDelegate;
pub use pool::{run_inline, WorkerPool};
pub use router::{install_worker_delegate, ContextRouter};

mod routed_context;
pub use routed_context::RoutedContext;

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc, time::Duration};

    use streamproc_core::{
        event::{AsyncEvent, State},
        FinalizingQueue,
    };

    use super::*;

    #[test]
    fn pool_runs_callback_and_intercepts_forward() {
        let pool = WorkerPool::new(1).unwrap();
        let queue: FinalizingQueue<String, ()> = FinalizingQueue::new();
        let sink = queue.sender();

        let event = AsyncEvent::new(
            "k".to_string(),
            vec![],
            0,
            (),
            0,
            0,
            Box::new(|| {
                // The callback itself doesn't touch the context in this
                // unit test; interception is exercised end-to-end in
                // streamproc's integration tests.
            }),
        );

        pool.schedule_for_processing(
            streamproc_core::ProcessorId::new("test", 0),
            vec![event],
            sink,
            Arc::new(Default::default()),
            Arc::new(HashMap::new()),
            Arc::from("task-0"),
        )
        .unwrap();

        let finished = queue.wait_next(Duration::from_secs(1)).unwrap().unwrap();
        assert_eq!(finished.state(), State::ToFinalize);
        assert!(finished.callback_error.is_none());
        pool.join().unwrap();
    }

    #[test]
    fn pool_captures_panics() {
        let pool = WorkerPool::new(1).unwrap();
        let queue: FinalizingQueue<String, ()> = FinalizingQueue::new();
        let sink = queue.sender();

        let event = AsyncEvent::new(
            "k".to_string(),
            vec![],
            0,
            (),
            0,
            0,
            Box::new(|| panic!("boom")),
        );

        pool.schedule_for_processing(
            streamproc_core::ProcessorId::new("test", 0),
            vec![event],
            sink,
            Arc::new(Default::default()),
            Arc::new(HashMap::new()),
            Arc::from("task-0"),
        )
        .unwrap();

        let finished = queue.wait_next(Duration::from_secs(1)).unwrap().unwrap();
        assert!(matches!(
            finished.callback_error,
            Some(streamproc_core::Error::CallbackPanicked { .. })
        ));
        pool.join().unwrap();
    }
}
