use std::{
    collections::{HashMap, HashSet},
    fmt,
    io,
    panic::AssertUnwindSafe,
    sync::Arc,
    thread::{available_parallelism, JoinHandle},
};

use streamproc_core::{
    error::panic_payload_to_string,
    event::{AsyncEvent, State},
    AsyncStore, Error, FinalizingSink, ProcessorId,
};

use crate::{delegate::WorkerDelegate, router::install_worker_delegate};

type Job = Box<dyn FnOnce() + Send>;

/// A fixed pool of worker threads that run user callbacks and route
/// their side effects into per-event pending lists.
///
/// Shared across every processor instance on one driver: the pool itself
/// holds no per-instance state, only a task channel.
pub struct WorkerPool {
    sender: flume::Sender<Job>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns a pool with `size` worker threads. `size == 0` is rejected;
    /// callers that want synchronous execution should not construct a
    /// pool at all (see `RuntimeConfig::is_async_enabled`).
    pub fn new(size: usize) -> io::Result<Self> {
        let size = if size == 0 {
            available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            size
        };
        let (sender, receiver) = flume::unbounded::<Job>();
        let threads = (0..size)
            .map(|index| {
                let receiver = receiver.clone();
                std::thread::Builder::new()
                    .name(format!("streamproc-worker-{index}"))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            job();
                        }
                    })
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self { sender, threads })
    }

    /// Submits a batch of events belonging to `processor_id` for
    /// processing. Each event is pushed onto the shared task channel and
    /// claimed FIFO by whichever worker is idle first; within the batch,
    /// no ordering across different keys is implied once they reach the
    /// pool: no cross-key ordering is promised once events reach here.
    pub fn schedule_for_processing<K, C>(
        &self,
        processor_id: ProcessorId,
        events: Vec<AsyncEvent<K, C>>,
        sink: FinalizingSink<K, C>,
        known_children: Arc<HashSet<String>>,
        stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
        task_id: Arc<str>,
    ) -> Result<(), Error>
    where
        K: fmt::Debug + Send + 'static,
        C: Send + 'static,
    {
        for event in events {
            let sink = sink.clone();
            let known_children = known_children.clone();
            let stores = stores.clone();
            let task_id = task_id.clone();
            let node_name: Arc<str> = processor_id.name.clone();
            let job: Job = Box::new(move || {
                let event = run_one(event, known_children, stores, task_id, node_name);
                sink.submit(event);
            });
            self.sender.send(job).map_err(|_| Error::PoolShutdown)?;
        }
        Ok(())
    }

    /// Initiates shutdown: drops the sending half so worker loops exit
    /// once their queue drains, then joins every thread. A driver
    /// session's shutdown does not need to be blocking from the host's
    /// perspective, but this call itself blocks until the threads have
    /// actually stopped; callers that want fire-and-forget shutdown
    /// should run it on a separate thread.
    pub fn join(self) -> std::thread::Result<()> {
        drop(self.sender);
        for handle in self.threads {
            handle.join()?;
        }
        Ok(())
    }
}

/// Runs one event's callback synchronously on the calling thread, with no
/// pool involved at all, and returns it already transitioned to
/// `TO_FINALIZE`. Used by the driver coordinator when `async_pool_size ==
/// 0`, so the caller can finalize it immediately instead of handing it off
/// to a channel only it is reading from.
pub fn run_inline<K, C>(
    event: AsyncEvent<K, C>,
    known_children: Arc<HashSet<String>>,
    stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
    task_id: Arc<str>,
    node_name: Arc<str>,
) -> AsyncEvent<K, C>
where
    K: fmt::Debug + 'static,
    C: 'static,
{
    run_one(event, known_children, stores, task_id, node_name)
}

fn run_one<K, C>(
    mut event: AsyncEvent<K, C>,
    known_children: Arc<HashSet<String>>,
    stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
    task_id: Arc<str>,
    node_name: Arc<str>,
) -> AsyncEvent<K, C>
where
    K: fmt::Debug + 'static,
    C: 'static,
{
    event
        .transition(State::Processing)
        .expect("scheduler only dispatches events in TO_PROCESS");

    let callback = event
        .user_callback
        .take()
        .expect("user_callback consumed more than once");

    let event_ptr: *mut AsyncEvent<K, C> = &mut event;
    // SAFETY: `event` outlives this whole function call, and the
    // delegate (and anything it hands out, like intercepting stores) is
    // dropped before `event` is returned to the caller below.
    let delegate = unsafe { WorkerDelegate::new(event_ptr, known_children, stores, task_id, node_name) };

    let outcome = install_worker_delegate(delegate, move || {
        std::panic::catch_unwind(AssertUnwindSafe(callback))
    });

    if let Err(payload) = outcome {
        event.callback_error = Some(Error::CallbackPanicked {
            key: format!("{:?}", event.input_key),
            payload: panic_payload_to_string(&*payload),
        });
    }

    event
        .transition(State::ToFinalize)
        .expect("fatal: event left PROCESSING in an unexpected state");
    event
}
