use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::Hash,
    sync::Arc,
};

use streamproc_core::{AsyncStore, Error, HostContext, ProcessorId, RecordContext, RuntimeConfig, UserCallback};
use streamproc_runtime::{verify_opened_stores, DriverCoordinator, OpenedStores, TrackingHostContext};
use streamproc_worker::{ContextRouter, RoutedContext, WorkerPool};

/// Top-level entry point implementing the host's processor contract:
/// `init` once, `process` per record, `close` at end of life. Wires a
/// [`DriverCoordinator`] to a [`ContextRouter`] whose
/// driver delegate is wrapped in a [`TrackingHostContext`] so `init`-time
/// store verification can run without the caller managing it by hand.
pub struct AsyncProcessor<K, C> {
    coordinator: DriverCoordinator<K, C>,
    router: Arc<ContextRouter<K, C>>,
    opened_stores: OpenedStores,
    declared_stores: HashSet<String>,
    initialized: bool,
}

impl<K, C> AsyncProcessor<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    C: RecordContext,
{
    /// Builds a processor around a real driver-thread context. `pool` is
    /// `None` when `RuntimeConfig::is_async_enabled` is false, in which
    /// case callbacks run inline on the driver thread rather than
    /// standing up a one-thread pool.
    pub fn new(
        processor_id: ProcessorId,
        config: RuntimeConfig,
        driver_context: impl HostContext<C> + Send + 'static,
        pool: Option<Arc<WorkerPool>>,
        known_children: Arc<HashSet<String>>,
        stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
        task_id: Arc<str>,
        declared_stores: HashSet<String>,
    ) -> Self {
        let (tracked, opened_stores) = TrackingHostContext::new(driver_context);
        let router = Arc::new(ContextRouter::new(Box::new(tracked)));
        let coordinator = DriverCoordinator::new(processor_id, config, router.clone(), pool, known_children, stores, task_id);
        Self {
            coordinator,
            router,
            opened_stores,
            declared_stores,
            initialized: false,
        }
    }

    /// Runs the user's `init` exactly once, against a context routed
    /// through the driver delegate (the router starts in setup mode, so
    /// every call during `init` reaches the driver regardless of which
    /// thread runs it). Verifies the opened-store set against the
    /// declared one before switching the router into processing mode.
    pub fn init(&mut self, init_fn: impl FnOnce(RoutedContext<K, C>) -> Result<(), Error>) -> Result<(), Error> {
        if self.initialized {
            return Err(Error::AlreadyInitialized);
        }
        init_fn(RoutedContext::new(self.router.clone()))?;
        verify_opened_stores(&self.declared_stores, &self.opened_stores.snapshot())?;
        self.router.enable_processing();
        self.initialized = true;
        Ok(())
    }

    /// Offers one input record. Rejects the call if `init` has not run.
    pub fn process(&mut self, key: K, input_record: Vec<u8>, partition: i32, user_callback: UserCallback) -> Result<(), Error> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        self.coordinator.process(key, input_record, partition, user_callback)
    }

    /// The periodic tick registered during `init`: one non-blocking pass
    /// over both queues.
    pub fn on_tick(&mut self) -> Result<(), Error> {
        self.coordinator.on_tick()
    }

    /// Blocks until every offered event has reached `DONE`.
    pub fn flush_and_await(&mut self) -> Result<(), Error> {
        self.coordinator.flush_and_await()
    }

    /// Number of events offered but not yet `DONE`.
    pub fn pending_events(&self) -> usize {
        self.coordinator.pending_events()
    }

    /// A thread-transparent context handle for user callbacks to close
    /// over. Every call through it resolves to the worker delegate
    /// installed on whichever thread actually invokes it, or to the
    /// driver delegate otherwise; callers typically clone this once and
    /// capture it in every `process` callback.
    pub fn context_handle(&self) -> RoutedContext<K, C> {
        RoutedContext::new(self.router.clone())
    }

    /// Ends the processor's life. Does not wait for pending events; the
    /// host is expected to have called `flush_and_await` first.
    pub fn close(&mut self) {
        self.coordinator.close();
    }
}
