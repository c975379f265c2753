use std::{
    collections::{HashMap, HashSet},
    fmt,
    hash::Hash,
    sync::Arc,
    time::Duration,
};

use streamproc_core::{
    event::{PendingForward, PendingWrite},
    AsyncEvent, AsyncStore, Error, FinalizingQueue, HostContext, ProcessorId, RecordContext,
    RuntimeConfig, SchedulingQueue, State, UserCallback,
};
use streamproc_worker::{run_inline, ContextRouter, WorkerPool};

/// The single-threaded, owner-thread orchestrator tying the scheduling
/// queue, the finalizing queue and a worker pool together into the
/// offer -> drain-schedule -> drain-finalize pipeline.
///
/// A coordinator never locks against itself: every method here runs on
/// the driver thread, and the only cross-thread conduits it touches are
/// [`FinalizingQueue`] and the pool's task channel, both owned elsewhere.
pub struct DriverCoordinator<K, C> {
    processor_id: ProcessorId,
    config: RuntimeConfig,
    scheduling_queue: SchedulingQueue<K, C>,
    finalizing_queue: FinalizingQueue<K, C>,
    pool: Option<Arc<WorkerPool>>,
    router: Arc<ContextRouter<K, C>>,
    known_children: Arc<HashSet<String>>,
    stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
    task_id: Arc<str>,
    pending_events: usize,
    /// Set once a programming error or a user-callback panic has been
    /// surfaced; every subsequent `process` call is rejected with a clone
    /// of this error, since such failures are fatal to the processor
    /// instance.
    fatal: Option<Error>,
}

impl<K, C> DriverCoordinator<K, C>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + 'static,
    C: RecordContext,
{
    /// Builds a coordinator for one processor instance. `pool` is `None`
    /// when `async_pool_size == 0`; callbacks then run inline on the
    /// driver thread via [`run_inline`].
    pub fn new(
        processor_id: ProcessorId,
        config: RuntimeConfig,
        router: Arc<ContextRouter<K, C>>,
        pool: Option<Arc<WorkerPool>>,
        known_children: Arc<HashSet<String>>,
        stores: Arc<HashMap<String, Arc<dyn AsyncStore>>>,
        task_id: Arc<str>,
    ) -> Self {
        Self {
            scheduling_queue: SchedulingQueue::new(config.async_max_events_per_key.get()),
            finalizing_queue: FinalizingQueue::new(),
            pool,
            router,
            config,
            processor_id,
            known_children,
            stores,
            task_id,
            pending_events: 0,
            fatal: None,
        }
    }

    /// Number of events offered but not yet `DONE`.
    pub fn pending_events(&self) -> usize {
        self.pending_events
    }

    /// Offers one input record for processing.
    ///
    /// Snapshots record context and clocks from the driver delegate,
    /// constructs the event, applies backpressure against the per-key
    /// admission cap, offers it to the scheduling queue, then runs one
    /// non-blocking pass over both queues.
    pub fn process(
        &mut self,
        key: K,
        input_record: Vec<u8>,
        partition: i32,
        user_callback: UserCallback,
    ) -> Result<(), Error> {
        self.check_fatal()?;

        let (ctx, stream_time, system_time) = self.router.with_driver(|d| {
            (
                d.record_context(),
                d.current_stream_time_ms(),
                d.current_system_time_ms(),
            )
        });

        let event = AsyncEvent::new(key.clone(), input_record, partition, ctx, stream_time, system_time, user_callback);
        self.pending_events += 1;

        while self.scheduling_queue.key_queue_is_full(&key) {
            self.drain_scheduling_queue()?;
            if self.scheduling_queue.key_queue_is_full(&key) {
                self.finalize_at_least_one()?;
            }
        }

        self.scheduling_queue.offer(event);
        self.execute_available_events()
    }

    /// One non-blocking pass: finalize whatever is ready, then dispatch
    /// whatever that unblocked. Finalizing first can only enlarge the set
    /// of processable events, never shrink it, so running schedule first
    /// would waste a pass.
    pub fn execute_available_events(&mut self) -> Result<(), Error> {
        self.drain_finalizing_queue()?;
        self.drain_scheduling_queue()?;
        Ok(())
    }

    /// Polls every currently processable event out of the scheduling
    /// queue, transitions each to `TO_PROCESS`, and dispatches the whole
    /// batch in one call. Returns the number scheduled.
    pub fn drain_scheduling_queue(&mut self) -> Result<usize, Error> {
        let mut batch = Vec::new();
        while let Some(mut event) = self.scheduling_queue.poll() {
            event.transition(State::ToProcess)?;
            batch.push(event);
        }
        if batch.is_empty() {
            return Ok(0);
        }
        let scheduled = batch.len();
        match &self.pool {
            Some(pool) => {
                let sink = self.finalizing_queue.sender();
                pool.schedule_for_processing(
                    self.processor_id.clone(),
                    batch,
                    sink,
                    self.known_children.clone(),
                    self.stores.clone(),
                    self.task_id.clone(),
                )?;
            }
            None => {
                // No pool to hand events off to, so there is no one else to
                // drain the finalizing queue: finalize each one here and
                // now rather than round-tripping it through the channel.
                for event in batch {
                    let finalized = run_inline(
                        event,
                        self.known_children.clone(),
                        self.stores.clone(),
                        self.task_id.clone(),
                        self.processor_id.name.clone(),
                    );
                    self.finalize_event(finalized)?;
                }
            }
        }
        Ok(scheduled)
    }

    /// Drains every event currently sitting in the finalizing queue,
    /// without blocking for more to arrive.
    pub fn drain_finalizing_queue(&mut self) -> Result<(), Error> {
        while let Some(event) = self.finalizing_queue.try_next() {
            self.finalize_event(event)?;
        }
        Ok(())
    }

    /// Finalizes whatever is already buffered; if nothing was, blocks for
    /// the next one to arrive and finalizes that.
    pub fn finalize_at_least_one(&mut self) -> Result<(), Error> {
        if let Some(event) = self.finalizing_queue.try_next() {
            return self.finalize_event(event);
        }
        let poll_slice = self.config.async_flush_interval.max(Duration::from_millis(1));
        loop {
            if let Some(event) = self.finalizing_queue.wait_next(poll_slice)? {
                return self.finalize_event(event);
            }
        }
    }

    /// Blocks until every offered event has reached `DONE`. The host
    /// calls this before committing offsets.
    pub fn flush_and_await(&mut self) -> Result<(), Error> {
        while self.pending_events > 0 {
            self.drain_scheduling_queue()?;
            self.finalize_at_least_one()?;
        }
        Ok(())
    }

    /// The periodic tick registered by `init`: just runs one non-blocking
    /// pass, bounding finalization latency when no new record arrives.
    pub fn on_tick(&mut self) -> Result<(), Error> {
        self.execute_available_events()
    }

    /// Logs a warning if events are still pending (expected only on a
    /// dirty shutdown). Tick cancellation and pool/flush-listener
    /// deregistration are host-specific and handled by the caller before
    /// or after this returns; closing never blocks.
    pub fn close(&mut self) {
        if self.pending_events > 0 {
            streamproc_log::warn!(
                processor_id = %self.processor_id,
                pending = self.pending_events,
                "close() called with events still pending; expected only on a dirty shutdown"
            );
        }
    }

    fn finalize_event(&mut self, mut event: AsyncEvent<K, C>) -> Result<(), Error> {
        event.transition(State::Finalizing)?;
        self.router
            .with_driver(|d| d.set_record_context(event.record_context.clone()));

        if let Some(err) = event.callback_error.take() {
            self.scheduling_queue.unblock_key(&event.input_key);
            self.pending_events = self.pending_events.saturating_sub(1);
            self.fatal = Some(err.clone());
            return Err(err);
        }

        loop {
            let forward = event.next_forward()?;
            let write = event.next_write()?;
            if forward.is_none() && write.is_none() {
                break;
            }
            if let Some(PendingForward { child, record }) = forward {
                self.router
                    .with_driver(|d| d.forward(record, child.as_deref()))?;
            }
            if let Some(PendingWrite { store, op }) = write {
                if let Some(store) = self.stores.get(&store) {
                    store.apply(op);
                }
            }
        }

        event.transition(State::Done)?;
        self.scheduling_queue.unblock_key(&event.input_key);
        self.pending_events = self.pending_events.saturating_sub(1);
        Ok(())
    }

    fn check_fatal(&self) -> Result<(), Error> {
        match &self.fatal {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Compares the store names actually opened during `init` (tracked via
/// [`crate::track::TrackingHostContext`]) against the set declared ahead
/// of time. Call once, immediately after the user's `init` returns.
pub fn verify_opened_stores(declared: &HashSet<String>, opened: &HashSet<String>) -> Result<(), Error> {
    if declared == opened {
        Ok(())
    } else {
        let mut declared: Vec<_> = declared.iter().cloned().collect();
        let mut opened: Vec<_> = opened.iter().cloned().collect();
        declared.sort();
        opened.sort();
        Err(Error::StoreMismatch { declared, opened })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use streamproc_core::{config::RuntimeConfig, AsyncStore, Error, HostContext, OutputRecord, RecordContext, WriteOp};
    use streamproc_worker::{ContextRouter, WorkerPool};

    use super::*;

    #[derive(Clone)]
    struct TestContext {
        headers: Arc<Vec<(String, Vec<u8>)>>,
    }

    impl RecordContext for TestContext {
        fn topic(&self) -> &str {
            "t"
        }
        fn partition(&self) -> i32 {
            0
        }
        fn offset(&self) -> i64 {
            0
        }
        fn timestamp(&self) -> i64 {
            0
        }
        fn headers(&self) -> &[(String, Vec<u8>)] {
            &self.headers
        }
    }

    struct RecordingDriver {
        record_context: TestContext,
        forwarded: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl HostContext<TestContext> for RecordingDriver {
        fn record_context(&self) -> TestContext {
            self.record_context.clone()
        }
        fn set_record_context(&mut self, ctx: TestContext) {
            self.record_context = ctx;
        }
        fn current_stream_time_ms(&self) -> i64 {
            0
        }
        fn current_system_time_ms(&self) -> i64 {
            0
        }
        fn forward(&mut self, record: OutputRecord<Vec<u8>, Vec<u8>>, _child: Option<&str>) -> Result<(), Error> {
            self.forwarded.lock().unwrap().push(record.key);
            Ok(())
        }
        fn schedule(&mut self, _interval: Duration, _callback: Box<dyn FnMut(i64) + Send>) {}
        fn task_id(&self) -> Arc<str> {
            Arc::from("task")
        }
        fn current_node_name(&self) -> Arc<str> {
            Arc::from("node")
        }
        fn get_state_store(&self, _name: &str) -> Option<Box<dyn AsyncStore>> {
            None
        }
    }

    struct CountingStore {
        name: String,
        writes: Arc<AtomicUsize>,
    }

    impl AsyncStore for CountingStore {
        fn name(&self) -> &str {
            &self.name
        }
        fn get(&self, _key: &[u8]) -> Option<Vec<u8>> {
            None
        }
        fn apply(&self, _op: WriteOp) {
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        fn range(&self, _from: &[u8], _to: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
            vec![]
        }
    }

    fn new_coordinator(
        pool_size: usize,
        forwarded: Arc<Mutex<Vec<Vec<u8>>>>,
        writes: Arc<AtomicUsize>,
    ) -> DriverCoordinator<String, TestContext> {
        let driver = RecordingDriver {
            record_context: TestContext {
                headers: Arc::new(vec![]),
            },
            forwarded,
        };
        let router = Arc::new(ContextRouter::new(Box::new(driver)));
        let pool = if pool_size == 0 {
            None
        } else {
            Some(Arc::new(WorkerPool::new(pool_size).unwrap()))
        };
        let mut stores: HashMap<String, Arc<dyn AsyncStore>> = HashMap::new();
        stores.insert(
            "s".to_string(),
            Arc::new(CountingStore {
                name: "s".to_string(),
                writes,
            }),
        );
        DriverCoordinator::new(
            ProcessorId::new("test", 0),
            RuntimeConfig {
                async_pool_size: pool_size,
                ..RuntimeConfig::default()
            },
            router,
            pool,
            Arc::new(HashSet::new()),
            Arc::new(stores),
            Arc::from("task-0"),
        )
    }

    #[test]
    fn synchronous_fallback_finalizes_without_a_pool() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let writes = Arc::new(AtomicUsize::new(0));
        let mut coordinator = new_coordinator(0, forwarded.clone(), writes.clone());

        coordinator
            .process(
                "k".to_string(),
                vec![],
                0,
                Box::new(|| {}),
            )
            .unwrap();

        assert_eq!(coordinator.pending_events(), 0);
    }

    #[test]
    fn pooled_events_reach_done_via_flush_and_await() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let writes = Arc::new(AtomicUsize::new(0));
        let mut coordinator = new_coordinator(2, forwarded.clone(), writes.clone());

        for i in 0..5u8 {
            coordinator
                .process(format!("key-{}", i % 2), vec![i], 0, Box::new(|| {}))
                .unwrap();
        }
        coordinator.flush_and_await().unwrap();
        assert_eq!(coordinator.pending_events(), 0);
    }

    #[test]
    fn per_key_admission_cap_applies_backpressure() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let writes = Arc::new(AtomicUsize::new(0));
        let mut coordinator = new_coordinator(1, forwarded, writes);

        for _ in 0..3u8 {
            coordinator
                .process("k".to_string(), vec![], 0, Box::new(|| {}))
                .unwrap();
        }
        assert_eq!(coordinator.pending_events(), 0);
    }

    #[test]
    fn callback_panic_is_fatal_to_the_instance() {
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let writes = Arc::new(AtomicUsize::new(0));
        let mut coordinator = new_coordinator(1, forwarded, writes);

        let err = coordinator
            .process("k".to_string(), vec![], 0, Box::new(|| panic!("boom")))
            .and_then(|_| coordinator.flush_and_await());
        assert!(err.is_err());

        let second = coordinator.process("k2".to_string(), vec![], 0, Box::new(|| {}));
        assert!(matches!(second, Err(Error::CallbackPanicked { .. })));
    }

    #[test]
    fn verify_opened_stores_matches_declared_set() {
        let declared: HashSet<String> = ["a".to_string(), "b".to_string()].into_iter().collect();
        let opened = declared.clone();
        assert!(verify_opened_stores(&declared, &opened).is_ok());

        let mismatched: HashSet<String> = ["a".to_string()].into_iter().collect();
        assert!(matches!(
            verify_opened_stores(&declared, &mismatched),
            Err(Error::StoreMismatch { .. })
        ));
    }
}
