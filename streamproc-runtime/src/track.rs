use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use streamproc_core::{AsyncStore, Error, HostContext, OutputRecord, RecordContext};

/// Wraps a driver-thread context and records every store name opened
/// through it via `get_state_store`, so `init`-time verification can
/// compare the opened set against the declared one.
///
/// Kept `Send` (via `Arc<Mutex<_>>` rather than `Rc<RefCell<_>>`) so it
/// can be boxed into a [`crate::ContextRouter`]'s driver delegate slot.
pub struct TrackingHostContext<C, Inner> {
    inner: Inner,
    opened: Arc<Mutex<HashSet<String>>>,
    _marker: std::marker::PhantomData<C>,
}

impl<C, Inner> TrackingHostContext<C, Inner>
where
    Inner: HostContext<C>,
    C: RecordContext,
{
    /// Wraps `inner`, sharing the opened-store set with the returned
    /// handle so it can be inspected after `init` returns.
    pub fn new(inner: Inner) -> (Self, OpenedStores) {
        let opened = Arc::new(Mutex::new(HashSet::new()));
        (
            Self {
                inner,
                opened: opened.clone(),
                _marker: std::marker::PhantomData,
            },
            OpenedStores(opened),
        )
    }
}

/// A handle to the set of store names opened through a
/// [`TrackingHostContext`].
#[derive(Clone)]
pub struct OpenedStores(Arc<Mutex<HashSet<String>>>);

impl OpenedStores {
    /// Snapshot of the store names opened so far.
    pub fn snapshot(&self) -> HashSet<String> {
        self.0.lock().unwrap().clone()
    }
}

impl<C, Inner> HostContext<C> for TrackingHostContext<C, Inner>
where
    Inner: HostContext<C>,
    C: RecordContext,
{
    fn record_context(&self) -> C {
        self.inner.record_context()
    }

    fn set_record_context(&mut self, ctx: C) {
        self.inner.set_record_context(ctx);
    }

    fn current_stream_time_ms(&self) -> i64 {
        self.inner.current_stream_time_ms()
    }

    fn current_system_time_ms(&self) -> i64 {
        self.inner.current_system_time_ms()
    }

    fn forward(
        &mut self,
        record: OutputRecord<Vec<u8>, Vec<u8>>,
        child: Option<&str>,
    ) -> Result<(), Error> {
        self.inner.forward(record, child)
    }

    fn schedule(&mut self, interval: Duration, callback: Box<dyn FnMut(i64) + Send>) {
        self.inner.schedule(interval, callback);
    }

    fn task_id(&self) -> std::sync::Arc<str> {
        self.inner.task_id()
    }

    fn current_node_name(&self) -> std::sync::Arc<str> {
        self.inner.current_node_name()
    }

    fn get_state_store(&self, name: &str) -> Option<Box<dyn AsyncStore>> {
        let store = self.inner.get_state_store(name);
        if store.is_some() {
            self.opened.lock().unwrap().insert(name.to_string());
        }
        store
    }
}
