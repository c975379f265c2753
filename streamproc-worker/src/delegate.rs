use std::{collections::HashSet, sync::Arc, time::Duration};

use streamproc_core::{
    event::{AsyncEvent, PendingForward, PendingWrite},
    AsyncStore, Error, HostContext, OutputRecord, RecordContext, WriteOp,
};

/// The context delegate installed on a worker thread for the duration of
/// exactly one user callback.
///
/// `forward` and store writes are intercepted into the event's pending
/// lists instead of touching the host; `store.get` reads the real backing
/// store directly; metadata queries answer from the snapshot taken at
/// offer time, never the live host.
///
/// Holds a non-owning pointer to the event being processed, valid only
/// for the lifetime of the callback that installed this delegate.
pub struct WorkerDelegate<K, C> {
    event: *mut AsyncEvent<K, C>,
    known_children: Arc<HashSet<String>>,
    stores: Arc<std::collections::HashMap<String, Arc<dyn AsyncStore>>>,
    task_id: Arc<str>,
    node_name: Arc<str>,
}

// SAFETY: the raw `event` pointer is only ever dereferenced on the single
// worker thread that is currently executing the callback this delegate was
// created for; the pool never shares a `WorkerDelegate` across threads or
// retains it past that callback's return.
unsafe impl<K, C> Send for WorkerDelegate<K, C> {}

impl<K, C> WorkerDelegate<K, C> {
    /// # Safety
    /// `event` must remain valid (i.e. its owner must not move or drop it)
    /// for as long as this delegate is installed as the current worker
    /// delegate.
    pub unsafe fn new(
        event: *mut AsyncEvent<K, C>,
        known_children: Arc<HashSet<String>>,
        stores: Arc<std::collections::HashMap<String, Arc<dyn AsyncStore>>>,
        task_id: Arc<str>,
        node_name: Arc<str>,
    ) -> Self {
        Self {
            event,
            known_children,
            stores,
            task_id,
            node_name,
        }
    }

    fn event(&mut self) -> &mut AsyncEvent<K, C> {
        // SAFETY: see the invariant documented on `Self::new` and the
        // `unsafe impl Send` above.
        unsafe { &mut *self.event }
    }
}

impl<K: 'static, C: RecordContext> HostContext<C> for WorkerDelegate<K, C> {
    fn record_context(&self) -> C {
        // SAFETY: read-only access for the duration of the callback.
        unsafe { &*self.event }.record_context.clone()
    }

    fn set_record_context(&mut self, ctx: C) {
        self.event().record_context = ctx;
    }

    fn current_stream_time_ms(&self) -> i64 {
        unsafe { &*self.event }.stream_time_at_offer
    }

    fn current_system_time_ms(&self) -> i64 {
        unsafe { &*self.event }.system_time_at_offer
    }

    fn forward(
        &mut self,
        record: OutputRecord<Vec<u8>, Vec<u8>>,
        child: Option<&str>,
    ) -> Result<(), Error> {
        if let Some(child) = child {
            if !self.known_children.contains(child) {
                return Err(Error::UnknownChild(child.to_string()));
            }
        }
        let child = child.map(|s| s.to_string());
        self.event()
            .append_forward(PendingForward { child, record })
    }

    fn schedule(&mut self, _interval: Duration, _callback: Box<dyn FnMut(i64) + Send>) {
        streamproc_log::warn!(
            "schedule() called from a worker thread; the periodic tick is registered once \
             during init on the driver thread and this call is ignored"
        );
    }

    fn task_id(&self) -> Arc<str> {
        self.task_id.clone()
    }

    fn current_node_name(&self) -> Arc<str> {
        self.node_name.clone()
    }

    fn get_state_store(&self, name: &str) -> Option<Box<dyn AsyncStore>> {
        self.stores.get(name).map(|inner| {
            Box::new(InterceptingStore {
                name: name.to_string(),
                inner: inner.clone(),
                event: self.event,
            }) as Box<dyn AsyncStore>
        })
    }
}

/// An async-wrapped store as seen from inside a user callback: reads go
/// straight to the backing store, writes are captured as pending events.
struct InterceptingStore<K, C> {
    name: String,
    inner: Arc<dyn AsyncStore>,
    event: *mut AsyncEvent<K, C>,
}

// SAFETY: same reasoning as `WorkerDelegate`'s `Send` impl.
unsafe impl<K, C> Send for InterceptingStore<K, C> {}

// SAFETY: same reasoning as `WorkerDelegate`'s `Send` impl above; the raw
// `event` pointer is only ever dereferenced on the single worker thread
// that is currently executing the callback this store was created for.
unsafe impl<K, C> Sync for InterceptingStore<K, C> {}

impl<K, C> AsyncStore for InterceptingStore<K, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(key)
    }

    fn apply(&self, op: WriteOp) {
        // SAFETY: see `WorkerDelegate::event`.
        let event = unsafe { &mut *self.event };
        // A misuse of `apply` outside `PROCESSING` is a programming error
        // that should never occur: `InterceptingStore` is only ever handed
        // out while the owning event is being processed.
        event
            .append_write(PendingWrite {
                store: self.name.clone(),
                op,
            })
            .expect("store write intercepted outside PROCESSING");
    }

    fn range(&self, from: &[u8], to: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.inner.range(from, to)
    }
}
