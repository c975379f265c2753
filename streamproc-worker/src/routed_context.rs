use std::{sync::Arc, time::Duration};

use streamproc_core::{AsyncStore, Error, HostContext, OutputRecord, RecordContext};

use crate::router::ContextRouter;

/// The context object handed to user code. Every call is routed through
/// [`ContextRouter::with_current`], so user code sees the driver's
/// context when running on the driver thread (inside `init`/`close`) and
/// a worker's intercepting context when running on a worker thread,
/// without needing to know which.
#[derive(Clone)]
pub struct RoutedContext<K, C> {
    router: Arc<ContextRouter<K, C>>,
}

impl<K, C> RoutedContext<K, C>
where
    K: 'static,
    C: RecordContext,
{
    /// Wraps a router as a user-facing context.
    pub fn new(router: Arc<ContextRouter<K, C>>) -> Self {
        Self { router }
    }
}

impl<K, C> HostContext<C> for RoutedContext<K, C>
where
    K: 'static,
    C: RecordContext,
{
    fn record_context(&self) -> C {
        self.router.with_current(|d| d.record_context())
    }

    fn set_record_context(&mut self, ctx: C) {
        self.router.with_current(|d| d.set_record_context(ctx));
    }

    fn current_stream_time_ms(&self) -> i64 {
        self.router.with_current(|d| d.current_stream_time_ms())
    }

    fn current_system_time_ms(&self) -> i64 {
        self.router.with_current(|d| d.current_system_time_ms())
    }

    fn forward(
        &mut self,
        record: OutputRecord<Vec<u8>, Vec<u8>>,
        child: Option<&str>,
    ) -> Result<(), Error> {
        self.router.with_current(|d| d.forward(record, child))
    }

    fn schedule(&mut self, interval: Duration, callback: Box<dyn FnMut(i64) + Send>) {
        self.router.with_current(|d| d.schedule(interval, callback));
    }

    fn task_id(&self) -> Arc<str> {
        self.router.with_current(|d| d.task_id())
    }

    fn current_node_name(&self) -> Arc<str> {
        self.router.with_current(|d| d.current_node_name())
    }

    fn get_state_store(&self, name: &str) -> Option<Box<dyn AsyncStore>> {
        self.router.with_current(|d| d.get_state_store(name))
    }
}
