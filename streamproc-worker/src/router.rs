use std::{
    any::Any,
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use streamproc_core::{HostContext, RecordContext};

use crate::delegate::WorkerDelegate;

scoped_tls::scoped_thread_local!(
    static CURRENT_WORKER_DELEGATE: RefCell<Option<Box<dyn Any>>>
);

/// Installs `delegate` as the current thread's worker delegate for the
/// duration of `f`, then runs `f`. Called once per task by the worker
/// loop, wrapping exactly one user callback invocation.
pub fn install_worker_delegate<K, C, R>(delegate: WorkerDelegate<K, C>, f: impl FnOnce() -> R) -> R
where
    K: 'static,
    C: 'static,
{
    let boxed: Box<dyn Any> = Box::new(delegate);
    let cell = RefCell::new(Some(boxed));
    CURRENT_WORKER_DELEGATE.set(&cell, f)
}

/// Per-processor-instance dispatch of host-context calls to the correct
/// delegate, selected by which thread the call executes on.
///
/// Resolution: if the current thread has a worker delegate installed,
/// route there; otherwise route to the driver-thread delegate.
/// [`ContextRouter::enable_processing`] switches from `Setup` (every call
/// routes to the driver delegate, used inside `init`) to `Processing` and
/// is idempotent.
///
/// A single instance is shared between the driver thread and every
/// worker thread that may run this processor's callbacks, so it is
/// `Send + Sync`: the driver delegate lives behind a [`Mutex`] even
/// though it is, by construction, only ever locked from the driver
/// thread (workers resolve entirely through their own thread-local
/// slot and never reach the mutex).
pub struct ContextRouter<K, C> {
    driver_delegate: Mutex<Box<dyn HostContext<C> + Send>>,
    processing: AtomicBool,
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K, C> ContextRouter<K, C>
where
    K: 'static,
    C: RecordContext,
{
    /// Creates a router in `Setup` mode around the driver-thread delegate.
    pub fn new(driver_delegate: Box<dyn HostContext<C> + Send>) -> Self {
        Self {
            driver_delegate: Mutex::new(driver_delegate),
            processing: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    /// Switches the router into `Processing` mode. Idempotent.
    pub fn enable_processing(&self) {
        self.processing.store(true, Ordering::Release);
    }

    /// Runs `f` against whichever delegate resolution selects: the
    /// worker delegate installed on the current thread if one is
    /// present and the router is in `Processing` mode, otherwise the
    /// driver-thread delegate.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut dyn HostContext<C>) -> R) -> R {
        let mut f = Some(f);
        if self.processing.load(Ordering::Acquire) && CURRENT_WORKER_DELEGATE.is_set() {
            let resolved = CURRENT_WORKER_DELEGATE.with(|cell| {
                let mut guard = cell.borrow_mut();
                let delegate = guard
                    .as_mut()
                    .and_then(|any| any.downcast_mut::<WorkerDelegate<K, C>>());
                delegate.map(|delegate| (f.take().unwrap())(delegate))
            });
            if let Some(r) = resolved {
                return r;
            }
        }
        self.with_driver(f.take().unwrap())
    }

    /// Runs `f` against the driver-thread delegate directly, bypassing
    /// thread-identity resolution. Used by the driver coordinator during
    /// finalization, where the call is always meant for the driver
    /// delegate regardless of router mode.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut dyn HostContext<C>) -> R) -> R {
        let mut guard = self.driver_delegate.lock().unwrap();
        f(&mut **guard)
    }
}
