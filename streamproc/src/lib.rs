//! Async per-key ordered processor runtime.
//!
//! Facade crate re-exporting the public API of the workspace: the data
//! model ([`streamproc_core`]), the worker pool and context router
//! ([`streamproc_worker`]), and the driver coordinator and pool registry
//! ([`streamproc_runtime`]), plus [`AsyncProcessor`], the entry point
//! most integrators actually use.

mod processor;
pub use processor::AsyncProcessor;

pub use streamproc_core::{
    config::RuntimeConfig,
    event::{AsyncEvent, PendingForward, PendingWrite, State, UserCallback},
    AsyncStore, Error, HostContext, OutputRecord, ProcessorId, RecordContext, SchedulingQueue, WriteOp,
};
pub use streamproc_core::{FinalizingQueue, FinalizingSink};

pub use streamproc_worker::{install_worker_delegate, ContextRouter, RoutedContext, WorkerDelegate, WorkerPool};

pub use streamproc_runtime::{verify_opened_stores, DriverCoordinator, DriverId, OpenedStores, PoolRegistry, TrackingHostContext};
