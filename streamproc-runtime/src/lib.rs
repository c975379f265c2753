//! The driver-thread orchestrator and the per-driver-session pool
//! lifecycle: the parts of the pipeline that plumb [`streamproc_core`]'s
//! data model and [`streamproc_worker`]'s pool into something a host can
//! actually drive.

pub mod coordinator;
pub mod pool_registry;
pub mod track;

pub use coordinator::{verify_opened_stores, DriverCoordinator};
pub use pool_registry::{DriverId, PoolRegistry};
pub use track::{OpenedStores, TrackingHostContext};
