use std::{
    collections::HashMap,
    io,
    sync::{Arc, Mutex},
};

use streamproc_worker::WorkerPool;

/// Identifies one driver thread's session, the unit a pool's lifetime is
/// bound to. Hosts typically key this off the consumer thread name and
/// the partition set it owns; this crate only needs it to be a stable,
/// hashable handle.
pub type DriverId = Arc<str>;

struct Entry {
    pool: Arc<WorkerPool>,
    refcount: usize,
}

/// Lifecycle glue mapping a driver identity to its dedicated worker pool.
///
/// A real deployment wires this through a well-known host configuration
/// key rather than a true process-wide singleton; this type is the
/// registry itself, to be held behind whatever single `Arc` the host's
/// wiring code chooses. Tests are free to instantiate their own.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<DriverId, Entry>>,
}

impl PoolRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool for `driver`, creating one of `size` threads if
    /// none exists yet, and increments its refcount. Every successful
    /// call must be matched by a later [`Self::release`].
    pub fn acquire(&self, driver: DriverId, size: usize) -> io::Result<Arc<WorkerPool>> {
        let mut pools = self.pools.lock().unwrap();
        if let Some(entry) = pools.get_mut(&driver) {
            entry.refcount += 1;
            return Ok(entry.pool.clone());
        }
        let pool = Arc::new(WorkerPool::new(size)?);
        pools.insert(
            driver,
            Entry {
                pool: pool.clone(),
                refcount: 1,
            },
        );
        Ok(pool)
    }

    /// Releases one reference to `driver`'s pool. At the last reference,
    /// removes the entry and tears the pool down on a background thread
    /// so the caller is never blocked waiting on shutdown.
    pub fn release(&self, driver: &DriverId) {
        let removed = {
            let mut pools = self.pools.lock().unwrap();
            match pools.get_mut(driver) {
                Some(entry) => {
                    entry.refcount -= 1;
                    if entry.refcount == 0 {
                        pools.remove(driver)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };
        if let Some(entry) = removed {
            let pool = match Arc::try_unwrap(entry.pool) {
                Ok(pool) => pool,
                Err(_) => {
                    streamproc_log::warn!(
                        "pool for driver still has outstanding handles at registry teardown"
                    );
                    return;
                }
            };
            std::thread::spawn(move || {
                if let Err(panic) = pool.join() {
                    let payload = streamproc_core::error::panic_payload_to_string(&*panic);
                    streamproc_log::error!(payload = payload.as_str(), "worker thread panicked during pool shutdown");
                }
            });
        }
    }

    /// Number of driver identities currently holding a live pool.
    pub fn active_count(&self) -> usize {
        self.pools.lock().unwrap().len()
    }
}
