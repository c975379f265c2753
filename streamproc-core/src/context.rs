//! Host integration seam.
//!
//! The host stream framework and the remote state stores are external
//! collaborators; these traits are the interface between them and the
//! core. A real host, or a test harness, implements them, and the core
//! only ever calls through the trait object.

use std::time::Duration;

/// Opaque host-supplied metadata captured at offer time and restored
/// before any finalization side effect runs.
pub trait RecordContext: Clone + Send + 'static {
    /// Source topic of the record.
    fn topic(&self) -> &str;
    /// Source partition of the record.
    fn partition(&self) -> i32;
    /// Offset of the record within its partition.
    fn offset(&self) -> i64;
    /// Record timestamp, in milliseconds.
    fn timestamp(&self) -> i64;
    /// Record headers, as raw key/value pairs.
    fn headers(&self) -> &[(String, Vec<u8>)];
}

/// An output record produced by a `forward` call.
#[derive(Debug, Clone)]
pub struct OutputRecord<K, V> {
    /// Record key.
    pub key: K,
    /// Record value.
    pub value: V,
    /// Record timestamp, in milliseconds.
    pub timestamp: i64,
}

/// A pending store write: either an upsert or a tombstone.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Upsert `key` to `value`.
    Put {
        /// Key to write.
        key: Vec<u8>,
        /// Value to associate with the key.
        value: Vec<u8>,
        /// Write timestamp, in milliseconds.
        timestamp: i64,
    },
    /// Delete `key` (a tombstone).
    Delete {
        /// Key to delete.
        key: Vec<u8>,
        /// Write timestamp, in milliseconds.
        timestamp: i64,
    },
}

/// The host-facing context that user code observes.
///
/// Implementations come in two flavors, selected by the thread the call
/// executes on: a driver-thread delegate that talks to the real host,
/// and a worker-thread delegate that intercepts side effects into an
/// event's pending lists.
pub trait HostContext<C: RecordContext> {
    /// The record context currently in effect.
    fn record_context(&self) -> C;

    /// Replace the record context currently in effect. Used by the
    /// driver to restore an event's captured context before replaying
    /// its side effects.
    fn set_record_context(&mut self, ctx: C);

    /// Stream-time clock snapshot, in milliseconds.
    fn current_stream_time_ms(&self) -> i64;

    /// System-time clock snapshot, in milliseconds.
    fn current_system_time_ms(&self) -> i64;

    /// Forward a record downstream, optionally to a named child.
    fn forward(&mut self, record: OutputRecord<Vec<u8>, Vec<u8>>, child: Option<&str>) -> Result<(), crate::Error>;

    /// Register a periodic callback on the host's punctuation clock.
    /// Used exactly once, by the driver coordinator, to register the
    /// queue-draining tick.
    fn schedule(&mut self, interval: Duration, callback: Box<dyn FnMut(i64) + Send>);

    /// Stable identifier of the host's processing task.
    fn task_id(&self) -> std::sync::Arc<str>;

    /// Name of the topology node currently executing.
    fn current_node_name(&self) -> std::sync::Arc<str>;

    /// Look up a state store the processor declared at build time.
    fn get_state_store(&self, name: &str) -> Option<Box<dyn AsyncStore>>;
}

/// An async-wrapped state store.
///
/// `get` always reads the real underlying store; `put`/`delete` are
/// intercepted while an event is `PROCESSING` and only reach the
/// underlying store during finalization.
pub trait AsyncStore: Send + Sync {
    /// Name of the store, as declared to the store builder.
    fn name(&self) -> &str;

    /// Read a key. Reflects only finalized state.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Apply a write directly against the underlying store. Called only
    /// during finalization, never from a worker thread.
    fn apply(&self, op: WriteOp);

    /// Range scan over the underlying store.
    fn range(&self, from: &[u8], to: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;
}
