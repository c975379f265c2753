/// Errors raised by the scheduling/finalizing pipeline.
///
/// Per the error handling design, user code never observes these directly:
/// a [`Error`] reaching [`crate::AsyncEvent`] machinery or the driver
/// coordinator is fatal to the owning processor instance, with the sole
/// exception of [`Error::UnknownChild`], which is reported synchronously
/// to the call site that produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A state transition was attempted that the [`crate::event::State`]
    /// machine does not allow.
    #[error("invalid event transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// The state the event was in.
        from: crate::event::State,
        /// The state the transition targeted.
        to: crate::event::State,
    },

    /// The same event (by identity) was offered to the scheduling queue
    /// twice.
    #[error("event already present in the scheduling queue")]
    DuplicateOffer,

    /// An operation was attempted while the event was in a state that
    /// does not permit it (e.g. appending a forward outside `PROCESSING`,
    /// or draining pending items outside `FINALIZING`).
    #[error("operation `{operation}` is not valid in state {state:?}")]
    InvalidOperationForState {
        /// Name of the attempted operation.
        operation: &'static str,
        /// The event's current state.
        state: crate::event::State,
    },

    /// After `init` returned, the set of stores the user actually opened
    /// did not match the set declared to the store supplier.
    #[error("declared stores {declared:?} do not match opened stores {opened:?}")]
    StoreMismatch {
        /// Stores declared ahead of time.
        declared: Vec<String>,
        /// Stores the user callback actually opened.
        opened: Vec<String>,
    },

    /// `init` was called more than once on the same processor instance.
    #[error("processor already initialized")]
    AlreadyInitialized,

    /// An operation requiring `init` to have run was attempted first.
    #[error("processor not initialized")]
    NotInitialized,

    /// A forward named a child node the topology does not have.
    #[error("forward to unknown child `{0}`")]
    UnknownChild(String),

    /// The user callback for an event panicked.
    #[error("user callback panicked for key `{key}`: {payload}")]
    CallbackPanicked {
        /// String form of the key that was being processed.
        key: String,
        /// Best-effort string form of the panic payload.
        payload: String,
    },

    /// `flush_and_await`'s blocking wait on the finalizing queue was
    /// interrupted before it could observe a finalized event.
    #[error("flush_and_await was interrupted while waiting for finalization")]
    FinalizeInterrupted,

    /// An event was submitted to a worker pool whose task channel has
    /// already been torn down.
    #[error("worker pool is shut down")]
    PoolShutdown,
}

impl Error {
    /// True for the subset of errors that are fatal to the owning
    /// processor instance rather than reportable to a single call site.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::UnknownChild(_))
    }
}

/// Renders a captured panic payload as a best-effort string.
pub fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
