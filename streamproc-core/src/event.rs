use crate::{
    context::{OutputRecord, WriteOp},
    error::Error,
};

/// Lifecycle state of an [`AsyncEvent`].
///
/// Transitions are strictly monotonic in the order listed here; any other
/// transition is a programming error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Constructed, not yet offered to the scheduling queue.
    Created,
    /// Offered and selected; queued for dispatch to a worker.
    ToProcess,
    /// Executing the user callback on a worker thread.
    Processing,
    /// Callback finished; waiting to be picked up by the finalizing drain.
    ToFinalize,
    /// Replaying intercepted side effects on the driver thread.
    Finalizing,
    /// Terminal: all side effects applied, key unblocked.
    Done,
}

impl State {
    fn rank(self) -> u8 {
        match self {
            State::Created => 0,
            State::ToProcess => 1,
            State::Processing => 2,
            State::ToFinalize => 3,
            State::Finalizing => 4,
            State::Done => 5,
        }
    }

    fn allows(self, target: State) -> bool {
        target.rank() == self.rank() + 1
    }
}

/// A deferred `forward` call, intercepted while the event was `PROCESSING`.
#[derive(Debug, Clone)]
pub struct PendingForward {
    /// Name of the child node to forward to, or `None` for all children.
    pub child: Option<String>,
    /// The record to forward.
    pub record: OutputRecord<Vec<u8>, Vec<u8>>,
}

/// A deferred store write, intercepted while the event was `PROCESSING`.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    /// Name of the target store.
    pub store: String,
    /// The write to apply.
    pub op: WriteOp,
}

/// A zero-argument action that runs the user's process logic for one
/// record when invoked.
pub type UserCallback = Box<dyn FnOnce() + Send>;

/// The unit of work carried through the scheduling/worker/finalizing
/// pipeline.
///
/// `pending_forwards` and `pending_writes` are independent ordered lists:
/// they are appended only while `PROCESSING` and drained only while
/// `FINALIZING`, and the event is reachable from at most one queue at a
/// time (ownership moves with the event as it crosses stages).
pub struct AsyncEvent<K, C> {
    /// Key of the input record.
    pub input_key: K,
    /// Raw payload of the input record.
    pub input_record: Vec<u8>,
    /// Partition the record was read from.
    pub partition: i32,
    /// Record context snapshotted at offer time.
    pub record_context: C,
    /// Stream-time clock snapshot at offer time, in milliseconds.
    pub stream_time_at_offer: i64,
    /// System-time clock snapshot at offer time, in milliseconds.
    pub system_time_at_offer: i64,
    /// The user's process logic, consumed the first time the worker
    /// runs it.
    pub user_callback: Option<UserCallback>,
    /// Capture of a panic from the user callback, if any. Set by the
    /// worker, surfaced by the driver on drain.
    pub callback_error: Option<Error>,

    pending_forwards: Vec<PendingForward>,
    pending_writes: Vec<PendingWrite>,
    state: State,
}

impl<K, C> AsyncEvent<K, C> {
    /// Constructs a new event in state [`State::Created`].
    pub fn new(
        input_key: K,
        input_record: Vec<u8>,
        partition: i32,
        record_context: C,
        stream_time_at_offer: i64,
        system_time_at_offer: i64,
        user_callback: UserCallback,
    ) -> Self {
        Self {
            input_key,
            input_record,
            partition,
            record_context,
            stream_time_at_offer,
            system_time_at_offer,
            user_callback: Some(user_callback),
            callback_error: None,
            pending_forwards: Vec::new(),
            pending_writes: Vec::new(),
            state: State::Created,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Advances the event to `target`, enforcing the monotonic state
    /// order. Any disallowed transition is a fatal programming error,
    /// reported as [`Error::InvalidTransition`] for the caller to turn
    /// into a process abort.
    pub fn transition(&mut self, target: State) -> Result<(), Error> {
        if self.state.allows(target) {
            self.state = target;
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.state,
                to: target,
            })
        }
    }

    /// Appends a deferred forward. Only valid while `PROCESSING`.
    pub fn append_forward(&mut self, forward: PendingForward) -> Result<(), Error> {
        self.require_state("append_forward", State::Processing)?;
        self.pending_forwards.push(forward);
        Ok(())
    }

    /// Appends a deferred store write. Only valid while `PROCESSING`.
    pub fn append_write(&mut self, write: PendingWrite) -> Result<(), Error> {
        self.require_state("append_write", State::Processing)?;
        self.pending_writes.push(write);
        Ok(())
    }

    /// Pops the next pending forward in submission order. Only valid
    /// while `FINALIZING`.
    pub fn next_forward(&mut self) -> Result<Option<PendingForward>, Error> {
        self.require_state("next_forward", State::Finalizing)?;
        if self.pending_forwards.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.pending_forwards.remove(0)))
        }
    }

    /// Pops the next pending write in submission order. Only valid while
    /// `FINALIZING`.
    pub fn next_write(&mut self) -> Result<Option<PendingWrite>, Error> {
        self.require_state("next_write", State::Finalizing)?;
        if self.pending_writes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.pending_writes.remove(0)))
        }
    }

    /// True once both pending lists have been fully drained.
    pub fn side_effects_drained(&self) -> bool {
        self.pending_forwards.is_empty() && self.pending_writes.is_empty()
    }

    fn require_state(&self, operation: &'static str, expected: State) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidOperationForState {
                operation,
                state: self.state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_event() -> AsyncEvent<String, ()> {
        AsyncEvent::new("k".to_string(), vec![], 0, (), 0, 0, Box::new(|| {}))
    }

    #[test]
    fn legal_transitions_walk_forward() {
        let mut e = dummy_event();
        for target in [
            State::ToProcess,
            State::Processing,
            State::ToFinalize,
            State::Finalizing,
            State::Done,
        ] {
            e.transition(target).unwrap();
        }
        assert_eq!(e.state(), State::Done);
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut e = dummy_event();
        let err = e.transition(State::Processing).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn going_backwards_is_rejected() {
        let mut e = dummy_event();
        e.transition(State::ToProcess).unwrap();
        e.transition(State::Processing).unwrap();
        let err = e.transition(State::ToProcess).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn forward_write_only_during_processing() {
        let mut e = dummy_event();
        let forward = PendingForward {
            child: None,
            record: OutputRecord {
                key: vec![],
                value: vec![],
                timestamp: 0,
            },
        };
        assert!(e.append_forward(forward.clone()).is_err());
        e.transition(State::ToProcess).unwrap();
        e.transition(State::Processing).unwrap();
        e.append_forward(forward).unwrap();
        e.transition(State::ToFinalize).unwrap();
        assert!(
            e.append_write(PendingWrite {
                store: "s".into(),
                op: WriteOp::Delete {
                    key: vec![],
                    timestamp: 0
                }
            })
            .is_err()
        );
    }

    #[test]
    fn drain_order_is_submission_order() {
        let mut e = dummy_event();
        e.transition(State::ToProcess).unwrap();
        e.transition(State::Processing).unwrap();
        for i in 0..3u8 {
            e.append_write(PendingWrite {
                store: "s".into(),
                op: WriteOp::Put {
                    key: vec![i],
                    value: vec![i],
                    timestamp: 0,
                },
            })
            .unwrap();
        }
        e.transition(State::ToFinalize).unwrap();
        e.transition(State::Finalizing).unwrap();
        let mut seen = vec![];
        while let Some(w) = e.next_write().unwrap() {
            if let WriteOp::Put { key, .. } = w.op {
                seen.push(key[0]);
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(e.side_effects_drained());
    }
}
