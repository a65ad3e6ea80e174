use std::sync::atomic::{AtomicU64, Ordering};

use rill_core::RecordId;

/// Atomic sequencer assigning monotonic record identifiers.
#[derive(Debug, Default)]
pub struct RecordSequencer {
    counter: AtomicU64,
}

impl RecordSequencer {
    /// Create a new sequencer that starts after the provided value.
    pub fn new(last: RecordId) -> Self {
        Self {
            counter: AtomicU64::new(last),
        }
    }

    /// Return the next identifier.
    pub fn next(&self) -> RecordId {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Last identifier handed out, `0` if none.
    pub fn last(&self) -> RecordId {
        self.counter.load(Ordering::SeqCst)
    }
}
