use std::sync::Arc;

use rill_core::Timestamp;
use serde_json::Value;

use crate::store::{AggregateStatus, Store};
use crate::EngineResult;

/// Read access to one aggregate of a store.
///
/// Handles resolve the aggregate by name on every read, so a handle keeps
/// following a redefined aggregate and fails with
/// [`crate::EngineError::UnknownAggregate`] once it is unregistered.
#[derive(Debug, Clone)]
pub struct AggregateHandle {
    store: Arc<Store>,
    name: String,
}

impl AggregateHandle {
    pub(crate) fn new(store: Arc<Store>, name: String) -> Self {
        Self { store, name }
    }

    /// Name of the aggregate.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store owning the aggregate.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Canonical type tag.
    pub fn kind(&self) -> EngineResult<String> {
        self.store
            .inspect(&self.name, |slot| slot.aggregate.kind().to_string())
    }

    /// Current numeric output, absent until the aggregate produced one.
    pub fn current_value(&self) -> EngineResult<Option<f64>> {
        self.store.inspect(&self.name, |slot| slot.aggregate.value())
    }

    /// Timestamp of the current output.
    pub fn current_timestamp(&self) -> EngineResult<Option<Timestamp>> {
        self.store
            .inspect(&self.name, |slot| slot.aggregate.timestamp())
    }

    /// Whether the aggregate has observed any input yet.
    pub fn is_initialized(&self) -> EngineResult<bool> {
        self.store
            .inspect(&self.name, |slot| slot.aggregate.is_initialized())
    }

    /// JSON view of the state, listing at most `limit` items per collection.
    pub fn snapshot_state(&self, limit: Option<usize>) -> EngineResult<Value> {
        self.store
            .inspect(&self.name, |slot| slot.aggregate.snapshot(limit))
    }

    /// Lifecycle state.
    pub fn status(&self) -> EngineResult<AggregateStatus> {
        self.store.read_state(|state| Ok(state.slot(&self.name)?.status))
    }
}
