//! Extension point for user-supplied aggregate logic.

use rill_core::Timestamp;
use serde_json::Value;

use crate::core::{Aggregate, AggregateError, AggregateResult, Capabilities, UpdateContext};

/// Capability set of a user-supplied aggregate.
///
/// Every method has a no-op default, so an implementation only provides the
/// callbacks it cares about. Unlike built-ins, custom aggregates receive
/// `Update` and `Delete` mutations as well as `Add`.
///
/// State is exchanged as JSON: [`CustomAggregate::save_state`] doubles as the
/// snapshot shown to readers and as the persisted form.
pub trait CustomAggregate: Send {
    /// What downstream aggregates can read. Defaults to a series.
    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIES
    }

    /// Validates the declared upstreams. Any number is accepted by default.
    fn check_inputs(&self, _inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        Ok(())
    }

    /// See [`Aggregate::on_add`].
    fn on_add(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// See [`Aggregate::on_update`].
    fn on_update(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// See [`Aggregate::on_delete`].
    fn on_delete(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// See [`Aggregate::on_time`].
    fn on_time(
        &mut self,
        _timestamp: Timestamp,
        _inputs: &[&dyn Aggregate],
    ) -> AggregateResult<()> {
        Ok(())
    }

    /// Current numeric output.
    fn get_float(&self) -> Option<f64> {
        None
    }

    /// Timestamp of the current output.
    fn get_timestamp(&self) -> Option<Timestamp> {
        None
    }

    /// Serializable state, listing at most `limit` items of any collection.
    fn save_state(&self, _limit: Option<usize>) -> Value {
        Value::Null
    }

    /// Restores a state produced by [`CustomAggregate::save_state`] with no limit.
    fn load_state(&mut self, _state: Value) -> AggregateResult<()> {
        Ok(())
    }

    /// Returns to the initial state.
    fn reset(&mut self) {}
}

/// Adapts a [`CustomAggregate`] to the [`Aggregate`] trait under a kind tag.
pub struct Custom<T> {
    kind: String,
    inner: T,
}

impl<T: CustomAggregate> Custom<T> {
    /// Wraps `inner`, reporting `kind` as its type tag.
    pub fn new(kind: impl Into<String>, inner: T) -> Self {
        Self {
            kind: kind.into(),
            inner,
        }
    }

    /// The wrapped implementation.
    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: CustomAggregate> Aggregate for Custom<T> {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.inner.check_inputs(inputs)
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.inner.on_add(ctx)
    }

    fn on_update(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.inner.on_update(ctx)
    }

    fn on_delete(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.inner.on_delete(ctx)
    }

    fn on_time(&mut self, timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.inner.on_time(timestamp, inputs)
    }

    fn value(&self) -> Option<f64> {
        self.inner.get_float()
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.inner.get_timestamp()
    }

    fn is_initialized(&self) -> bool {
        self.inner.get_float().is_some() || self.inner.get_timestamp().is_some()
    }

    fn snapshot(&self, limit: Option<usize>) -> Value {
        self.inner.save_state(limit)
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        serde_json::to_vec(&self.inner.save_state(None))
            .map_err(|err| AggregateError::state(&self.kind, err))
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        let state: Value =
            serde_json::from_slice(bytes).map_err(|err| AggregateError::state(&self.kind, err))?;
        self.inner.load_state(state)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

impl<T> std::fmt::Debug for Custom<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Custom").field("kind", &self.kind).finish_non_exhaustive()
    }
}
