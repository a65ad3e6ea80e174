//! Population variance over a window buffer.

use rill_core::{AggregateDescriptor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    require_window, single_input, upstream_window, Aggregate, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::state;
use crate::window::WindowBuffer;

/// Welford accumulator supporting removal of previously added values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Welford {
    count: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn remove(&mut self, value: f64) {
        if self.count <= 1 {
            *self = Self::default();
            return;
        }
        let previous_mean = self.mean;
        self.count -= 1;
        self.mean = (previous_mean * (self.count + 1) as f64 - value) / self.count as f64;
        self.m2 -= (value - previous_mean) * (value - self.mean);
        // rounding can push a near-zero m2 below zero
        self.m2 = self.m2.max(0.0);
    }

    fn variance(&self) -> Option<f64> {
        (self.count > 0).then(|| self.m2 / self.count as f64)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct VarianceState {
    stats: Welford,
    timestamp: Option<Timestamp>,
}

/// Population variance of the values retained by an upstream window.
#[derive(Debug, Clone)]
pub struct WindowVariance {
    state: VarianceState,
}

impl WindowVariance {
    /// Type tag.
    pub const KIND: &'static str = "variance";

    /// Builds the aggregate.
    pub fn from_descriptor(_descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        Ok(Self {
            state: VarianceState::default(),
        })
    }

    /// Mean of the retained values, maintained alongside the variance.
    pub fn mean(&self) -> Option<f64> {
        (self.state.stats.count > 0).then_some(self.state.stats.mean)
    }

    fn apply(&mut self, window: &WindowBuffer) {
        for expired in window.evicted() {
            self.state.stats.remove(expired.value);
        }
        if let Some(entry) = window.added() {
            self.state.stats.push(entry.value);
        }
        self.state.timestamp = window.latest_timestamp();
    }
}

impl Aggregate for WindowVariance {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIES
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        require_window(Self::KIND, single_input(Self::KIND, inputs)?)
    }

    fn attach(&mut self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let window = upstream_window(Self::KIND, inputs.first().copied())?;
        self.state = VarianceState::default();
        for value in window.values() {
            self.state.stats.push(value);
        }
        self.state.timestamp = window.latest_timestamp();
        Ok(())
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.apply(upstream_window(Self::KIND, ctx.input())?);
        Ok(())
    }

    fn on_time(&mut self, _timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.apply(upstream_window(Self::KIND, inputs.first().copied())?);
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        self.state.stats.variance()
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.state.timestamp
    }

    fn is_initialized(&self) -> bool {
        self.state.timestamp.is_some()
    }

    fn snapshot(&self, _limit: Option<usize>) -> Value {
        json!({
            "value": self.value(),
            "mean": self.mean(),
            "count": self.state.stats.count,
            "timestamp": self.state.timestamp,
        })
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        state::encode(Self::KIND, &self.state)
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        self.state = state::decode(Self::KIND, bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = VarianceState::default();
    }
}
