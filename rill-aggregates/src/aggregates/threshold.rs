//! Threshold detector over a series.

use rill_core::{AggregateDescriptor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    required, single_input, Aggregate, AggregateError, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::source::SeriesSource;
use crate::state::{self, ensure_same};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct ThresholdState {
    threshold: f64,
    last: Option<(Timestamp, bool)>,
}

/// Emits `1.0` while the input is above `threshold` and `0.0` otherwise.
#[derive(Debug, Clone)]
pub struct Threshold {
    source: SeriesSource,
    state: ThresholdState,
}

impl Threshold {
    /// Type tag.
    pub const KIND: &'static str = "threshold";

    /// Builds the detector. `threshold` is required and must be finite.
    pub fn from_descriptor(descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        let threshold = *required(Self::KIND, "threshold", descriptor.threshold.as_ref())?;
        if !threshold.is_finite() {
            return Err(AggregateError::invalid_parameter(Self::KIND, "threshold", threshold));
        }
        Ok(Self {
            source: SeriesSource::from_descriptor(Self::KIND, descriptor)?,
            state: ThresholdState {
                threshold,
                last: None,
            },
        })
    }

    /// Whether the last observed input exceeded the threshold.
    pub fn is_above(&self) -> bool {
        self.state.last.is_some_and(|(_, above)| above)
    }
}

impl Aggregate for Threshold {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIES
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.source.check(Self::KIND, single_input(Self::KIND, inputs)?)
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        if let Some((timestamp, value)) = self.source.read(ctx.record, ctx.input())? {
            self.state.last = Some((timestamp, value > self.state.threshold));
        }
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        self.state
            .last
            .map(|(_, above)| if above { 1.0 } else { 0.0 })
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.state.last.map(|(timestamp, _)| timestamp)
    }

    fn snapshot(&self, _limit: Option<usize>) -> Value {
        json!({
            "value": self.value(),
            "timestamp": self.timestamp(),
            "threshold": self.state.threshold,
        })
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        state::encode(Self::KIND, &self.state)
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        let saved: ThresholdState = state::decode(Self::KIND, bytes)?;
        ensure_same(Self::KIND, "threshold", self.state.threshold, saved.threshold)?;
        self.state = saved;
        Ok(())
    }

    fn reset(&mut self) {
        self.state.last = None;
    }
}
