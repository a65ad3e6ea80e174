//! Time series tick: the last observed `(timestamp, value)` pair.

use rill_core::{AggregateDescriptor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{single_input, Aggregate, AggregateResult, Capabilities, UpdateContext};
use crate::source::SeriesSource;
use crate::state;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct TickState {
    last: Option<(Timestamp, f64)>,
}

/// Exposes the most recent point of a record stream, once per added record.
///
/// Downstream aggregates chain behind a tick when they must react to every
/// incoming record rather than to window changes.
#[derive(Debug, Clone)]
pub struct TimeSeriesTick {
    source: SeriesSource,
    state: TickState,
}

impl TimeSeriesTick {
    /// Type tag.
    pub const KIND: &'static str = "timeSeriesTick";

    /// Builds a tick reading `timestampField` and `valueField` of each record.
    pub fn from_descriptor(descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        Ok(Self {
            source: SeriesSource::record_only(Self::KIND, descriptor)?,
            state: TickState::default(),
        })
    }
}

impl Aggregate for TimeSeriesTick {
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
        if let Some(point) = self.source.read(ctx.record, ctx.input())? {
            self.state.last = Some(point);
        }
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        self.state.last.map(|(_, value)| value)
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.state.last.map(|(timestamp, _)| timestamp)
    }

    fn snapshot(&self, _limit: Option<usize>) -> Value {
        json!({
            "value": self.value(),
            "timestamp": self.timestamp(),
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
        self.state = TickState::default();
    }
}
