//! Sum, minimum, and maximum over a window buffer.

use std::collections::VecDeque;

use rill_core::{AggregateDescriptor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    require_window, single_input, upstream_window, Aggregate, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::state;
use crate::window::WindowBuffer;

/// Sum and count of a window's values, maintained from its delta alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct RunningSum {
    pub(crate) sum: f64,
    pub(crate) count: u64,
    pub(crate) timestamp: Option<Timestamp>,
}

impl RunningSum {
    /// Totals the entries currently retained by `window`.
    pub(crate) fn seed(window: &WindowBuffer) -> Self {
        Self {
            sum: window.values().sum(),
            count: window.len() as u64,
            timestamp: window.latest_timestamp(),
        }
    }

    /// Subtracts evicted values and adds the admitted one.
    pub(crate) fn apply(&mut self, window: &WindowBuffer) {
        for expired in window.evicted() {
            self.sum -= expired.value;
            self.count = self.count.saturating_sub(1);
        }
        if self.count == 0 {
            self.sum = 0.0;
        }
        if let Some(entry) = window.added() {
            self.sum += entry.value;
            self.count += 1;
        }
        self.timestamp = window.latest_timestamp();
    }
}

/// Sum of the values retained by an upstream window.
#[derive(Debug, Clone)]
pub struct WindowSum {
    state: RunningSum,
}

impl WindowSum {
    /// Type tag.
    pub const KIND: &'static str = "winBufSum";

    /// Builds the aggregate.
    pub fn from_descriptor(_descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        Ok(Self {
            state: RunningSum::default(),
        })
    }
}

impl Aggregate for WindowSum {
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
        self.state = RunningSum::seed(upstream_window(Self::KIND, inputs.first().copied())?);
        Ok(())
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.state.apply(upstream_window(Self::KIND, ctx.input())?);
        Ok(())
    }

    fn on_time(&mut self, _timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.state.apply(upstream_window(Self::KIND, inputs.first().copied())?);
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        self.state.timestamp.map(|_| self.state.sum)
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.state.timestamp
    }

    fn snapshot(&self, _limit: Option<usize>) -> Value {
        json!({
            "value": self.value(),
            "count": self.state.count,
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
        self.state = RunningSum::default();
    }
}

/// Which end of the value range an [`WindowExtremum`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Extremum {
    /// Smallest retained value.
    Min,
    /// Largest retained value.
    Max,
}

impl Extremum {
    fn kind(self) -> &'static str {
        match self {
            Self::Min => WindowExtremum::MIN_KIND,
            Self::Max => WindowExtremum::MAX_KIND,
        }
    }

    /// Whether `incumbent` can never again be the extremum once `challenger`
    /// is in the window.
    fn dominated(self, incumbent: f64, challenger: f64) -> bool {
        match self {
            Self::Min => incumbent >= challenger,
            Self::Max => incumbent <= challenger,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct ExtremumState {
    /// Candidates as `(sequence, value)`, sequence increasing, values monotonic.
    candidates: VecDeque<(u64, f64)>,
    admitted: u64,
    expired: u64,
    timestamp: Option<Timestamp>,
}

/// Minimum or maximum of the values retained by an upstream window.
///
/// Uses a monotonic deque of candidates, so each value is pushed and popped
/// at most once.
#[derive(Debug, Clone)]
pub struct WindowExtremum {
    which: Extremum,
    state: ExtremumState,
}

impl WindowExtremum {
    /// Type tag of the minimum.
    pub const MIN_KIND: &'static str = "winBufMin";
    /// Type tag of the maximum.
    pub const MAX_KIND: &'static str = "winBufMax";

    /// Builds a minimum or maximum aggregate.
    pub fn new(which: Extremum) -> Self {
        Self {
            which,
            state: ExtremumState::default(),
        }
    }

    fn admit(&mut self, value: f64) {
        let which = self.which;
        let state = &mut self.state;
        while state
            .candidates
            .back()
            .is_some_and(|(_, candidate)| which.dominated(*candidate, value))
        {
            state.candidates.pop_back();
        }
        state.candidates.push_back((state.admitted, value));
        state.admitted += 1;
    }

    fn apply(&mut self, window: &WindowBuffer) {
        let state = &mut self.state;
        state.expired += window.evicted().len() as u64;
        while state
            .candidates
            .front()
            .is_some_and(|(sequence, _)| *sequence < state.expired)
        {
            state.candidates.pop_front();
        }
        if let Some(entry) = window.added() {
            self.admit(entry.value);
        }
        self.state.timestamp = window.latest_timestamp();
    }
}

impl Aggregate for WindowExtremum {
    fn kind(&self) -> &str {
        self.which.kind()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIES
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let kind = self.which.kind();
        require_window(kind, single_input(kind, inputs)?)
    }

    fn attach(&mut self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let window = upstream_window(self.which.kind(), inputs.first().copied())?;
        self.state = ExtremumState::default();
        for value in window.values() {
            self.admit(value);
        }
        self.state.timestamp = window.latest_timestamp();
        Ok(())
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.apply(upstream_window(self.which.kind(), ctx.input())?);
        Ok(())
    }

    fn on_time(&mut self, _timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.apply(upstream_window(self.which.kind(), inputs.first().copied())?);
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        self.state.candidates.front().map(|(_, value)| *value)
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
            "timestamp": self.state.timestamp,
        })
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        state::encode(self.which.kind(), &self.state)
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        self.state = state::decode(self.which.kind(), bytes)?;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = ExtremumState::default();
    }
}
