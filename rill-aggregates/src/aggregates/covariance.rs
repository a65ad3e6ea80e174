//! Covariance and correlation between two window buffers.

use rill_core::{AggregateDescriptor, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    require_window, upstream_window, Aggregate, AggregateError, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::state;
use crate::window::WindowBuffer;

/// Which statistic a [`WindowCovariance`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStatistic {
    /// Sample covariance.
    Covariance,
    /// Pearson correlation coefficient.
    Correlation,
}

impl PairStatistic {
    fn kind(self) -> &'static str {
        match self {
            Self::Covariance => WindowCovariance::COVARIANCE_KIND,
            Self::Correlation => WindowCovariance::CORRELATION_KIND,
        }
    }
}

/// Running means and co-moments of paired values, supporting removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct Comoments {
    count: u64,
    mean_x: f64,
    mean_y: f64,
    m2_x: f64,
    m2_y: f64,
    cross: f64,
}

impl Comoments {
    fn push(&mut self, x: f64, y: f64) {
        self.count += 1;
        let n = self.count as f64;
        let dx = x - self.mean_x;
        let dy = y - self.mean_y;
        self.mean_x += dx / n;
        self.mean_y += dy / n;
        self.m2_x += dx * (x - self.mean_x);
        self.m2_y += dy * (y - self.mean_y);
        self.cross += dx * (y - self.mean_y);
    }

    fn remove(&mut self, x: f64, y: f64) {
        if self.count <= 1 {
            *self = Self::default();
            return;
        }
        let n = self.count as f64;
        self.count -= 1;
        let mean_x = (self.mean_x * n - x) / (n - 1.0);
        let mean_y = (self.mean_y * n - y) / (n - 1.0);
        self.m2_x -= (x - mean_x) * (x - self.mean_x);
        self.m2_y -= (y - mean_y) * (y - self.mean_y);
        self.cross -= (x - mean_x) * (y - self.mean_y);
        self.mean_x = mean_x;
        self.mean_y = mean_y;
        // rounding can push a near-zero second moment below zero
        self.m2_x = self.m2_x.max(0.0);
        self.m2_y = self.m2_y.max(0.0);
    }

    fn covariance(&self) -> Option<f64> {
        match self.count {
            0 => None,
            1 => Some(0.0),
            count => Some(self.cross / (count - 1) as f64),
        }
    }

    fn correlation(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        if self.m2_x == 0.0 || self.m2_y == 0.0 {
            return Some(1.0);
        }
        Some(self.cross / (self.m2_x.sqrt() * self.m2_y.sqrt()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
struct PairState {
    stats: Comoments,
    timestamp: Option<Timestamp>,
}

/// Covariance or correlation of two upstream windows, paired entry by entry.
///
/// Declared with two inputs, `x` first. Both windows must share a span and
/// be fed from the same records, so every event admits and evicts the same
/// number of entries on each side.
#[derive(Debug, Clone)]
pub struct WindowCovariance {
    which: PairStatistic,
    state: PairState,
}

impl WindowCovariance {
    /// Type tag of the covariance.
    pub const COVARIANCE_KIND: &'static str = "covariance";
    /// Type tag of the correlation.
    pub const CORRELATION_KIND: &'static str = "correlation";

    /// Builds a covariance or correlation aggregate.
    pub fn new(which: PairStatistic) -> Self {
        Self {
            which,
            state: PairState::default(),
        }
    }

    /// Builds the aggregate; the window span comes from the upstreams.
    pub fn from_descriptor(
        which: PairStatistic,
        _descriptor: &AggregateDescriptor,
    ) -> AggregateResult<Self> {
        Ok(Self::new(which))
    }

    /// Number of paired values currently retained.
    pub fn count(&self) -> u64 {
        self.state.stats.count
    }

    fn windows<'a>(
        &self,
        inputs: &[&'a dyn Aggregate],
    ) -> AggregateResult<(&'a WindowBuffer, &'a WindowBuffer)> {
        let kind = self.which.kind();
        match inputs {
            [x, y] => Ok((
                upstream_window(kind, Some(*x))?,
                upstream_window(kind, Some(*y))?,
            )),
            _ => Err(AggregateError::incompatible_input(
                kind,
                format!("reads exactly two input windows but {} were declared", inputs.len()),
            )),
        }
    }

    fn out_of_step(&self) -> AggregateError {
        AggregateError::incompatible_input(
            self.which.kind(),
            "input windows admitted or evicted different entries",
        )
    }

    fn apply(&mut self, x: &WindowBuffer, y: &WindowBuffer) -> AggregateResult<()> {
        if x.evicted().len() != y.evicted().len() || x.added().is_some() != y.added().is_some() {
            return Err(self.out_of_step());
        }
        for (old_x, old_y) in x.evicted().iter().zip(y.evicted()) {
            self.state.stats.remove(old_x.value, old_y.value);
        }
        if let (Some(new_x), Some(new_y)) = (x.added(), y.added()) {
            self.state.stats.push(new_x.value, new_y.value);
        }
        self.state.timestamp = x.latest_timestamp();
        Ok(())
    }
}

impl Aggregate for WindowCovariance {
    fn kind(&self) -> &str {
        self.which.kind()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SERIES
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let kind = self.which.kind();
        for input in inputs {
            require_window(kind, Some(*input))?;
        }
        let (x, y) = self.windows(inputs)?;
        if x.span() != y.span() {
            return Err(AggregateError::incompatible_input(
                kind,
                format!("input windows span {} and {}", x.span(), y.span()),
            ));
        }
        Ok(())
    }

    fn attach(&mut self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let (x, y) = self.windows(inputs)?;
        if x.len() != y.len() {
            return Err(self.out_of_step());
        }
        self.state = PairState::default();
        for (x, y) in x.values().zip(y.values()) {
            self.state.stats.push(x, y);
        }
        self.state.timestamp = x.latest_timestamp();
        Ok(())
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        let (x, y) = self.windows(ctx.inputs)?;
        self.apply(x, y)
    }

    fn on_time(&mut self, _timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let (x, y) = self.windows(inputs)?;
        self.apply(x, y)
    }

    fn value(&self) -> Option<f64> {
        match self.which {
            PairStatistic::Covariance => self.state.stats.covariance(),
            PairStatistic::Correlation => self.state.stats.correlation(),
        }
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
            "count": self.state.stats.count,
            "meanX": self.state.stats.mean_x,
            "meanY": self.state.stats.mean_y,
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
        self.state = PairState::default();
    }
}
