//! Moving average over a window buffer.

use rill_core::{AggregateDescriptor, Timestamp};
use serde_json::{json, Value};

use super::window_stats::RunningSum;
use crate::core::{
    require_window, single_input, upstream_window, Aggregate, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::state;

/// Arithmetic mean of the values retained by an upstream window.
///
/// Maintained from the window delta alone: admitted values are added to a
/// running sum, evicted values subtracted. Accumulated rounding error is
/// never corrected by rescanning the window.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    state: RunningSum,
}

impl MovingAverage {
    /// Type tag.
    pub const KIND: &'static str = "ma";

    /// Builds the aggregate; the window span comes from the upstream.
    pub fn from_descriptor(_descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        Ok(Self {
            state: RunningSum::default(),
        })
    }

    /// Number of values currently averaged.
    pub fn count(&self) -> u64 {
        self.state.count
    }
}

impl Aggregate for MovingAverage {
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
        let window = upstream_window(Self::KIND, ctx.input())?;
        self.state.apply(window);
        Ok(())
    }

    fn on_time(&mut self, _timestamp: Timestamp, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        let window = upstream_window(Self::KIND, inputs.first().copied())?;
        self.state.apply(window);
        Ok(())
    }

    fn value(&self) -> Option<f64> {
        (self.state.count > 0).then(|| self.state.sum / self.state.count as f64)
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

#[cfg(test)]
mod tests {
    use rill_core::Record;

    use super::MovingAverage;
    use crate::aggregates::TimeSeriesWindow;
    use crate::{Aggregate, UpdateContext};
    use rill_core::{AggregateDescriptor, Timestamp};

    struct Pipeline {
        window: TimeSeriesWindow,
        ma: MovingAverage,
    }

    impl Pipeline {
        fn new(span: i64) -> Self {
            let window = TimeSeriesWindow::from_descriptor(
                &AggregateDescriptor::new("win", "timeSeriesWinBuf")
                    .with_timestamp_field("t")
                    .with_value_field("v")
                    .with_window_span(span),
            )
            .unwrap();
            let ma = MovingAverage::from_descriptor(&AggregateDescriptor::new("ma", "ma")).unwrap();
            Self { window, ma }
        }

        fn push(&mut self, t: i64, v: f64) {
            let record = Record::new().with("t", t).with("v", v);
            self.window.on_add(&UpdateContext::new(0, &record)).unwrap();
            self.ma
                .on_add(&UpdateContext::new(0, &record).with_inputs(&[&self.window]))
                .unwrap();
        }

        fn naive_mean(&self) -> Option<f64> {
            let buffer = self.window.buffer();
            (!buffer.is_empty()).then(|| buffer.values().sum::<f64>() / buffer.len() as f64)
        }
    }

    #[test]
    fn constant_stream_keeps_constant_average() {
        let mut pipeline = Pipeline::new(10_000);
        for step in 0..10 {
            pipeline.push(step * 1_000, 100.0);
            assert_eq!(pipeline.ma.value(), Some(100.0));
        }
        assert_eq!(pipeline.ma.count(), 10);

        pipeline.push(10_001, 100.0);
        assert_eq!(pipeline.ma.count(), 10);
        assert_eq!(pipeline.ma.value(), Some(100.0));
    }

    #[test]
    fn matches_mean_of_retained_values() {
        let mut pipeline = Pipeline::new(500);
        let mut now = 0;
        for step in 0..300_i64 {
            now += 17 + (step * 31) % 97;
            let value = ((step * 7919) % 1000) as f64 / 7.0 - 50.0;
            pipeline.push(now, value);
            let expected = pipeline.naive_mean().unwrap();
            let actual = pipeline.ma.value().unwrap();
            assert!(
                (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{actual} != {expected}"
            );
        }
    }

    #[test]
    fn empty_window_has_no_value() {
        let mut pipeline = Pipeline::new(10);
        pipeline.push(0, 5.0);
        pipeline.window.on_time(Timestamp::from_millis(100), &[]).unwrap();
        pipeline.ma.on_time(Timestamp::from_millis(100), &[&pipeline.window]).unwrap();
        assert_eq!(pipeline.ma.count(), 0);
        assert_eq!(pipeline.ma.value(), None);
        assert!(pipeline.ma.is_initialized());
    }

    #[test]
    fn rejects_inputs_without_window() {
        let ma = MovingAverage::from_descriptor(&AggregateDescriptor::new("ma", "ma")).unwrap();
        assert!(ma.check_inputs(&[]).is_err());
    }
}
