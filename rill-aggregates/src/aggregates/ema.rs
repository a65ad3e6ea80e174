//! Time-decayed exponential moving average.

use rill_core::{AggregateDescriptor, DecayMode, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::{
    positive, required, single_input, Aggregate, AggregateError, AggregateResult, Capabilities,
    UpdateContext,
};
use crate::source::SeriesSource;
use crate::state::{self, ensure_same};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct EmaState {
    interval: f64,
    mode: DecayMode,
    init_window: i64,
    /// Points buffered until the first average is seeded.
    warmup: Vec<(Timestamp, f64)>,
    ema: Option<f64>,
    last_input: f64,
    timestamp: Option<Timestamp>,
}

/// Exponential moving average over irregularly spaced points.
///
/// The weight of the previous average decays with the elapsed time:
/// `mi = exp(-dt / interval)`. The decay mode decides what the input is
/// assumed to have been between two samples:
///
/// * [`DecayMode::Next`]: the new value held over the whole gap.
/// * [`DecayMode::Previous`]: the previous value held until the new sample.
/// * [`DecayMode::Linear`]: the input moved linearly between the samples.
///
/// Without `initWindow` the first point seeds the average. With it, points
/// are buffered until one arrives more than `initWindow` after the first,
/// and the average starts from the buffer's mean, each point weighted by
/// `exp(-age / interval)`. No value is reported while buffering.
#[derive(Debug, Clone)]
pub struct Ema {
    source: SeriesSource,
    state: EmaState,
}

impl Ema {
    /// Type tag.
    pub const KIND: &'static str = "ema";

    /// Builds the aggregate. `interval` is required and must be positive;
    /// `initWindow` must not be negative.
    pub fn from_descriptor(descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        let interval = *required(Self::KIND, "interval", descriptor.interval.as_ref())?;
        let interval = positive(Self::KIND, "interval", interval)?;
        let init_window = descriptor.init_window.unwrap_or(0);
        if init_window < 0 {
            return Err(AggregateError::invalid_parameter(
                Self::KIND,
                "initWindow",
                init_window,
            ));
        }
        Ok(Self {
            source: SeriesSource::from_descriptor(Self::KIND, descriptor)?,
            state: EmaState {
                interval,
                mode: descriptor.decay_mode.unwrap_or_default(),
                init_window,
                ..EmaState::default()
            },
        })
    }

    /// Configured decay interval.
    pub fn interval(&self) -> f64 {
        self.state.interval
    }

    /// Configured decay mode.
    pub fn mode(&self) -> DecayMode {
        self.state.mode
    }

    /// Points buffered while warming up.
    pub fn warmup_len(&self) -> usize {
        self.state.warmup.len()
    }

    fn update(&mut self, timestamp: Timestamp, value: f64) -> AggregateResult<()> {
        let state = &mut self.state;
        if let Some(previous) = state.timestamp {
            if timestamp < previous {
                return Err(AggregateError::OutOfOrderTimestamp {
                    previous,
                    received: timestamp,
                });
            }
        }
        let (Some(ema), Some(previous)) = (state.ema, state.timestamp) else {
            state.warm_up(timestamp, value);
            return Ok(());
        };

        let dt = (timestamp - previous) as f64;
        if dt > 0.0 {
            let alpha = dt / state.interval;
            let mi = (-alpha).exp();
            let ni = match state.mode {
                DecayMode::Next => mi,
                DecayMode::Previous => 1.0,
                DecayMode::Linear => (1.0 - mi) / alpha,
            };
            state.ema = Some(mi * ema + (ni - mi) * state.last_input + (1.0 - ni) * value);
        }
        state.last_input = value;
        state.timestamp = Some(timestamp);
        Ok(())
    }
}

impl EmaState {
    fn warm_up(&mut self, timestamp: Timestamp, value: f64) {
        self.warmup.push((timestamp, value));
        self.last_input = value;
        self.timestamp = Some(timestamp);
        let first = self.warmup.first().map_or(timestamp, |(first, _)| *first);
        if self.init_window > 0 && timestamp - first <= self.init_window {
            return;
        }
        let (weighted, total) = self
            .warmup
            .iter()
            .fold((0.0, 0.0), |(weighted, total), (at, point)| {
                let weight = (-((timestamp - *at) as f64) / self.interval).exp();
                (weighted + weight * point, total + weight)
            });
        self.ema = Some(weighted / total);
        self.warmup.clear();
    }
}

impl Aggregate for Ema {
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
        match self.source.read(ctx.record, ctx.input())? {
            Some((timestamp, value)) => self.update(timestamp, value),
            None => Ok(()),
        }
    }

    fn value(&self) -> Option<f64> {
        self.state.ema
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.state.timestamp
    }

    fn snapshot(&self, _limit: Option<usize>) -> Value {
        json!({
            "value": self.state.ema,
            "timestamp": self.state.timestamp,
            "interval": self.state.interval,
            "decayMode": self.state.mode,
            "initWindow": self.state.init_window,
            "warmup": self.state.warmup.len(),
        })
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        state::encode(Self::KIND, &self.state)
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        let saved: EmaState = state::decode(Self::KIND, bytes)?;
        ensure_same(Self::KIND, "interval", self.state.interval, saved.interval)?;
        ensure_same(Self::KIND, "decayMode", self.state.mode, saved.mode)?;
        ensure_same(
            Self::KIND,
            "initWindow",
            self.state.init_window,
            saved.init_window,
        )?;
        self.state = saved;
        Ok(())
    }

    fn reset(&mut self) {
        self.state = EmaState {
            interval: self.state.interval,
            mode: self.state.mode,
            init_window: self.state.init_window,
            ..EmaState::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use rill_core::Record;

    use super::*;

    fn ema(interval: f64, mode: DecayMode) -> Ema {
        Ema::from_descriptor(
            &AggregateDescriptor::new("ema", Ema::KIND)
                .with_timestamp_field("t")
                .with_value_field("v")
                .with_interval(interval)
                .with_decay_mode(mode),
        )
        .unwrap()
    }

    fn push(ema: &mut Ema, t: i64, v: f64) -> AggregateResult<()> {
        let record = Record::new().with("t", t).with("v", v);
        ema.on_add(&UpdateContext::new(0, &record))
    }

    fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "{actual} is not within {tolerance} of {expected}"
        );
    }

    #[test]
    fn first_point_seeds_then_decays_with_elapsed_time() {
        let mut ema = ema(1_000.0, DecayMode::Next);
        push(&mut ema, 0, 10.0).unwrap();
        assert_eq!(ema.value(), Some(10.0));

        push(&mut ema, 1_000, 20.0).unwrap();
        let alpha = 1.0 - (-1.0_f64).exp();
        assert_close(ema.value().unwrap(), 10.0 + alpha * 10.0, 1e-9);
        assert_close(ema.value().unwrap(), 16.32, 0.01);
    }

    #[test]
    fn constant_stream_converges() {
        let mut ema = ema(500.0, DecayMode::Next);
        push(&mut ema, 0, 0.0).unwrap();
        for step in 1..=100 {
            push(&mut ema, step * 100, 42.0).unwrap();
        }
        assert_close(ema.value().unwrap(), 42.0, 1e-6);
    }

    #[test]
    fn previous_mode_lags_one_sample() {
        let mut ema = ema(1_000.0, DecayMode::Previous);
        push(&mut ema, 0, 10.0).unwrap();
        push(&mut ema, 1_000, 20.0).unwrap();
        assert_close(ema.value().unwrap(), 10.0, 1e-12);
        push(&mut ema, 2_000, 30.0).unwrap();
        let mi = (-1.0_f64).exp();
        assert_close(ema.value().unwrap(), mi * 10.0 + (1.0 - mi) * 20.0, 1e-9);
    }

    #[test]
    fn linear_mode_integrates_interpolated_input() {
        let mut ema = ema(1_000.0, DecayMode::Linear);
        push(&mut ema, 0, 10.0).unwrap();
        push(&mut ema, 1_000, 20.0).unwrap();
        let mi = (-1.0_f64).exp();
        let ni = 1.0 - mi;
        assert_close(ema.value().unwrap(), 10.0 * ni + 20.0 * (1.0 - ni), 1e-9);

        let mut stepped = self::ema(1_000.0, DecayMode::Next);
        push(&mut stepped, 0, 10.0).unwrap();
        for step in 1..=1_000 {
            push(&mut stepped, step, 10.0 + step as f64 / 100.0).unwrap();
        }
        assert_close(stepped.value().unwrap(), ema.value().unwrap(), 1e-2);
    }

    #[test]
    fn equal_timestamps_leave_average_unchanged() {
        let mut ema = ema(1_000.0, DecayMode::Next);
        push(&mut ema, 0, 10.0).unwrap();
        push(&mut ema, 0, 50.0).unwrap();
        assert_eq!(ema.value(), Some(10.0));
    }

    #[test]
    fn rejects_out_of_order_points() {
        let mut ema = ema(1_000.0, DecayMode::Next);
        push(&mut ema, 100, 10.0).unwrap();
        let err = push(&mut ema, 50, 20.0).unwrap_err();
        assert!(matches!(err, AggregateError::OutOfOrderTimestamp { .. }));
        assert_eq!(ema.value(), Some(10.0));
        assert_eq!(ema.timestamp(), Some(Timestamp::from_millis(100)));
    }

    #[test]
    fn rejects_non_positive_interval() {
        for interval in [0.0, -1.0, f64::NAN] {
            let err = Ema::from_descriptor(
                &AggregateDescriptor::new("ema", Ema::KIND)
                    .with_input("tick")
                    .with_interval(interval),
            )
            .unwrap_err();
            assert!(err.is_configuration());
        }
    }

    #[test]
    fn state_restores_only_into_same_configuration() {
        let mut live = ema(1_000.0, DecayMode::Linear);
        push(&mut live, 0, 1.0).unwrap();
        push(&mut live, 300, 4.0).unwrap();
        let bytes = live.save_state().unwrap();

        let mut restored = ema(1_000.0, DecayMode::Linear);
        restored.load_state(&bytes).unwrap();
        push(&mut live, 900, 2.0).unwrap();
        push(&mut restored, 900, 2.0).unwrap();
        assert_eq!(live.value(), restored.value());

        let mut other = ema(1_000.0, DecayMode::Next);
        assert!(other.load_state(&bytes).is_err());
    }

    fn warming(init_window: i64) -> Ema {
        Ema::from_descriptor(
            &AggregateDescriptor::new("ema", Ema::KIND)
                .with_timestamp_field("t")
                .with_value_field("v")
                .with_interval(1_000.0)
                .with_init_window(init_window),
        )
        .unwrap()
    }

    #[test]
    fn init_window_seeds_from_weighted_buffer() {
        let mut ema = warming(1_000);
        push(&mut ema, 0, 10.0).unwrap();
        push(&mut ema, 500, 20.0).unwrap();
        push(&mut ema, 1_000, 40.0).unwrap();
        assert_eq!(ema.value(), None);
        assert!(!ema.is_initialized());
        assert_eq!(ema.warmup_len(), 3);
        assert_eq!(ema.timestamp(), Some(Timestamp::from_millis(1_000)));

        push(&mut ema, 1_200, 30.0).unwrap();
        let weights = [(-1.2_f64).exp(), (-0.7_f64).exp(), (-0.2_f64).exp(), 1.0];
        let values = [10.0, 20.0, 40.0, 30.0];
        let seed = weights.iter().zip(values).map(|(w, v)| w * v).sum::<f64>()
            / weights.iter().sum::<f64>();
        assert_close(ema.value().unwrap(), seed, 1e-9);
        assert_eq!(ema.warmup_len(), 0);

        push(&mut ema, 2_200, 30.0).unwrap();
        let mi = (-1.0_f64).exp();
        assert_close(ema.value().unwrap(), mi * seed + (1.0 - mi) * 30.0, 1e-9);
    }

    #[test]
    fn warmup_rejects_out_of_order_points_and_persists() {
        let mut live = warming(1_000);
        push(&mut live, 100, 1.0).unwrap();
        push(&mut live, 600, 3.0).unwrap();
        assert!(matches!(
            push(&mut live, 50, 2.0),
            Err(AggregateError::OutOfOrderTimestamp { .. })
        ));
        let bytes = live.save_state().unwrap();

        let mut restored = warming(1_000);
        restored.load_state(&bytes).unwrap();
        assert_eq!(restored.warmup_len(), 2);
        push(&mut live, 1_500, 5.0).unwrap();
        push(&mut restored, 1_500, 5.0).unwrap();
        assert!(live.value().is_some());
        assert_eq!(live.value(), restored.value());

        assert!(warming(2_000).load_state(&bytes).is_err());
        restored.reset();
        assert_eq!(restored.value(), None);
        assert_eq!(restored.warmup_len(), 0);
    }

    #[test]
    fn rejects_negative_init_window() {
        let err = Ema::from_descriptor(
            &AggregateDescriptor::new("ema", Ema::KIND)
                .with_input("tick")
                .with_interval(1_000.0)
                .with_init_window(-5),
        )
        .unwrap_err();
        assert!(matches!(err, AggregateError::InvalidParameter { name: "initWindow", .. }));
    }
}
