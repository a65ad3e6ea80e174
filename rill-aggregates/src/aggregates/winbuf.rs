//! Time series window buffer aggregate.

use rill_core::{AggregateDescriptor, Timestamp};
use serde_json::{json, Value};

use crate::core::{
    limit_len, single_input, window_span, Aggregate, AggregateResult, Capabilities, UpdateContext,
};
use crate::source::SeriesSource;
use crate::state::{self, ensure_same};
use crate::window::WindowBuffer;

/// Keeps the points of the last `windowSpan` time units.
///
/// Reads records directly, or chains behind a series aggregate such as a
/// tick. Its output value is the newest retained value.
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    source: SeriesSource,
    buffer: WindowBuffer,
}

impl TimeSeriesWindow {
    /// Type tag.
    pub const KIND: &'static str = "timeSeriesWinBuf";

    /// Builds the aggregate from its descriptor.
    pub fn from_descriptor(descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        let span = window_span(Self::KIND, descriptor)?;
        Ok(Self {
            source: SeriesSource::from_descriptor(Self::KIND, descriptor)?,
            buffer: WindowBuffer::new(span)?,
        })
    }

    /// The underlying buffer.
    pub fn buffer(&self) -> &WindowBuffer {
        &self.buffer
    }
}

impl Aggregate for TimeSeriesWindow {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::WINDOW
    }

    fn check_inputs(&self, inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.source.check(Self::KIND, single_input(Self::KIND, inputs)?)
    }

    fn on_add(&mut self, ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.buffer.clear_delta();
        match self.source.read(ctx.record, ctx.input())? {
            Some((timestamp, value)) => self.buffer.add(timestamp, value),
            None => Ok(()),
        }
    }

    fn on_time(&mut self, timestamp: Timestamp, _inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        self.buffer.advance_to(timestamp)
    }

    fn value(&self) -> Option<f64> {
        self.buffer.newest().map(|entry| entry.value)
    }

    fn timestamp(&self) -> Option<Timestamp> {
        self.buffer.latest_timestamp()
    }

    fn window(&self) -> Option<&WindowBuffer> {
        Some(&self.buffer)
    }

    fn is_initialized(&self) -> bool {
        self.buffer.latest_timestamp().is_some()
    }

    fn snapshot(&self, limit: Option<usize>) -> Value {
        let shown = limit_len(self.buffer.len(), limit);
        let skip = self.buffer.len() - shown;
        let entries: Vec<Value> = self
            .buffer
            .entries()
            .skip(skip)
            .map(|entry| json!({ "timestamp": entry.timestamp, "value": entry.value }))
            .collect();
        json!({
            "timestamp": self.buffer.latest_timestamp(),
            "span": self.buffer.span(),
            "size": self.buffer.len(),
            "entries": entries,
        })
    }

    fn save_state(&self) -> AggregateResult<Vec<u8>> {
        state::encode(Self::KIND, &self.buffer)
    }

    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()> {
        let buffer: WindowBuffer = state::decode(Self::KIND, bytes)?;
        ensure_same(Self::KIND, "windowSpan", self.buffer.span(), buffer.span())?;
        self.buffer = buffer;
        Ok(())
    }

    fn reset(&mut self) {
        self.buffer.reset();
    }
}
