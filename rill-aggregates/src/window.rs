//! Time-span window buffer shared by the window aggregates.

use std::collections::VecDeque;

use rill_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::core::{AggregateError, AggregateResult};

/// A single `(timestamp, value)` pair retained by a [`WindowBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry {
    /// Logical time the value was observed at.
    pub timestamp: Timestamp,
    /// Observed value.
    pub value: f64,
}

/// Ordered buffer of the entries seen within the last `span` time units.
///
/// Entries are kept in insertion order, which is also timestamp order: an
/// entry older than the newest one already admitted is rejected with
/// [`AggregateError::OutOfOrderTimestamp`]. After every update the buffer
/// holds exactly the entries with `latest - timestamp <= span`.
///
/// Each update also records its delta (the admitted entry and the evicted
/// ones) so downstream aggregates can maintain running statistics without
/// rescanning the buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowBuffer {
    span: i64,
    entries: VecDeque<WindowEntry>,
    latest: Option<Timestamp>,
    #[serde(skip)]
    added: Option<WindowEntry>,
    #[serde(skip)]
    evicted: Vec<WindowEntry>,
}

impl WindowBuffer {
    /// Creates an empty buffer. The span must be positive.
    pub fn new(span: i64) -> AggregateResult<Self> {
        if span <= 0 {
            return Err(AggregateError::invalid_parameter(
                "timeSeriesWinBuf",
                "windowSpan",
                span,
            ));
        }
        Ok(Self {
            span,
            entries: VecDeque::new(),
            latest: None,
            added: None,
            evicted: Vec::new(),
        })
    }

    /// Configured maximum entry age.
    pub fn span(&self) -> i64 {
        self.span
    }

    /// Timestamp of the most recent update, if any.
    pub fn latest_timestamp(&self) -> Option<Timestamp> {
        self.latest
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer currently retains nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recently admitted entry still in the window.
    pub fn newest(&self) -> Option<&WindowEntry> {
        self.entries.back()
    }

    /// Retained entries, oldest first.
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &WindowEntry> + ExactSizeIterator + '_ {
        self.entries.iter()
    }

    /// Retained values, oldest first. Calling it again restarts the sequence.
    pub fn values(&self) -> impl DoubleEndedIterator<Item = f64> + ExactSizeIterator + '_ {
        self.entries.iter().map(|entry| entry.value)
    }

    /// Retained timestamps, oldest first.
    pub fn timestamps(
        &self,
    ) -> impl DoubleEndedIterator<Item = Timestamp> + ExactSizeIterator + '_ {
        self.entries.iter().map(|entry| entry.timestamp)
    }

    /// Entry admitted by the last update.
    pub fn added(&self) -> Option<&WindowEntry> {
        self.added.as_ref()
    }

    /// Entries evicted by the last update, oldest first.
    pub fn evicted(&self) -> &[WindowEntry] {
        &self.evicted
    }

    /// Forgets the delta of the previous update.
    pub fn clear_delta(&mut self) {
        self.added = None;
        self.evicted.clear();
    }

    /// Admits a new entry and evicts everything that fell out of the span.
    pub fn add(&mut self, timestamp: Timestamp, value: f64) -> AggregateResult<()> {
        self.clear_delta();
        self.check_order(timestamp)?;
        let entry = WindowEntry { timestamp, value };
        self.entries.push_back(entry);
        self.added = Some(entry);
        self.latest = Some(timestamp);
        self.evict(timestamp);
        Ok(())
    }

    /// Moves the window forward without admitting a value.
    pub fn advance_to(&mut self, timestamp: Timestamp) -> AggregateResult<()> {
        self.clear_delta();
        self.check_order(timestamp)?;
        self.latest = Some(timestamp);
        self.evict(timestamp);
        Ok(())
    }

    /// Drops all entries and the delta.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.latest = None;
        self.clear_delta();
    }

    fn check_order(&self, timestamp: Timestamp) -> AggregateResult<()> {
        match self.latest {
            Some(previous) if timestamp < previous => Err(AggregateError::OutOfOrderTimestamp {
                previous,
                received: timestamp,
            }),
            _ => Ok(()),
        }
    }

    fn evict(&mut self, now: Timestamp) {
        while let Some(oldest) = self.entries.front() {
            if now - oldest.timestamp <= self.span {
                break;
            }
            if let Some(expired) = self.entries.pop_front() {
                self.evicted.push(expired);
            }
        }
    }
}
