//! Where a series aggregate takes its `(timestamp, value)` points from.
//!
//! An aggregate either reads two fields of every added record, or it is
//! chained behind an upstream aggregate and reads that aggregate's output
//! after the upstream has processed the same event.

use rill_core::{AggregateDescriptor, Record, Timestamp};

use crate::core::{required, Aggregate, AggregateError, AggregateResult};

/// Origin of the points consumed by a series aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSource {
    /// Read the named fields of each added record.
    Record {
        /// Field holding the timestamp.
        timestamp_field: String,
        /// Field holding the numeric value.
        value_field: String,
    },
    /// Read the output of the declared upstream aggregate.
    Upstream,
}

impl SeriesSource {
    /// Chooses the upstream when the descriptor names inputs, and the
    /// record fields otherwise.
    pub fn from_descriptor(kind: &str, descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        if descriptor.has_inputs() {
            return Ok(Self::Upstream);
        }
        let timestamp_field = required(kind, "timestampField", descriptor.timestamp_field.as_ref())?;
        let value_field = required(kind, "valueField", descriptor.value_field.as_ref())?;
        Ok(Self::Record {
            timestamp_field: timestamp_field.clone(),
            value_field: value_field.clone(),
        })
    }

    /// Like [`SeriesSource::from_descriptor`] but never chained.
    pub fn record_only(kind: &str, descriptor: &AggregateDescriptor) -> AggregateResult<Self> {
        if descriptor.has_inputs() {
            return Err(AggregateError::incompatible_input(
                kind,
                "reads records directly and cannot consume another aggregate",
            ));
        }
        Self::from_descriptor(kind, descriptor)
    }

    /// Checks that the declared upstream matches the source.
    pub fn check(&self, kind: &str, input: Option<&dyn Aggregate>) -> AggregateResult<()> {
        match (self, input) {
            (Self::Record { .. }, None) => Ok(()),
            (Self::Record { .. }, Some(_)) => Err(AggregateError::incompatible_input(
                kind,
                "configured to read records but an input aggregate was supplied",
            )),
            (Self::Upstream, Some(upstream)) if upstream.capabilities().series => Ok(()),
            (Self::Upstream, Some(upstream)) => Err(AggregateError::incompatible_input(
                kind,
                format!(
                    "input of type `{}` does not expose a timestamped value",
                    upstream.kind()
                ),
            )),
            (Self::Upstream, None) => Err(AggregateError::incompatible_input(
                kind,
                "requires an input aggregate",
            )),
        }
    }

    /// Reads the next point. `None` means the upstream has nothing yet.
    pub fn read(
        &self,
        record: &Record,
        input: Option<&dyn Aggregate>,
    ) -> AggregateResult<Option<(Timestamp, f64)>> {
        match self {
            Self::Record {
                timestamp_field,
                value_field,
            } => {
                let timestamp = record.timestamp(timestamp_field)?;
                let value = record.number(value_field)?;
                Ok(Some((timestamp, value)))
            }
            Self::Upstream => Ok(input.and_then(|upstream| {
                let timestamp = upstream.timestamp()?;
                let value = upstream.value()?;
                Some((timestamp, value))
            })),
        }
    }
}
