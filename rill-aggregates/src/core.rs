//! Foundational traits and shared abstractions.

use std::fmt::Display;

use rill_core::{AggregateDescriptor, FieldError, Record, RecordId, Timestamp};
use serde_json::Value;
use thiserror::Error;

use crate::window::WindowBuffer;

/// Result alias used by aggregate callbacks and constructors.
pub type AggregateResult<T> = Result<T, AggregateError>;

/// Failures raised while configuring or updating an aggregate.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A configuration option has an unusable value.
    #[error("{kind}: invalid value {value} for `{name}`")]
    InvalidParameter {
        /// Aggregate type tag.
        kind: String,
        /// Option name.
        name: &'static str,
        /// Rejected value, rendered.
        value: String,
    },
    /// A configuration option required by the type is absent.
    #[error("{kind}: missing required option `{name}`")]
    MissingParameter {
        /// Aggregate type tag.
        kind: String,
        /// Option name.
        name: &'static str,
    },
    /// The upstream aggregate does not expose what this type consumes.
    #[error("{kind}: {reason}")]
    IncompatibleInput {
        /// Aggregate type tag.
        kind: String,
        /// Human readable explanation.
        reason: String,
    },
    /// A record field could not be read.
    #[error(transparent)]
    Field(#[from] FieldError),
    /// An update arrived with a timestamp older than the current state.
    #[error("timestamp {received} precedes the latest accepted timestamp {previous}")]
    OutOfOrderTimestamp {
        /// Latest timestamp already accepted.
        previous: Timestamp,
        /// Rejected timestamp.
        received: Timestamp,
    },
    /// Serialized state could not be produced or applied.
    #[error("{kind}: state error: {reason}")]
    State {
        /// Aggregate type tag.
        kind: String,
        /// Codec or validation failure.
        reason: String,
    },
    /// Failure raised by user-supplied aggregate logic.
    #[error("{0}")]
    Custom(String),
}

impl AggregateError {
    /// Builds an [`AggregateError::InvalidParameter`].
    pub fn invalid_parameter(kind: &str, name: &'static str, value: impl Display) -> Self {
        Self::InvalidParameter {
            kind: kind.to_string(),
            name,
            value: value.to_string(),
        }
    }

    /// Builds an [`AggregateError::MissingParameter`].
    pub fn missing_parameter(kind: &str, name: &'static str) -> Self {
        Self::MissingParameter {
            kind: kind.to_string(),
            name,
        }
    }

    /// Builds an [`AggregateError::IncompatibleInput`].
    pub fn incompatible_input(kind: &str, reason: impl Into<String>) -> Self {
        Self::IncompatibleInput {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }

    /// Builds an [`AggregateError::State`].
    pub fn state(kind: &str, reason: impl Display) -> Self {
        Self::State {
            kind: kind.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error stems from configuration rather than from data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. }
                | Self::MissingParameter { .. }
                | Self::IncompatibleInput { .. }
        )
    }
}

/// Outputs an aggregate exposes to downstream consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Exposes a `(timestamp, value)` pair.
    pub series: bool,
    /// Exposes a [`WindowBuffer`] together with its last delta.
    pub window: bool,
}

impl Capabilities {
    /// Exposes nothing readable by built-in consumers.
    pub const NONE: Self = Self {
        series: false,
        window: false,
    };
    /// Exposes a time series point.
    pub const SERIES: Self = Self {
        series: true,
        window: false,
    };
    /// Exposes a time series point and a window.
    pub const WINDOW: Self = Self {
        series: true,
        window: true,
    };
}

/// Everything an aggregate sees when a record mutation is dispatched to it.
#[derive(Clone, Copy)]
pub struct UpdateContext<'a> {
    /// Store-assigned identifier of the mutated record.
    pub record_id: RecordId,
    /// The record as added/updated, or as it was before deletion.
    pub record: &'a Record,
    /// The declared upstream aggregates in declaration order, already
    /// updated for this event.
    pub inputs: &'a [&'a dyn Aggregate],
}

impl<'a> UpdateContext<'a> {
    /// Context for an aggregate without upstream aggregates.
    pub fn new(record_id: RecordId, record: &'a Record) -> Self {
        Self {
            record_id,
            record,
            inputs: &[],
        }
    }

    /// The same event seen through `inputs`.
    #[must_use]
    pub fn with_inputs(self, inputs: &'a [&'a dyn Aggregate]) -> Self {
        Self { inputs, ..self }
    }

    /// The first declared upstream aggregate.
    pub fn input(&self) -> Option<&'a dyn Aggregate> {
        self.inputs.first().copied()
    }
}

/// Incrementally maintained computation over a record stream or another
/// aggregate's output.
///
/// Callbacks are invoked by the dispatcher one event at a time, in
/// dependency order. Absent capabilities default to no-ops.
pub trait Aggregate: Send {
    /// Type tag the aggregate was registered with.
    fn kind(&self) -> &str;

    /// What downstream aggregates can read from this one.
    fn capabilities(&self) -> Capabilities;

    /// Validates the declared upstreams, in declaration order. Called at
    /// registration and whenever an upstream is redefined.
    fn check_inputs(&self, _inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        Ok(())
    }

    /// Synchronises with the upstreams' current state. Called once after
    /// registration and again whenever an upstream is redefined or restored,
    /// so window consumers never apply evictions of entries they did not see
    /// admitted.
    fn attach(&mut self, _inputs: &[&dyn Aggregate]) -> AggregateResult<()> {
        Ok(())
    }

    /// A record was pushed into the store.
    fn on_add(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// A previously pushed record was replaced.
    fn on_update(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// A previously pushed record was removed.
    fn on_delete(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        Ok(())
    }

    /// Logical time advanced without a new record.
    fn on_time(
        &mut self,
        _timestamp: Timestamp,
        _inputs: &[&dyn Aggregate],
    ) -> AggregateResult<()> {
        Ok(())
    }

    /// Current numeric output.
    fn value(&self) -> Option<f64> {
        None
    }

    /// Timestamp of the current output.
    fn timestamp(&self) -> Option<Timestamp> {
        None
    }

    /// Window exposed to window consumers.
    fn window(&self) -> Option<&WindowBuffer> {
        None
    }

    /// Whether the aggregate has produced any output yet.
    fn is_initialized(&self) -> bool {
        self.value().is_some()
    }

    /// JSON view of the current state, listing at most `limit` items of any
    /// collection it contains.
    fn snapshot(&self, limit: Option<usize>) -> Value;

    /// Serializes the internal state.
    fn save_state(&self) -> AggregateResult<Vec<u8>>;

    /// Replaces the internal state with one produced by [`Aggregate::save_state`].
    fn load_state(&mut self, bytes: &[u8]) -> AggregateResult<()>;

    /// Returns to the freshly constructed state.
    fn reset(&mut self);
}

/// Reads an option every instance of `kind` needs.
pub(crate) fn required<'a, T>(
    kind: &str,
    name: &'static str,
    value: Option<&'a T>,
) -> AggregateResult<&'a T>
where
    T: ?Sized,
{
    value.ok_or_else(|| AggregateError::missing_parameter(kind, name))
}

/// The upstream of a type reading at most one aggregate.
pub(crate) fn single_input<'a>(
    kind: &str,
    inputs: &[&'a dyn Aggregate],
) -> AggregateResult<Option<&'a dyn Aggregate>> {
    match inputs {
        [] => Ok(None),
        [input] => Ok(Some(*input)),
        _ => Err(AggregateError::incompatible_input(
            kind,
            format!("reads a single input aggregate but {} were declared", inputs.len()),
        )),
    }
}

/// Requires an upstream exposing a window.
pub(crate) fn require_window(kind: &str, input: Option<&dyn Aggregate>) -> AggregateResult<()> {
    match input {
        Some(upstream) if upstream.capabilities().window => Ok(()),
        Some(upstream) => Err(AggregateError::incompatible_input(
            kind,
            format!("input of type `{}` does not expose a window", upstream.kind()),
        )),
        None => Err(AggregateError::incompatible_input(
            kind,
            "requires an input aggregate exposing a window",
        )),
    }
}

/// Positive, finite float option.
pub(crate) fn positive(kind: &str, name: &'static str, value: f64) -> AggregateResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(AggregateError::invalid_parameter(kind, name, value))
    }
}

/// Reads `windowSpan` from a descriptor.
pub(crate) fn window_span(kind: &str, descriptor: &AggregateDescriptor) -> AggregateResult<i64> {
    let span = *required(kind, "windowSpan", descriptor.window_span.as_ref())?;
    if span <= 0 {
        return Err(AggregateError::invalid_parameter(kind, "windowSpan", span));
    }
    Ok(span)
}

/// Clamps a collection length to the snapshot limit.
pub(crate) fn limit_len(len: usize, limit: Option<usize>) -> usize {
    limit.map_or(len, |limit| limit.min(len))
}

/// The upstream window whose delta a window consumer applies.
pub(crate) fn upstream_window<'a>(
    kind: &str,
    input: Option<&'a dyn Aggregate>,
) -> AggregateResult<&'a WindowBuffer> {
    input
        .and_then(|upstream| upstream.window())
        .ok_or_else(|| AggregateError::incompatible_input(kind, "input does not expose a window"))
}
