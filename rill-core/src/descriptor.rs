use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FieldValue;

/// How an EMA treats the input between two sparse samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecayMode {
    /// The new sample is authoritative for the whole gap.
    #[default]
    Next,
    /// The previous sample is authoritative for the whole gap.
    Previous,
    /// The input moves linearly from the previous to the new sample.
    Linear,
}

impl DecayMode {
    /// Lowercase name used in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Next => "next",
            Self::Previous => "previous",
            Self::Linear => "linear",
        }
    }
}

impl fmt::Display for DecayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecayMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "next" => Ok(Self::Next),
            "previous" => Ok(Self::Previous),
            "linear" => Ok(Self::Linear),
            other => Err(format!("unknown decay mode '{other}'")),
        }
    }
}

/// Registration request for an aggregate.
///
/// Only `name` and `kind` are always required; every other option is read by
/// the aggregate types that need it and ignored by the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateDescriptor {
    /// Unique name within the store.
    pub name: String,
    /// Type tag resolved through the factory registry.
    #[serde(rename = "type", alias = "kind")]
    pub kind: String,
    /// Record field holding the timestamp.
    #[serde(default, alias = "timestamp_field")]
    pub timestamp_field: Option<String>,
    /// Record field holding the numeric value.
    #[serde(default, alias = "value_field")]
    pub value_field: Option<String>,
    /// Maximum entry age, in the same unit as record timestamps.
    #[serde(default, alias = "window_span")]
    pub window_span: Option<i64>,
    /// Name of the upstream aggregate this one consumes.
    #[serde(
        default,
        alias = "inputAggregateName",
        alias = "input_aggregate_name"
    )]
    pub input: Option<String>,
    /// Further upstream aggregates, read after `input` by multi-input types.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    /// EMA decay mode.
    #[serde(default, alias = "decay_mode")]
    pub decay_mode: Option<DecayMode>,
    /// EMA decay interval, in timestamp units.
    #[serde(default)]
    pub interval: Option<f64>,
    /// Span of the EMA warm-up buffer; the first point seeds the average
    /// when absent.
    #[serde(default, alias = "init_window")]
    pub init_window: Option<i64>,
    /// Level watched by threshold detectors.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Free-form options for user-supplied aggregate types.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, FieldValue>,
}

impl AggregateDescriptor {
    /// Descriptor with only a name and a type tag.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            timestamp_field: None,
            value_field: None,
            window_span: None,
            input: None,
            inputs: Vec::new(),
            decay_mode: None,
            interval: None,
            init_window: None,
            threshold: None,
            params: BTreeMap::new(),
        }
    }

    /// Sets the record field holding the timestamp.
    #[must_use]
    pub fn with_timestamp_field(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    /// Sets the record field holding the value.
    #[must_use]
    pub fn with_value_field(mut self, field: impl Into<String>) -> Self {
        self.value_field = Some(field.into());
        self
    }

    /// Sets the window span.
    #[must_use]
    pub fn with_window_span(mut self, span: i64) -> Self {
        self.window_span = Some(span);
        self
    }

    /// Sets the primary upstream aggregate.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Appends upstream aggregates after any already declared.
    /// Sets the primary upstream aggregate.
    #[must_use]
    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.extend(inputs.into_iter().map(Into::into));
        self
    }

    /// Sets the EMA decay mode.
    #[must_use]
    pub fn with_decay_mode(mut self, mode: DecayMode) -> Self {
        self.decay_mode = Some(mode);
        self
    }

    /// Sets the EMA decay interval.
    #[must_use]
    pub fn with_interval(mut self, interval: f64) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the EMA warm-up span.
    #[must_use]
    pub fn with_init_window(mut self, span: i64) -> Self {
        self.init_window = Some(span);
        self
    }

    /// Sets the threshold level.
    #[must_use]
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Adds a free-form option.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Every declared upstream aggregate, `input` first.
    pub fn input_names(&self) -> Vec<&str> {
        self.input
            .iter()
            .chain(&self.inputs)
            .map(String::as_str)
            .collect()
    }

    /// Whether the aggregate reads any upstream aggregate.
    pub fn has_inputs(&self) -> bool {
        self.input.is_some() || !self.inputs.is_empty()
    }
}
