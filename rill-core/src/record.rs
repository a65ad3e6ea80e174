use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Timestamp;

/// Identifier assigned to a record when it is pushed into a store.
pub type RecordId = u64;

/// Result alias for typed field reads.
pub type FieldResult<T> = Result<T, FieldError>;

/// Failure to read a typed value out of a record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The record does not carry the field.
    #[error("record has no field `{field}`")]
    Missing {
        /// Requested field name.
        field: String,
    },
    /// The field holds a value of another type.
    #[error("field `{field}` is not {expected}")]
    WrongType {
        /// Requested field name.
        field: String,
        /// Description of the expected type.
        expected: &'static str,
    },
}

/// A single typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Explicitly empty value.
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer; also read as a millisecond timestamp.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Wall-clock time.
    Time(DateTime<Utc>),
    /// Free text.
    Text(String),
}

impl FieldValue {
    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Timestamp view of the value; integers are read as milliseconds.
    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Self::Int(value) => Some(Timestamp::from_millis(*value)),
            Self::Time(value) => Some(Timestamp::from(*value)),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Time(value)
    }
}

impl From<Timestamp> for FieldValue {
    fn from(value: Timestamp) -> Self {
        Self::Int(value.as_millis())
    }
}

/// Immutable, ordered mapping from field name to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the record with `field` set to `value`.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Raw access to a field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Reads a numeric field.
    pub fn number(&self, field: &str) -> FieldResult<f64> {
        self.require(field)?
            .as_f64()
            .ok_or_else(|| FieldError::WrongType {
                field: field.to_string(),
                expected: "numeric",
            })
    }

    /// Reads a timestamp field.
    pub fn timestamp(&self, field: &str) -> FieldResult<Timestamp> {
        self.require(field)?
            .as_timestamp()
            .ok_or_else(|| FieldError::WrongType {
                field: field.to_string(),
                expected: "a timestamp",
            })
    }

    /// Iterates fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no field.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn require(&self, field: &str) -> FieldResult<&FieldValue> {
        self.fields.get(field).ok_or_else(|| FieldError::Missing {
            field: field.to_string(),
        })
    }
}

impl<K, V> FromIterator<(K, V)> for Record
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

/// Kind of change applied to a store; each one triggers exactly one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// A new record was appended.
    Add,
    /// An existing record was replaced.
    Update,
    /// An existing record was removed.
    Delete,
}

impl Mutation {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
