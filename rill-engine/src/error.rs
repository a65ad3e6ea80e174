use rill_aggregates::AggregateError;
use rill_core::RecordId;
use thiserror::Error;

/// Result alias for store and engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result alias for state persistence.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Error type surfaced by store and engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown aggregate type '{0}'")]
    UnknownAggregateType(String),
    #[error("aggregate '{aggregate}' reads unknown input '{input}'")]
    UnknownInputAggregate { aggregate: String, input: String },
    #[error("registering '{aggregate}' would close the dependency cycle {}", cycle.join(" -> "))]
    CyclicDependency {
        aggregate: String,
        cycle: Vec<String>,
    },
    #[error("invalid configuration for '{aggregate}': {reason}")]
    InvalidConfiguration { aggregate: String, reason: String },
    #[error("unknown aggregate '{0}'")]
    UnknownAggregate(String),
    #[error("aggregate '{aggregate}' is consumed by {}", dependents.join(", "))]
    AggregateInUse {
        aggregate: String,
        dependents: Vec<String>,
    },
    #[error("re-entrant access to store '{0}' while a dispatch pass is running")]
    ReentrantMutation(String),
    #[error("unknown record {0}")]
    UnknownRecord(RecordId),
    #[error("store '{0}' is closed")]
    StoreClosed(String),
    #[error("unknown store '{0}'")]
    UnknownStore(String),
    #[error("store '{0}' is already open")]
    DuplicateStore(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl EngineError {
    pub(crate) fn invalid_configuration(aggregate: &str, reason: impl ToString) -> Self {
        Self::InvalidConfiguration {
            aggregate: aggregate.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error was raised while validating a registration.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::UnknownAggregateType(_)
                | Self::UnknownInputAggregate { .. }
                | Self::CyclicDependency { .. }
                | Self::InvalidConfiguration { .. }
        )
    }
}

/// Failures while saving or loading aggregate state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a rill state file")]
    BadMagic,
    #[error("unsupported state format version {0}")]
    UnsupportedVersion(u8),
    #[error("state file is truncated")]
    Truncated,
    #[error("state checksum mismatch (stored {stored:#010x}, computed {computed:#010x})")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("state encoding error: {0}")]
    Codec(String),
    #[error("saved state references unknown aggregate '{0}'")]
    UnknownAggregate(String),
    #[error("aggregate '{aggregate}' is a '{live}' but the saved state is a '{saved}'")]
    KindMismatch {
        aggregate: String,
        live: String,
        saved: String,
    },
    #[error("aggregate '{aggregate}' rejected its state: {source}")]
    State {
        aggregate: String,
        #[source]
        source: AggregateError,
    },
}

impl From<bincode::Error> for PersistenceError {
    fn from(value: bincode::Error) -> Self {
        Self::Codec(value.to_string())
    }
}
