//! Binary codec for aggregate state.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::{AggregateError, AggregateResult};

/// Serializes an aggregate's state struct.
pub fn encode<T: Serialize>(kind: &str, state: &T) -> AggregateResult<Vec<u8>> {
    bincode::serialize(state).map_err(|err| AggregateError::state(kind, err))
}

/// Deserializes an aggregate's state struct.
pub fn decode<T: DeserializeOwned>(kind: &str, bytes: &[u8]) -> AggregateResult<T> {
    bincode::deserialize(bytes).map_err(|err| AggregateError::state(kind, err))
}

/// Fails when a persisted configuration value differs from the live one.
pub(crate) fn ensure_same<T>(kind: &str, name: &str, live: T, saved: T) -> AggregateResult<()>
where
    T: PartialEq + std::fmt::Debug,
{
    if live == saved {
        Ok(())
    } else {
        Err(AggregateError::state(
            kind,
            format!("saved {name} {saved:?} does not match configured {live:?}"),
        ))
    }
}
