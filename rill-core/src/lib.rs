#![deny(missing_docs)]
//! Core domain types shared by every Rill crate.
//!
//! Records are immutable field maps pushed into a store; aggregates read a
//! designated timestamp field and a designated numeric field from them.

mod descriptor;
mod record;
mod time;

pub use descriptor::{AggregateDescriptor, DecayMode};
pub use record::{FieldError, FieldResult, FieldValue, Mutation, Record, RecordId};
pub use time::Timestamp;
