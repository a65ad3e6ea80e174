#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

//! Incrementally maintained aggregates over timestamped record streams.

/// Built-in aggregate implementations.
pub mod aggregates;
/// Foundational traits and shared abstractions.
pub mod core;
/// User-supplied aggregate logic.
pub mod custom;
/// Where series aggregates read their points from.
pub mod source;
/// Binary codec for aggregate state.
pub mod state;
/// Time-span window buffer.
pub mod window;

/// Re-export of the core trait and error type to make the crate easy to consume.
pub use crate::core::{Aggregate, AggregateError, AggregateResult, Capabilities, UpdateContext};
/// Re-export of the custom aggregate extension point.
pub use crate::custom::{Custom, CustomAggregate};
/// Re-export of the window buffer.
pub use crate::window::{WindowBuffer, WindowEntry};
