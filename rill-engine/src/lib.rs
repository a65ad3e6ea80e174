//! Stores, dependency-ordered dispatch, and state persistence for Rill aggregates.

mod engine;
mod error;
mod graph;
mod handle;
mod persistence;
mod registry;
mod sequencer;
mod store;

pub use engine::Engine;
pub use error::{EngineError, EngineResult, PersistenceError, PersistenceResult};
pub use graph::AggregateGraph;
pub use handle::AggregateHandle;
pub use persistence::{read_envelope, write_envelope, SavedAggregate};
pub use registry::{AggregateFactory, FactoryRegistry};
pub use sequencer::RecordSequencer;
pub use store::{
    AggregateFailure, AggregateStatus, DispatchReport, RecordRetention, Store,
    DEFAULT_RETAINED_RECORDS,
};
