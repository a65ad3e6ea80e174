//! A store: the record source, its aggregates, and the dispatcher driving them.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use rill_aggregates::{Aggregate, AggregateError, UpdateContext};
use rill_core::{AggregateDescriptor, Mutation, Record, RecordId, Timestamp};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::graph::AggregateGraph;
use crate::handle::AggregateHandle;
use crate::registry::FactoryRegistry;
use crate::sequencer::RecordSequencer;
use crate::{EngineError, EngineResult};

/// Lifecycle of an aggregate within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    /// Validated and wired into the graph; no event delivered yet.
    Registered,
    /// Receiving events.
    Active,
    /// The store was closed; no further events.
    Closed,
}

/// A callback error isolated by the dispatcher.
#[derive(Debug)]
pub struct AggregateFailure {
    /// Name of the failing aggregate.
    pub aggregate: String,
    /// Error it returned.
    pub error: AggregateError,
}

/// Outcome of one dispatch pass.
///
/// Aggregates that succeeded are never rolled back. Aggregates reading a
/// failed aggregate, directly or transitively, are skipped for the pass.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Callbacks that returned an error, in dispatch order.
    pub failures: Vec<AggregateFailure>,
    /// Aggregates not invoked because an upstream failed.
    pub skipped: Vec<String>,
}

impl DispatchReport {
    /// Whether every aggregate processed the event.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_empty()
    }

    /// Error raised by `aggregate` during the pass, if any.
    pub fn failure(&self, aggregate: &str) -> Option<&AggregateError> {
        self.failures
            .iter()
            .find(|failure| failure.aggregate == aggregate)
            .map(|failure| &failure.error)
    }
}

/// Default number of recent records a store keeps for [`Store::record`],
/// [`Store::update`] and [`Store::delete`].
pub const DEFAULT_RETAINED_RECORDS: usize = 1_024;

/// Which pushed records a store keeps a copy of.
///
/// Aggregates never read retained records; the copies only let callers
/// update or delete a record by id without supplying it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordRetention {
    /// Keep nothing; deletions must supply the record.
    None,
    /// Keep the most recently pushed records, up to the given count.
    Latest(usize),
    /// Keep every record until it is deleted.
    All,
}

impl Default for RecordRetention {
    fn default() -> Self {
        Self::Latest(DEFAULT_RETAINED_RECORDS)
    }
}

#[derive(Clone, Copy)]
enum Trigger<'a> {
    Record {
        mutation: Mutation,
        record_id: RecordId,
        record: &'a Record,
    },
    Time(Timestamp),
}

impl Trigger<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Record { mutation, .. } => mutation.as_str(),
            Self::Time(_) => "time",
        }
    }
}

pub(crate) struct Slot {
    pub(crate) name: String,
    pub(crate) descriptor: AggregateDescriptor,
    /// Positions of the declared inputs, all before this slot.
    pub(crate) inputs: Vec<usize>,
    pub(crate) aggregate: Box<dyn Aggregate>,
    pub(crate) status: AggregateStatus,
}

/// Splits out the slot at `position` together with its already-updated inputs.
fn split_slot(slots: &mut [Slot], position: usize) -> (&mut Slot, Vec<&dyn Aggregate>) {
    let (upstream, rest) = slots.split_at_mut(position);
    let slot = &mut rest[0];
    let inputs = slot
        .inputs
        .iter()
        .map(|&index| upstream[index].aggregate.as_ref())
        .collect();
    (slot, inputs)
}

fn dispatch(store: &str, slots: &mut [Slot], trigger: Trigger<'_>) -> DispatchReport {
    let mut report = DispatchReport::default();
    let mut failed = vec![false; slots.len()];
    for position in 0..slots.len() {
        let (slot, inputs) = split_slot(slots, position);
        if slot.inputs.iter().any(|&index| failed[index]) {
            failed[position] = true;
            report.skipped.push(slot.name.clone());
            continue;
        }
        if slot.status == AggregateStatus::Registered {
            slot.status = AggregateStatus::Active;
        }
        let outcome = match trigger {
            Trigger::Record {
                mutation,
                record_id,
                record,
            } => {
                let ctx = UpdateContext::new(record_id, record).with_inputs(&inputs);
                match mutation {
                    Mutation::Add => slot.aggregate.on_add(&ctx),
                    Mutation::Update => slot.aggregate.on_update(&ctx),
                    Mutation::Delete => slot.aggregate.on_delete(&ctx),
                }
            }
            Trigger::Time(timestamp) => slot.aggregate.on_time(timestamp, &inputs),
        };
        if let Err(error) = outcome {
            warn!(
                store = %store,
                aggregate = %slot.name,
                event = trigger.label(),
                error = %error,
                "aggregate callback failed"
            );
            failed[position] = true;
            report.failures.push(AggregateFailure {
                aggregate: slot.name.clone(),
                error,
            });
        }
    }
    debug!(
        store = %store,
        event = trigger.label(),
        aggregates = slots.len(),
        failures = report.failures.len(),
        skipped = report.skipped.len(),
        "dispatch pass complete"
    );
    report
}

pub(crate) struct StoreState {
    pub(crate) closed: bool,
    pub(crate) graph: AggregateGraph,
    /// Slots in dispatch order.
    pub(crate) slots: Vec<Slot>,
    retention: RecordRetention,
    records: BTreeMap<RecordId, Record>,
}

impl StoreState {
    fn new(retention: RecordRetention) -> Self {
        Self {
            closed: false,
            graph: AggregateGraph::new(),
            slots: Vec::new(),
            retention,
            records: BTreeMap::new(),
        }
    }

    fn retain(&mut self, record_id: RecordId, record: Record) {
        let limit = match self.retention {
            RecordRetention::None => return,
            RecordRetention::Latest(limit) => limit,
            RecordRetention::All => usize::MAX,
        };
        self.records.insert(record_id, record);
        while self.records.len() > limit {
            self.records.pop_first();
        }
    }

    pub(crate) fn position(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|slot| slot.name == name)
    }

    pub(crate) fn slot(&self, name: &str) -> EngineResult<&Slot> {
        self.position(name)
            .map(|position| &self.slots[position])
            .ok_or_else(|| EngineError::UnknownAggregate(name.to_string()))
    }

    /// Validates and wires in a new aggregate, or redefines an existing one.
    /// Leaves the state untouched on error. Returns whether it redefined.
    fn register(
        &mut self,
        registry: &FactoryRegistry,
        descriptor: AggregateDescriptor,
    ) -> EngineResult<bool> {
        let name = descriptor.name.clone();
        if name.trim().is_empty() {
            return Err(EngineError::invalid_configuration(
                &name,
                "aggregate name must not be empty",
            ));
        }
        let mut aggregate = registry.build(&descriptor)?;

        let input_names = descriptor.input_names();
        let input_positions = input_names
            .iter()
            .map(|input| {
                self.position(input)
                    .ok_or_else(|| EngineError::UnknownInputAggregate {
                        aggregate: name.clone(),
                        input: input.to_string(),
                    })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        let graph = self
            .graph
            .with_node(&name, &input_names)
            .map_err(|cycle| EngineError::CyclicDependency {
                aggregate: name.clone(),
                cycle,
            })?;

        let inputs: Vec<&dyn Aggregate> = input_positions
            .iter()
            .map(|&position| self.slots[position].aggregate.as_ref())
            .collect();
        aggregate
            .check_inputs(&inputs)
            .map_err(|err| EngineError::invalid_configuration(&name, err))?;
        let redefined = self.position(&name).is_some();
        if redefined {
            for dependent in self.graph.dependents(&name) {
                let slot = self.slot(&dependent)?;
                let dependent_inputs = self
                    .graph
                    .inputs_of(&dependent)
                    .iter()
                    .map(|input| {
                        if *input == name {
                            Ok(aggregate.as_ref())
                        } else {
                            self.slot(input).map(|slot| slot.aggregate.as_ref())
                        }
                    })
                    .collect::<EngineResult<Vec<_>>>()?;
                slot.aggregate
                    .check_inputs(&dependent_inputs)
                    .map_err(|err| EngineError::invalid_configuration(&dependent, err))?;
            }
        }
        aggregate
            .attach(&inputs)
            .map_err(|err| EngineError::invalid_configuration(&name, err))?;

        let mut slots = self.take_slots();
        slots.insert(
            name.clone(),
            Slot {
                name: name.clone(),
                descriptor,
                inputs: Vec::new(),
                aggregate,
                status: AggregateStatus::Registered,
            },
        );
        self.graph = graph;
        self.place_slots(slots);
        if redefined {
            let downstream = self.graph.downstream(&name);
            self.reattach_all(&downstream)?;
        }
        Ok(redefined)
    }

    fn unregister(&mut self, name: &str) -> EngineResult<()> {
        let position = self
            .position(name)
            .ok_or_else(|| EngineError::UnknownAggregate(name.to_string()))?;
        let dependents = self.graph.dependents(name);
        if !dependents.is_empty() {
            return Err(EngineError::AggregateInUse {
                aggregate: name.to_string(),
                dependents,
            });
        }
        let mut removed = self.slots.remove(position);
        removed.status = AggregateStatus::Closed;
        self.graph = self.graph.without_node(name);
        let slots = self.take_slots();
        self.place_slots(slots);
        Ok(())
    }

    fn take_slots(&mut self) -> HashMap<String, Slot> {
        self.slots
            .drain(..)
            .map(|slot| (slot.name.clone(), slot))
            .collect()
    }

    /// Lays slots out in graph order and resolves input positions.
    fn place_slots(&mut self, mut slots: HashMap<String, Slot>) {
        for name in self.graph.order() {
            if let Some(slot) = slots.remove(name) {
                self.slots.push(slot);
            }
        }
        let inputs: Vec<Vec<usize>> = self
            .slots
            .iter()
            .map(|slot| {
                self.graph
                    .inputs_of(&slot.name)
                    .iter()
                    .filter_map(|input| self.position(input))
                    .collect()
            })
            .collect();
        for (slot, inputs) in self.slots.iter_mut().zip(inputs) {
            slot.inputs = inputs;
        }
    }

    /// Resets the named aggregates, in order, and resynchronises each with
    /// its inputs.
    pub(crate) fn reattach_all(&mut self, names: &[String]) -> EngineResult<()> {
        for name in names {
            if let Some(position) = self.position(name) {
                self.reset_at(position)?;
            }
        }
        Ok(())
    }

    fn reset_all(&mut self) -> EngineResult<()> {
        for position in 0..self.slots.len() {
            self.reset_at(position)?;
        }
        Ok(())
    }

    fn reset_at(&mut self, position: usize) -> EngineResult<()> {
        let (slot, inputs) = split_slot(&mut self.slots, position);
        slot.aggregate.reset();
        slot.aggregate
            .attach(&inputs)
            .map_err(|err| EngineError::invalid_configuration(&slot.name, err))
    }
}

/// A named record source together with the aggregates maintained over it.
///
/// Mutations are serialised: a call from another thread blocks until the
/// running dispatch pass completes. A call made from inside an aggregate
/// callback on the dispatching thread fails with
/// [`EngineError::ReentrantMutation`] instead of nesting a second pass.
pub struct Store {
    name: String,
    registry: Arc<FactoryRegistry>,
    sequencer: RecordSequencer,
    state: ReentrantMutex<RefCell<StoreState>>,
}

impl Store {
    /// Opens a store resolving aggregate types among the built-ins.
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Self::with_registry(name, Arc::new(FactoryRegistry::with_builtins()))
    }

    /// Opens a store resolving aggregate types through `registry`.
    pub fn with_registry(name: impl Into<String>, registry: Arc<FactoryRegistry>) -> Arc<Self> {
        Self::with_retention(name, registry, RecordRetention::default())
    }

    /// Opens a store keeping pushed records as `retention` says.
    pub fn with_retention(
        name: impl Into<String>,
        registry: Arc<FactoryRegistry>,
        retention: RecordRetention,
    ) -> Arc<Self> {
        let name = name.into();
        info!(store = %name, ?retention, "store opened");
        Arc::new(Self {
            name,
            registry,
            sequencer: RecordSequencer::default(),
            state: ReentrantMutex::new(RefCell::new(StoreState::new(retention))),
        })
    }

    /// Name of the store.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let guard = self.state.lock();
        let mut state = guard
            .try_borrow_mut()
            .map_err(|_| EngineError::ReentrantMutation(self.name.clone()))?;
        f(&mut state)
    }

    pub(crate) fn with_open_state<R>(
        &self,
        f: impl FnOnce(&mut StoreState) -> EngineResult<R>,
    ) -> EngineResult<R> {
        self.with_state(|state| {
            if state.closed {
                return Err(EngineError::StoreClosed(self.name.clone()));
            }
            f(state)
        })
    }

    pub(crate) fn read_state<R>(
        &self,
        f: impl FnOnce(&StoreState) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let guard = self.state.lock();
        let state = guard
            .try_borrow()
            .map_err(|_| EngineError::ReentrantMutation(self.name.clone()))?;
        f(&state)
    }

    /// Runs `f` against a live aggregate.
    pub(crate) fn inspect<R>(&self, name: &str, f: impl FnOnce(&Slot) -> R) -> EngineResult<R> {
        self.read_state(|state| {
            if state.closed {
                return Err(EngineError::StoreClosed(self.name.clone()));
            }
            state.slot(name).map(f)
        })
    }

    /// Registers an aggregate, or redefines the one already using its name.
    ///
    /// A redefinition starts from a fresh state; every aggregate reading it,
    /// directly or transitively, is reset and resynchronised. Validation
    /// errors leave the store unchanged. A downstream aggregate failing to
    /// re-attach is reported after the redefinition has taken effect.
    pub fn register(
        self: &Arc<Self>,
        descriptor: AggregateDescriptor,
    ) -> EngineResult<AggregateHandle> {
        let name = descriptor.name.clone();
        let kind = descriptor.kind.clone();
        let redefined = self.with_open_state(|state| state.register(&self.registry, descriptor))?;
        info!(
            store = %self.name,
            aggregate = %name,
            kind = %kind,
            redefined,
            "aggregate registered"
        );
        Ok(AggregateHandle::new(Arc::clone(self), name))
    }

    /// Removes an aggregate no other aggregate reads.
    pub fn unregister(&self, name: &str) -> EngineResult<()> {
        self.with_open_state(|state| state.unregister(name))?;
        info!(store = %self.name, aggregate = %name, "aggregate unregistered");
        Ok(())
    }

    /// Handle on an already registered aggregate.
    pub fn handle(self: &Arc<Self>, name: &str) -> EngineResult<AggregateHandle> {
        self.read_state(|state| state.slot(name).map(|_| ()))?;
        Ok(AggregateHandle::new(Arc::clone(self), name.to_string()))
    }

    /// Names of the registered aggregates in dispatch order.
    pub fn aggregate_names(&self) -> EngineResult<Vec<String>> {
        self.read_state(|state| Ok(state.graph.order().to_vec()))
    }

    /// Descriptor an aggregate was registered with.
    pub fn descriptor(&self, name: &str) -> EngineResult<AggregateDescriptor> {
        self.read_state(|state| state.slot(name).map(|slot| slot.descriptor.clone()))
    }

    /// Appends a record and dispatches it to every aggregate.
    pub fn push(&self, record: Record) -> EngineResult<(RecordId, DispatchReport)> {
        self.with_open_state(|state| {
            let record_id = self.sequencer.next();
            let report = dispatch(
                &self.name,
                &mut state.slots,
                Trigger::Record {
                    mutation: Mutation::Add,
                    record_id,
                    record: &record,
                },
            );
            state.retain(record_id, record);
            Ok((record_id, report))
        })
    }

    fn require_issued(&self, record_id: RecordId) -> EngineResult<()> {
        if record_id == 0 || record_id > self.sequencer.last() {
            return Err(EngineError::UnknownRecord(record_id));
        }
        Ok(())
    }

    /// Replaces a previously pushed record. The retained copy, if any, is
    /// replaced too.
    pub fn update(&self, record_id: RecordId, record: Record) -> EngineResult<DispatchReport> {
        self.require_issued(record_id)?;
        self.with_open_state(|state| {
            let report = dispatch(
                &self.name,
                &mut state.slots,
                Trigger::Record {
                    mutation: Mutation::Update,
                    record_id,
                    record: &record,
                },
            );
            if let Some(retained) = state.records.get_mut(&record_id) {
                *retained = record;
            }
            Ok(report)
        })
    }

    /// Removes a previously pushed record the store still retains.
    pub fn delete(&self, record_id: RecordId) -> EngineResult<DispatchReport> {
        self.with_open_state(|state| {
            let record = state
                .records
                .remove(&record_id)
                .ok_or(EngineError::UnknownRecord(record_id))?;
            Ok(dispatch(
                &self.name,
                &mut state.slots,
                Trigger::Record {
                    mutation: Mutation::Delete,
                    record_id,
                    record: &record,
                },
            ))
        })
    }

    /// Removes a previously pushed record, as supplied by the caller. Works
    /// whether or not the store retained it.
    pub fn delete_with(&self, record_id: RecordId, record: Record) -> EngineResult<DispatchReport> {
        self.require_issued(record_id)?;
        self.with_open_state(|state| {
            state.records.remove(&record_id);
            Ok(dispatch(
                &self.name,
                &mut state.slots,
                Trigger::Record {
                    mutation: Mutation::Delete,
                    record_id,
                    record: &record,
                },
            ))
        })
    }

    /// Advances logical time, letting windows evict expired entries.
    pub fn advance_time(&self, timestamp: Timestamp) -> EngineResult<DispatchReport> {
        self.with_open_state(|state| {
            Ok(dispatch(
                &self.name,
                &mut state.slots,
                Trigger::Time(timestamp),
            ))
        })
    }

    /// Returns every aggregate to its freshly registered state.
    pub fn reset_aggregates(&self) -> EngineResult<()> {
        self.with_open_state(|state| state.reset_all())?;
        info!(store = %self.name, "aggregates reset");
        Ok(())
    }

    /// A previously pushed record the store still retains.
    pub fn record(&self, record_id: RecordId) -> EngineResult<Record> {
        self.read_state(|state| {
            state
                .records
                .get(&record_id)
                .cloned()
                .ok_or(EngineError::UnknownRecord(record_id))
        })
    }

    /// Number of retained records.
    pub fn record_count(&self) -> EngineResult<usize> {
        self.read_state(|state| Ok(state.records.len()))
    }

    /// Record retention the store was opened with.
    pub fn record_retention(&self) -> EngineResult<RecordRetention> {
        self.read_state(|state| Ok(state.retention))
    }

    /// Whether [`Store::close`] has completed.
    pub fn is_closed(&self) -> EngineResult<bool> {
        self.read_state(|state| Ok(state.closed))
    }

    /// Closes the store, persisting aggregate state to `path` first when given.
    ///
    /// No other thread can mutate the store between the save and the close.
    /// If saving fails the store stays open. Closing twice is a no-op.
    pub fn close(&self, path: Option<&Path>) -> EngineResult<()> {
        let _serialised = self.state.lock();
        if self.is_closed()? {
            return Ok(());
        }
        if let Some(path) = path {
            self.save_to_path(path)?;
        }
        self.with_state(|state| {
            state.closed = true;
            for slot in &mut state.slots {
                slot.status = AggregateStatus::Closed;
            }
            Ok(())
        })?;
        info!(store = %self.name, persisted = path.is_some(), "store closed");
        Ok(())
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(name: &str) -> AggregateDescriptor {
        AggregateDescriptor::new(name, "timeSeriesWinBuf")
            .with_timestamp_field("t")
            .with_value_field("v")
            .with_window_span(100)
    }

    fn point(t: i64, v: f64) -> Record {
        Record::new().with("t", t).with("v", v)
    }

    #[test]
    fn lifecycle_moves_from_registered_to_closed() {
        let store = Store::new("s");
        let win = store.register(window("win")).unwrap();
        assert_eq!(win.status().unwrap(), AggregateStatus::Registered);
        store.push(point(1, 1.0)).unwrap();
        assert_eq!(win.status().unwrap(), AggregateStatus::Active);

        store.close(None).unwrap();
        assert!(store.is_closed().unwrap());
        assert!(matches!(
            store.push(point(2, 1.0)),
            Err(EngineError::StoreClosed(_))
        ));
        assert!(matches!(win.current_value(), Err(EngineError::StoreClosed(_))));
        store.close(None).unwrap();
    }

    #[test]
    fn update_and_delete_require_known_records() {
        let store = Store::new("s");
        let (id, _) = store.push(point(1, 1.0)).unwrap();
        assert_eq!(id, 1);
        store.update(id, point(1, 2.0)).unwrap();
        assert_eq!(store.record(id).unwrap().number("v").unwrap(), 2.0);
        store.delete(id).unwrap();
        assert!(matches!(store.delete(id), Err(EngineError::UnknownRecord(1))));
        assert!(matches!(
            store.update(7, point(1, 1.0)),
            Err(EngineError::UnknownRecord(7))
        ));
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn retention_bounds_the_records_kept() {
        let store = Store::with_retention(
            "s",
            Arc::new(FactoryRegistry::with_builtins()),
            RecordRetention::Latest(100),
        );
        store.register(window("win")).unwrap();
        for step in 0..10_000 {
            store.push(point(step, 1.0)).unwrap();
        }
        assert_eq!(store.record_count().unwrap(), 100);
        assert!(matches!(store.record(1), Err(EngineError::UnknownRecord(1))));
        assert!(store.record(10_000).is_ok());

        store.update(1, point(1, 2.0)).unwrap();
        assert!(matches!(store.delete(1), Err(EngineError::UnknownRecord(1))));
        store.delete_with(1, point(1, 2.0)).unwrap();
        store.delete(10_000).unwrap();
        assert_eq!(store.record_count().unwrap(), 99);
        assert!(matches!(
            store.delete_with(10_001, point(1, 2.0)),
            Err(EngineError::UnknownRecord(10_001))
        ));
    }

    #[test]
    fn stores_without_retention_keep_no_records() {
        let store = Store::with_retention(
            "s",
            Arc::new(FactoryRegistry::with_builtins()),
            RecordRetention::None,
        );
        let (id, _) = store.push(point(1, 1.0)).unwrap();
        assert_eq!(store.record_count().unwrap(), 0);
        assert_eq!(store.record_retention().unwrap(), RecordRetention::None);
        store.update(id, point(1, 2.0)).unwrap();
        assert!(store.record(id).is_err());
        store.delete_with(id, point(1, 2.0)).unwrap();
        assert_eq!(
            Store::new("d").record_retention().unwrap(),
            RecordRetention::Latest(DEFAULT_RETAINED_RECORDS)
        );
    }

    /// Attaches once, at registration, and fails every later attach.
    #[derive(Default)]
    struct Unattachable {
        attached: bool,
    }

    impl Aggregate for Unattachable {
        fn kind(&self) -> &str {
            "unattachable"
        }

        fn capabilities(&self) -> rill_aggregates::Capabilities {
            rill_aggregates::Capabilities::NONE
        }

        fn attach(&mut self, inputs: &[&dyn Aggregate]) -> rill_aggregates::AggregateResult<()> {
            if self.attached && !inputs.is_empty() {
                return Err(AggregateError::Custom("cannot re-attach".into()));
            }
            self.attached = true;
            Ok(())
        }

        fn snapshot(&self, _limit: Option<usize>) -> serde_json::Value {
            serde_json::Value::Null
        }

        fn save_state(&self) -> rill_aggregates::AggregateResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn load_state(&mut self, _bytes: &[u8]) -> rill_aggregates::AggregateResult<()> {
            Ok(())
        }

        fn reset(&mut self) {}
    }

    struct UnattachableFactory;

    impl crate::AggregateFactory for UnattachableFactory {
        fn kind(&self) -> &str {
            "unattachable"
        }

        fn build(
            &self,
            _descriptor: &AggregateDescriptor,
        ) -> rill_aggregates::AggregateResult<Box<dyn Aggregate>> {
            Ok(Box::new(Unattachable::default()))
        }
    }

    #[test]
    fn attach_failures_reach_the_caller() {
        let registry = Arc::new(FactoryRegistry::with_builtins());
        registry.register(Arc::new(UnattachableFactory));
        let store = Store::with_registry("s", registry);
        store.register(window("win")).unwrap();
        store
            .register(AggregateDescriptor::new("stuck", "unattachable").with_input("win"))
            .unwrap();
        store.push(point(1, 1.0)).unwrap();

        let err = store.reset_aggregates().unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { ref aggregate, .. } if aggregate == "stuck"));
        let err = store.register(window("win").with_window_span(50)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { ref aggregate, .. } if aggregate == "stuck"));
        assert_eq!(store.descriptor("win").unwrap().window_span, Some(50));
    }

    #[test]
    fn unregister_refuses_aggregates_in_use() {
        let store = Store::new("s");
        store.register(window("win")).unwrap();
        store
            .register(AggregateDescriptor::new("avg", "ma").with_input("win"))
            .unwrap();
        let err = store.unregister("win").unwrap_err();
        assert!(matches!(err, EngineError::AggregateInUse { ref dependents, .. } if dependents == &["avg"]));

        store.unregister("avg").unwrap();
        store.unregister("win").unwrap();
        assert!(store.aggregate_names().unwrap().is_empty());
        assert!(matches!(store.unregister("win"), Err(EngineError::UnknownAggregate(_))));
    }

    #[test]
    fn redefining_a_window_resynchronises_its_consumers() {
        let store = Store::new("s");
        store.register(window("win")).unwrap();
        let avg = store
            .register(AggregateDescriptor::new("avg", "ma").with_input("win"))
            .unwrap();
        store.push(point(0, 4.0)).unwrap();
        assert_eq!(avg.current_value().unwrap(), Some(4.0));

        store.register(window("win").with_window_span(5)).unwrap();
        assert_eq!(avg.current_value().unwrap(), None);
        store.push(point(10, 6.0)).unwrap();
        store.push(point(20, 8.0)).unwrap();
        assert_eq!(avg.current_value().unwrap(), Some(8.0));
    }

    #[test]
    fn redefinition_must_stay_compatible_with_consumers() {
        let store = Store::new("s");
        store.register(window("win")).unwrap();
        store
            .register(AggregateDescriptor::new("avg", "ma").with_input("win"))
            .unwrap();
        let err = store
            .register(
                AggregateDescriptor::new("win", "timeSeriesTick")
                    .with_timestamp_field("t")
                    .with_value_field("v"),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { ref aggregate, .. } if aggregate == "avg"));
        assert_eq!(store.descriptor("win").unwrap().kind, "timeSeriesWinBuf");
    }

    #[test]
    fn time_advancement_evicts_without_records() {
        let store = Store::new("s");
        store.register(window("win")).unwrap();
        let sum = store
            .register(AggregateDescriptor::new("sum", "winBufSum").with_input("win"))
            .unwrap();
        store.push(point(0, 3.0)).unwrap();
        store.push(point(50, 4.0)).unwrap();
        assert_eq!(sum.current_value().unwrap(), Some(7.0));

        let report = store.advance_time(Timestamp::from_millis(120)).unwrap();
        assert!(report.is_clean());
        assert_eq!(sum.current_value().unwrap(), Some(4.0));
        assert_eq!(sum.current_timestamp().unwrap(), Some(Timestamp::from_millis(120)));

        let report = store.advance_time(Timestamp::from_millis(60)).unwrap();
        assert!(matches!(
            report.failure("win"),
            Some(AggregateError::OutOfOrderTimestamp { .. })
        ));
        assert_eq!(report.skipped, vec!["sum".to_string()]);
    }

    #[test]
    fn reset_returns_to_fresh_state() {
        let store = Store::new("s");
        store.register(window("win")).unwrap();
        let avg = store
            .register(AggregateDescriptor::new("avg", "ma").with_input("win"))
            .unwrap();
        store.push(point(0, 4.0)).unwrap();
        store.reset_aggregates().unwrap();
        assert_eq!(avg.current_value().unwrap(), None);
        store.push(point(1, 2.0)).unwrap();
        assert_eq!(avg.current_value().unwrap(), Some(2.0));
    }
}
