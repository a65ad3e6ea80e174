use std::fs;
use std::sync::Arc;

use anyhow::Result;
use rill_aggregates::{AggregateResult, CustomAggregate, UpdateContext};
use rill_core::{AggregateDescriptor, DecayMode, Record};
use rill_engine::{Engine, EngineError, PersistenceError, Store};
use serde_json::{json, Value};
use tempfile::tempdir;

fn point(t: i64, v: f64) -> Record {
    Record::new().with("time", t).with("value", v)
}

fn pipeline() -> Vec<AggregateDescriptor> {
    vec![
        AggregateDescriptor::new("win", "timeSeriesWinBuf")
            .with_timestamp_field("time")
            .with_value_field("value")
            .with_window_span(2_500),
        AggregateDescriptor::new("ma", "ma").with_input("win"),
        AggregateDescriptor::new("sum", "winBufSum").with_input("win"),
        AggregateDescriptor::new("min", "winBufMin").with_input("win"),
        AggregateDescriptor::new("max", "winBufMax").with_input("win"),
        AggregateDescriptor::new("var", "variance").with_input("win"),
        AggregateDescriptor::new("tick", "timeSeriesTick")
            .with_timestamp_field("time")
            .with_value_field("value"),
        AggregateDescriptor::new("ema", "ema")
            .with_input("tick")
            .with_interval(1_500.0)
            .with_decay_mode(DecayMode::Linear),
        AggregateDescriptor::new("alarm", "threshold")
            .with_input("ema")
            .with_threshold(40.0),
    ]
}

fn build(name: &str, descriptors: Vec<AggregateDescriptor>) -> Result<Arc<Store>> {
    let store = Store::new(name);
    for descriptor in descriptors {
        store.register(descriptor)?;
    }
    Ok(store)
}

fn outputs(store: &Arc<Store>) -> Result<Vec<(String, Option<f64>, Option<i64>)>> {
    let mut outputs = Vec::new();
    for name in store.aggregate_names()? {
        let handle = store.handle(&name)?;
        outputs.push((
            name,
            handle.current_value()?,
            handle.current_timestamp()?.map(|t| t.as_millis()),
        ));
    }
    Ok(outputs)
}

fn feed(store: &Store, steps: std::ops::Range<i64>) -> Result<()> {
    for step in steps {
        let value = ((step * 31) % 89) as f64 - 10.0;
        store.push(point(step * 170, value))?;
    }
    Ok(())
}

#[test]
fn restored_store_continues_like_the_original() -> Result<()> {
    let original = build("original", pipeline())?;
    feed(&original, 0..60)?;

    let mut bytes = Vec::new();
    original.save_state(&mut bytes)?;
    let restored = build("restored", pipeline())?;
    restored.load_state(bytes.as_slice())?;
    assert_eq!(outputs(&restored)?, outputs(&original)?);

    feed(&original, 60..140)?;
    feed(&restored, 60..140)?;
    assert_eq!(outputs(&restored)?, outputs(&original)?);
    Ok(())
}

#[test]
fn close_persists_to_disk() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("prices.state");

    let original = build("prices", pipeline())?;
    feed(&original, 0..25)?;
    let expected = outputs(&original)?;
    original.close(Some(path.as_path()))?;
    assert!(original.is_closed()?);
    assert!(path.exists());
    assert!(!path.with_extension("state.tmp").exists());
    assert!(matches!(
        original.push(point(0, 1.0)),
        Err(EngineError::StoreClosed(_))
    ));
    original.close(Some(path.as_path()))?;

    let restored = build("prices", pipeline())?;
    restored.load_from_path(&path)?;
    assert_eq!(outputs(&restored)?, expected);
    Ok(())
}

#[test]
fn truncated_file_is_rejected_without_side_effects() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("truncated.state");
    let source = build("source", pipeline())?;
    feed(&source, 0..30)?;
    source.save_to_path(&path)?;

    let bytes = fs::read(&path)?;
    fs::write(&path, &bytes[..bytes.len() / 2])?;

    let target = build("target", pipeline())?;
    feed(&target, 0..5)?;
    let before = outputs(&target)?;
    let err = target.load_from_path(&path).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence(PersistenceError::Truncated)
    ));
    assert_eq!(outputs(&target)?, before);
    Ok(())
}

#[test]
fn mismatched_layouts_are_rejected() -> Result<()> {
    let source = build("source", pipeline())?;
    feed(&source, 0..10)?;
    let mut bytes = Vec::new();
    source.save_state(&mut bytes)?;

    let mut swapped = pipeline();
    swapped[7] = AggregateDescriptor::new("ema", "timeSeriesTick")
        .with_timestamp_field("time")
        .with_value_field("value");
    swapped.truncate(8);
    let target = build("swapped", swapped)?;
    let err = target.load_state(bytes.as_slice()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence(PersistenceError::KindMismatch { ref aggregate, .. })
            if aggregate == "ema"
    ));

    let mut missing = pipeline();
    missing.pop();
    let target = build("missing", missing)?;
    let err = target.load_state(bytes.as_slice()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence(PersistenceError::UnknownAggregate(ref name)) if name == "alarm"
    ));
    Ok(())
}

#[test]
fn failed_restore_rolls_back_every_aggregate() -> Result<()> {
    let source = build("source", pipeline())?;
    feed(&source, 0..40)?;
    let mut bytes = Vec::new();
    source.save_state(&mut bytes)?;

    let mut slower = pipeline();
    slower[7] = AggregateDescriptor::new("ema", "ema")
        .with_input("tick")
        .with_interval(3_000.0)
        .with_decay_mode(DecayMode::Linear);
    let target = build("target", slower)?;
    feed(&target, 0..3)?;
    let before = outputs(&target)?;

    let err = target.load_state(bytes.as_slice()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Persistence(PersistenceError::State { ref aggregate, .. }) if aggregate == "ema"
    ));
    assert_eq!(outputs(&target)?, before);
    Ok(())
}

fn assert_window_stats_match(target: &Arc<Store>, reference: &Arc<Store>) -> Result<()> {
    for name in ["ma", "sum", "min", "max", "var"] {
        let actual = target.handle(name)?.current_value()?;
        let expected = reference.handle(name)?.current_value()?;
        match (actual, expected) {
            (Some(actual), Some(expected)) => assert!(
                (actual - expected).abs() <= 1e-9 * expected.abs().max(1.0),
                "{name}: {actual} != {expected}"
            ),
            _ => assert_eq!(actual, expected, "{name}"),
        }
    }
    Ok(())
}

#[test]
fn aggregates_missing_from_the_file_keep_their_state() -> Result<()> {
    let mut partial = pipeline();
    partial.truncate(2);
    let source = build("source", partial)?;
    feed(&source, 0..20)?;
    let mut bytes = Vec::new();
    source.save_state(&mut bytes)?;
    let reference = build("reference", pipeline())?;
    feed(&reference, 0..20)?;

    let target = build("target", pipeline())?;
    feed(&target, 0..3)?;
    let ema_before = target.handle("ema")?.current_value()?;
    target.load_state(bytes.as_slice())?;

    assert_eq!(
        target.handle("ma")?.current_value()?,
        source.handle("ma")?.current_value()?
    );
    assert_eq!(target.handle("ema")?.current_value()?, ema_before);
    // window consumers left out of the file follow the restored window
    assert_window_stats_match(&target, &reference)?;

    feed(&target, 20..60)?;
    feed(&reference, 20..60)?;
    assert_window_stats_match(&target, &reference)?;
    Ok(())
}

/// Keeps a running count in its own JSON state.
#[derive(Default)]
struct Counter {
    seen: u64,
}

impl CustomAggregate for Counter {
    fn on_add(&mut self, _ctx: &UpdateContext<'_>) -> AggregateResult<()> {
        self.seen += 1;
        Ok(())
    }

    fn get_float(&self) -> Option<f64> {
        Some(self.seen as f64)
    }

    fn save_state(&self, _limit: Option<usize>) -> Value {
        json!({ "seen": self.seen })
    }

    fn load_state(&mut self, state: Value) -> AggregateResult<()> {
        self.seen = state["seen"].as_u64().unwrap_or_default();
        Ok(())
    }

    fn reset(&mut self) {
        self.seen = 0;
    }
}

#[test]
fn custom_state_survives_restart() -> Result<()> {
    let dir = tempdir()?;
    let engine = Engine::new();
    engine
        .registry()
        .register_custom("counter", |_| Ok(Counter::default()));

    let store = engine.open_store("events")?;
    let counter = store.register(AggregateDescriptor::new("count", "counter"))?;
    for step in 0..7 {
        store.push(point(step, 0.0))?;
    }
    assert_eq!(counter.current_value()?, Some(7.0));
    engine.shutdown(|name| Some(dir.path().join(format!("{name}.state"))))?;
    assert!(engine.store_names().is_empty());

    let store = engine.open_store("events")?;
    let counter = store.register(AggregateDescriptor::new("count", "counter"))?;
    assert_eq!(counter.current_value()?, Some(0.0));
    store.load_from_path(dir.path().join("events.state"))?;
    assert_eq!(counter.current_value()?, Some(7.0));
    store.push(point(8, 0.0))?;
    assert_eq!(counter.current_value()?, Some(8.0));
    Ok(())
}
