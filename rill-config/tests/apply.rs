use anyhow::Result;
use rill_config::RillConfig;
use rill_core::Record;
use rill_engine::{Engine, EngineError};
use tempfile::tempdir;

fn config(state_dir: &std::path::Path, save_on_close: bool) -> Result<RillConfig> {
    RillConfig::from_toml_str(&format!(
        r#"
[persistence]
state_dir = "{dir}"
save_on_close = {save_on_close}

[[stores]]
name = "trades"
aggregates = [
  {{ name = "win", type = "timeSeriesWinBuf", timestamp_field = "time", value_field = "price", window_span = 10000 }},
  {{ name = "avg", type = "ma", input = "win" }},
]

[[stores]]
name = "quotes"
aggregates = [
  {{ name = "tick", type = "tick", timestamp_field = "time", value_field = "bid" }},
  {{ name = "ema", type = "ema", input = "tick", interval = 1000 }},
]
"#,
        dir = state_dir.display().to_string().replace('\\', "/"),
    ))
}

#[test]
fn apply_registers_declared_aggregates() -> Result<()> {
    let dir = tempdir()?;
    let config = config(dir.path(), true)?;
    let engine = Engine::new();
    config.apply(&engine)?;

    assert_eq!(engine.store_names(), vec!["quotes", "trades"]);
    let trades = engine.store("trades")?;
    assert_eq!(trades.aggregate_names()?, vec!["win", "avg"]);
    let avg = trades.handle("avg")?;
    trades.push(Record::new().with("time", 0_i64).with("price", 10.0))?;
    trades.push(Record::new().with("time", 500_i64).with("price", 20.0))?;
    assert_eq!(avg.current_value()?, Some(15.0));

    let err = config.apply(&engine).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::DuplicateStore(_))
    ));
    Ok(())
}

#[test]
fn broken_declarations_name_the_aggregate() -> Result<()> {
    let config = RillConfig::from_toml_str(
        r#"
[[stores]]
name = "broken"
aggregates = [{ name = "avg", type = "ma", input = "missing" }]
"#,
    )?;
    let err = config.apply(&Engine::new()).unwrap_err();
    assert!(err.to_string().contains("'avg'"));
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::UnknownInputAggregate { .. })
    ));
    Ok(())
}

#[test]
fn shutdown_and_restore_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let state_dir = dir.path().join("state");
    let config = config(&state_dir, true)?;

    let engine = Engine::new();
    config.apply(&engine)?;
    let quotes = engine.store("quotes")?;
    quotes.push(Record::new().with("time", 0_i64).with("bid", 10.0))?;
    quotes.push(Record::new().with("time", 1_000_i64).with("bid", 20.0))?;
    let expected = quotes.handle("ema")?.current_value()?;
    config.shutdown(&engine)?;
    assert!(engine.store_names().is_empty());
    assert!(state_dir.join("quotes.state").exists());

    let engine = Engine::new();
    config.apply(&engine)?;
    assert_eq!(config.restore(&engine)?, vec!["trades", "quotes"]);
    assert_eq!(
        engine.store("quotes")?.handle("ema")?.current_value()?,
        expected
    );
    Ok(())
}

#[test]
fn shutdown_without_saving_leaves_no_files() -> Result<()> {
    let dir = tempdir()?;
    let config = config(dir.path(), false)?;
    let engine = Engine::new();
    config.apply(&engine)?;
    config.shutdown(&engine)?;
    assert!(config.state_path("trades").is_some_and(|path| !path.exists()));

    let engine = Engine::new();
    config.apply(&engine)?;
    assert!(config.restore(&engine)?.is_empty());
    Ok(())
}

#[test]
fn declares_multi_input_aggregates_and_retention() -> Result<()> {
    let config = RillConfig::from_toml_str(
        r#"
[[stores]]
name = "pairs"
retain_records = 2
aggregates = [
  { name = "wx", type = "timeSeriesWinBuf", timestamp_field = "time", value_field = "x", window_span = 10000 },
  { name = "wy", type = "timeSeriesWinBuf", timestamp_field = "time", value_field = "y", window_span = 10000 },
  { name = "cov", type = "covariance", inputs = ["wx", "wy"] },
]
"#,
    )?;
    let engine = Engine::new();
    config.apply(&engine)?;
    let pairs = engine.store("pairs")?;
    for (t, x, y) in [(0_i64, 1.0, 2.0), (10, 2.0, 4.0), (20, 3.0, 6.0)] {
        pairs.push(Record::new().with("time", t).with("x", x).with("y", y))?;
    }
    assert_eq!(pairs.handle("cov")?.current_value()?, Some(2.0));
    assert_eq!(pairs.record_count()?, 2);
    Ok(())
}
