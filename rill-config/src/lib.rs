//! Configuration loading and typed settings for Rill deployments.

pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use rill_core::AggregateDescriptor;
use rill_engine::{Engine, RecordRetention};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Prefix of environment variables overriding file settings
/// (e.g. `RILL__LOG__LEVEL=debug`).
pub const ENV_PREFIX: &str = "RILL";

const ENV_SEPARATOR: &str = "__";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RillConfig {
    pub log: LogSettings,
    pub persistence: PersistenceSettings,
    pub stores: Vec<StoreConfig>,
}

/// `[log]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Emit JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

/// `[persistence]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// Directory holding one `<store>.state` file per store.
    pub state_dir: Option<PathBuf>,
    /// Persist every store when shutting down.
    pub save_on_close: bool,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            state_dir: None,
            save_on_close: true,
        }
    }
}

/// One `[[stores]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub name: String,
    /// Number of recent records kept for update/delete by id. `0` keeps
    /// none; absent uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retain_records: Option<usize>,
    /// Registered in declaration order, so inputs must come first.
    #[serde(default)]
    pub aggregates: Vec<AggregateDescriptor>,
}

/// Loads configuration from an optional TOML file, then applies
/// `RILL__`-prefixed environment overrides.
pub fn load(path: Option<&Path>) -> Result<RillConfig> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );
    let settings = builder.build().with_context(|| match path {
        Some(path) => format!("failed to read configuration from {}", path.display()),
        None => "failed to read configuration from the environment".to_string(),
    })?;
    settings
        .try_deserialize()
        .context("configuration does not match the expected schema")
}

impl StoreConfig {
    /// Record retention the store is opened with.
    pub fn retention(&self) -> RecordRetention {
        match self.retain_records {
            None => RecordRetention::default(),
            Some(0) => RecordRetention::None,
            Some(limit) => RecordRetention::Latest(limit),
        }
    }
}

impl RillConfig {
    /// Parses a TOML document without consulting the environment.
    pub fn from_toml_str(document: &str) -> Result<Self> {
        toml::from_str(document).context("failed to parse TOML configuration")
    }

    /// Renders the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration as TOML")
    }

    /// Opens every declared store on `engine` and registers its aggregates.
    pub fn apply(&self, engine: &Engine) -> Result<()> {
        for declared in &self.stores {
            let store = engine
                .open_store_with(&declared.name, declared.retention())
                .with_context(|| format!("failed to open store '{}'", declared.name))?;
            for descriptor in &declared.aggregates {
                store.register(descriptor.clone()).with_context(|| {
                    format!(
                        "failed to register aggregate '{}' in store '{}'",
                        descriptor.name, declared.name
                    )
                })?;
            }
            info!(
                store = %declared.name,
                aggregates = declared.aggregates.len(),
                "store configured"
            );
        }
        Ok(())
    }

    /// Loads persisted state into every declared store that has a state file.
    /// Returns the names of the restored stores.
    pub fn restore(&self, engine: &Engine) -> Result<Vec<String>> {
        let mut restored = Vec::new();
        for declared in &self.stores {
            let Some(path) = self.state_path(&declared.name).filter(|path| path.exists()) else {
                continue;
            };
            engine
                .store(&declared.name)?
                .load_from_path(&path)
                .with_context(|| {
                    format!(
                        "failed to restore store '{}' from {}",
                        declared.name,
                        path.display()
                    )
                })?;
            restored.push(declared.name.clone());
        }
        Ok(restored)
    }

    /// Closes every store on `engine`, persisting them when `save_on_close`
    /// is set and a state directory is configured.
    pub fn shutdown(&self, engine: &Engine) -> Result<()> {
        if let (true, Some(dir)) = (
            self.persistence.save_on_close,
            self.persistence.state_dir.as_deref(),
        ) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create state directory {}", dir.display()))?;
        }
        engine
            .shutdown(|store| {
                self.persistence
                    .save_on_close
                    .then(|| self.state_path(store))
                    .flatten()
            })
            .context("failed to shut down engine")
    }

    /// `<state_dir>/<store>.state`, when a state directory is configured.
    pub fn state_path(&self, store: &str) -> Option<PathBuf> {
        self.persistence
            .state_dir
            .as_ref()
            .map(|dir| dir.join(format!("{store}.state")))
    }
}
