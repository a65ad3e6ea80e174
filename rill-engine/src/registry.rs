//! Aggregate factories resolved by type tag.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rill_aggregates::aggregates::{
    Ema, Extremum, MovingAverage, PairStatistic, Threshold, TimeSeriesTick, TimeSeriesWindow,
    WindowCovariance, WindowExtremum, WindowSum, WindowVariance,
};
use rill_aggregates::{Aggregate, AggregateResult, Custom, CustomAggregate};
use rill_core::AggregateDescriptor;

use crate::{EngineError, EngineResult};

/// Factory contract used to construct aggregates from descriptors.
pub trait AggregateFactory: Send + Sync {
    /// Canonical type tag (e.g. `"timeSeriesWinBuf"`).
    fn kind(&self) -> &str;

    /// Additional tags that resolve to the same factory.
    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    /// Builds a fresh aggregate configured by `descriptor`.
    fn build(&self, descriptor: &AggregateDescriptor) -> AggregateResult<Box<dyn Aggregate>>;
}

type BuildFn = fn(&AggregateDescriptor) -> AggregateResult<Box<dyn Aggregate>>;

struct BuiltinFactory {
    kind: &'static str,
    aliases: &'static [&'static str],
    build: BuildFn,
}

impl AggregateFactory for BuiltinFactory {
    fn kind(&self) -> &str {
        self.kind
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn build(&self, descriptor: &AggregateDescriptor) -> AggregateResult<Box<dyn Aggregate>> {
        (self.build)(descriptor)
    }
}

type CustomBuildFn =
    dyn Fn(&AggregateDescriptor) -> AggregateResult<Box<dyn Aggregate>> + Send + Sync;

struct CustomFactory {
    kind: String,
    build: Box<CustomBuildFn>,
}

impl AggregateFactory for CustomFactory {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn build(&self, descriptor: &AggregateDescriptor) -> AggregateResult<Box<dyn Aggregate>> {
        (self.build)(descriptor)
    }
}

fn builtins() -> Vec<BuiltinFactory> {
    vec![
        BuiltinFactory {
            kind: TimeSeriesTick::KIND,
            aliases: &["tick"],
            build: |d| Ok(Box::new(TimeSeriesTick::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: TimeSeriesWindow::KIND,
            aliases: &["winBuf", "window"],
            build: |d| Ok(Box::new(TimeSeriesWindow::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: MovingAverage::KIND,
            aliases: &["movingAverage"],
            build: |d| Ok(Box::new(MovingAverage::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: WindowSum::KIND,
            aliases: &[],
            build: |d| Ok(Box::new(WindowSum::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: WindowExtremum::MIN_KIND,
            aliases: &[],
            build: |_| Ok(Box::new(WindowExtremum::new(Extremum::Min))),
        },
        BuiltinFactory {
            kind: WindowExtremum::MAX_KIND,
            aliases: &[],
            build: |_| Ok(Box::new(WindowExtremum::new(Extremum::Max))),
        },
        BuiltinFactory {
            kind: WindowVariance::KIND,
            aliases: &[],
            build: |d| Ok(Box::new(WindowVariance::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: WindowCovariance::COVARIANCE_KIND,
            aliases: &["cov"],
            build: |d| {
                Ok(Box::new(WindowCovariance::from_descriptor(
                    PairStatistic::Covariance,
                    d,
                )?))
            },
        },
        BuiltinFactory {
            kind: WindowCovariance::CORRELATION_KIND,
            aliases: &["corr"],
            build: |d| {
                Ok(Box::new(WindowCovariance::from_descriptor(
                    PairStatistic::Correlation,
                    d,
                )?))
            },
        },
        BuiltinFactory {
            kind: Ema::KIND,
            aliases: &[],
            build: |d| Ok(Box::new(Ema::from_descriptor(d)?)),
        },
        BuiltinFactory {
            kind: Threshold::KIND,
            aliases: &[],
            build: |d| Ok(Box::new(Threshold::from_descriptor(d)?)),
        },
    ]
}

/// Thread-safe registry mapping type tags to factories.
///
/// Lookups are case-insensitive. Registering a tag that already exists
/// replaces the previous factory.
pub struct FactoryRegistry {
    by_kind: RwLock<HashMap<String, Arc<dyn AggregateFactory>>>,
}

impl FactoryRegistry {
    /// Creates a registry without any factories.
    pub fn empty() -> Self {
        Self {
            by_kind: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry holding every built-in aggregate type.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        for factory in builtins() {
            registry.register(Arc::new(factory));
        }
        registry
    }

    /// Adds a factory under its kind and aliases.
    pub fn register(&self, factory: Arc<dyn AggregateFactory>) {
        let mut by_kind = self.by_kind.write();
        let kind = factory.kind().to_string();
        if by_kind
            .insert(normalize_kind(&kind), factory.clone())
            .is_some()
        {
            tracing::warn!(
                kind = %kind,
                "duplicate aggregate type registration; overriding previous factory"
            );
        }
        for alias in factory.aliases() {
            let normalized = normalize_kind(alias);
            if let Some(existing) = by_kind.get(&normalized) {
                if !Arc::ptr_eq(existing, &factory) {
                    tracing::warn!(
                        alias = *alias,
                        kind = %kind,
                        "alias already registered for another type; overriding"
                    );
                }
            }
            by_kind.insert(normalized, factory.clone());
        }
    }

    /// Registers a [`CustomAggregate`] type built by `build`.
    pub fn register_custom<T, F>(&self, kind: impl Into<String>, build: F)
    where
        T: CustomAggregate + 'static,
        F: Fn(&AggregateDescriptor) -> AggregateResult<T> + Send + Sync + 'static,
    {
        let kind = kind.into();
        let tag = kind.clone();
        self.register(Arc::new(CustomFactory {
            kind,
            build: Box::new(move |descriptor: &AggregateDescriptor| {
                let inner = build(descriptor)?;
                Ok(Box::new(Custom::new(tag.clone(), inner)) as Box<dyn Aggregate>)
            }),
        }));
    }

    /// Whether `kind` resolves to a factory.
    pub fn contains(&self, kind: &str) -> bool {
        self.by_kind.read().contains_key(&normalize_kind(kind))
    }

    /// Canonical tags of every registered type, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let by_kind = self.by_kind.read();
        let mut kinds: Vec<String> = by_kind
            .values()
            .map(|factory| factory.kind().to_string())
            .collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }

    /// Builds the aggregate a descriptor asks for.
    pub fn build(&self, descriptor: &AggregateDescriptor) -> EngineResult<Box<dyn Aggregate>> {
        let factory = self
            .by_kind
            .read()
            .get(&normalize_kind(&descriptor.kind))
            .cloned()
            .ok_or_else(|| EngineError::UnknownAggregateType(descriptor.kind.clone()))?;
        factory
            .build(descriptor)
            .map_err(|err| EngineError::invalid_configuration(&descriptor.name, err))
    }
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn normalize_kind(kind: &str) -> String {
    kind.trim().to_ascii_lowercase()
}
