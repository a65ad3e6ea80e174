use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::registry::FactoryRegistry;
use crate::store::{RecordRetention, Store};
use crate::{EngineError, EngineResult};

/// A set of independent stores sharing one factory registry.
///
/// Stores share no mutable state, so different stores can be driven from
/// different threads concurrently.
pub struct Engine {
    registry: Arc<FactoryRegistry>,
    stores: RwLock<HashMap<String, Arc<Store>>>,
}

impl Engine {
    /// Creates an engine resolving the built-in aggregate types.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(FactoryRegistry::with_builtins()))
    }

    /// Creates an engine resolving aggregate types through `registry`.
    pub fn with_registry(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Factory registry shared by every store; custom types registered here
    /// become available to all stores.
    pub fn registry(&self) -> &Arc<FactoryRegistry> {
        &self.registry
    }

    /// Opens a new, empty store with the default record retention.
    pub fn open_store(&self, name: &str) -> EngineResult<Arc<Store>> {
        self.open_store_with(name, RecordRetention::default())
    }

    /// Opens a new, empty store keeping pushed records as `retention` says.
    pub fn open_store_with(
        &self,
        name: &str,
        retention: RecordRetention,
    ) -> EngineResult<Arc<Store>> {
        let mut stores = self.stores.write();
        if stores.contains_key(name) {
            return Err(EngineError::DuplicateStore(name.to_string()));
        }
        let store = Store::with_retention(name, Arc::clone(&self.registry), retention);
        stores.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// An open store.
    pub fn store(&self, name: &str) -> EngineResult<Arc<Store>> {
        self.stores
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStore(name.to_string()))
    }

    /// Names of the open stores, sorted.
    pub fn store_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Closes a store, persisting its state to `path` first when given, and
    /// forgets it. If persisting fails the store stays open and registered.
    pub fn close_store(&self, name: &str, path: Option<&Path>) -> EngineResult<()> {
        let store = self.store(name)?;
        store.close(path)?;
        self.stores.write().remove(name);
        Ok(())
    }

    /// Closes every store, persisting each one to `path_for(name)` when it
    /// returns a path. Stops at the first failure.
    pub fn shutdown<F>(&self, path_for: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<std::path::PathBuf>,
    {
        for name in self.store_names() {
            let path = path_for(&name);
            self.close_store(&name, path.as_deref())?;
        }
        info!("engine shut down");
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
