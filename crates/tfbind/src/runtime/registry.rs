//! Registry for selecting runtimes by name.
//!
//! Runtime crates register a constructor under one or more names; callers
//! create instances by name or through the `TFBIND_RUNTIME` default.

use super::Runtime;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Factory function that creates a new runtime instance.
pub type RuntimeConstructor = Box<dyn Fn() -> Arc<dyn Runtime> + Send + Sync>;

struct RuntimeRegistry {
    runtimes: RwLock<HashMap<String, RuntimeConstructor>>,
}

impl RuntimeRegistry {
    fn new() -> Self {
        Self {
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: String, constructor: RuntimeConstructor) {
        self.runtimes
            .write()
            .expect("runtime registry poisoned")
            .insert(name, constructor);
    }

    fn create(&self, name: &str) -> Option<Arc<dyn Runtime>> {
        let registry = self.runtimes.read().expect("runtime registry poisoned");
        let constructor = registry.get(name)?;
        Some(constructor())
    }

    fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .runtimes
            .read()
            .expect("runtime registry poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

static GLOBAL_REGISTRY: OnceLock<RuntimeRegistry> = OnceLock::new();

fn global_registry() -> &'static RuntimeRegistry {
    GLOBAL_REGISTRY.get_or_init(RuntimeRegistry::new)
}

/// Register a runtime by name. Registering a name twice replaces the constructor.
///
/// # Example
/// ```ignore
/// tfbind::runtime::registry::register_runtime("my_runtime", || {
///     std::sync::Arc::new(MyRuntime::new())
/// });
/// ```
pub fn register_runtime<F>(name: impl Into<String>, constructor: F)
where
    F: Fn() -> Arc<dyn Runtime> + Send + Sync + 'static,
{
    global_registry().register(name.into(), Box::new(constructor));
}

/// Create a runtime instance by name, or `None` if nothing is registered under it.
pub fn create_runtime(name: &str) -> Option<Arc<dyn Runtime>> {
    global_registry().create(name)
}

/// Registered runtime names, sorted.
pub fn list_runtimes() -> Vec<String> {
    global_registry().list()
}

pub fn has_runtime(name: &str) -> bool {
    global_registry()
        .runtimes
        .read()
        .expect("runtime registry poisoned")
        .contains_key(name)
}

/// Creates the runtime named by `TFBIND_RUNTIME` (default `"ref"`).
pub fn default_runtime() -> Result<Arc<dyn Runtime>> {
    let name = crate::env::default_runtime_name();
    create_runtime(name).ok_or_else(|| Error::UnknownRuntime {
        name: name.to_string(),
        available: list_runtimes(),
    })
}
