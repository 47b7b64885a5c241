//! Process-wide registries, keyed by logical database name.
//!
//! These are conveniences over explicitly constructed [`ModelRegistry`]
//! instances; tests that need isolation call [`clear_registries`] or build
//! their own registry.

use super::registry::{ModelRegistry, RegistryConfig};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

static REGISTRIES: Mutex<BTreeMap<String, Arc<ModelRegistry>>> =
    parking_lot::const_mutex(BTreeMap::new());

/// Get the registry for `name`, creating it with the default configuration.
pub fn registry(name: &str) -> Arc<ModelRegistry> {
    registry_with_config(name, RegistryConfig::default)
}

/// Get the registry for `name`, creating it with `config` if absent.
///
/// The configuration of an existing registry is left untouched.
pub fn registry_with_config(
    name: &str,
    config: impl FnOnce() -> RegistryConfig,
) -> Arc<ModelRegistry> {
    let mut registries = REGISTRIES.lock();
    Arc::clone(registries.entry(name.to_string()).or_insert_with(|| {
        tracing::debug!(registry = %name, "created process registry");
        Arc::new(ModelRegistry::with_config(name, config()))
    }))
}

/// Names of the process registries.
pub fn registry_names() -> Vec<String> {
    REGISTRIES.lock().keys().cloned().collect()
}

/// Drop every process registry.
///
/// Holders of an `Arc` keep their registry alive; later lookups get a
/// fresh one.
pub fn clear_registries() {
    let mut registries = REGISTRIES.lock();
    tracing::debug!(count = registries.len(), "clearing process registries");
    registries.clear();
}
