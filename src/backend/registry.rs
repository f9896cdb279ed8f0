//! Global runtime creator registry
//!
//! Op dispatch lives outside this crate; what the allocator needs is only a
//! way for embedders to register a runtime factory under a name and for the
//! session layer to instantiate it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;

use super::{BackendError, BackendResult, Runtime, RuntimeCreator};

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<dyn RuntimeCreator>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register a runtime creator under `name`. Returns false when a creator was
/// already registered under that name (the existing one wins).
pub fn register_runtime(name: &str, creator: Arc<dyn RuntimeCreator>) -> bool {
    let mut registry = match REGISTRY.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if registry.contains_key(name) {
        tracing::debug!("runtime '{}' already registered", name);
        return false;
    }
    registry.insert(name.to_string(), creator);
    true
}

/// Instantiate the runtime registered under `name`.
pub fn create_runtime(name: &str) -> BackendResult<Box<dyn Runtime>> {
    let registry = match REGISTRY.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    registry
        .get(name)
        .map(|creator| creator.on_create())
        .ok_or_else(|| BackendError::RuntimeNotFound(name.to_string()))
}
