//! Named function registry
//!
//! Tables never store closures directly. Derived attributes, filters and
//! aggregate reducers are registered here under a name, and tables only keep
//! that name, which is what gets persisted. After a reload the host has to
//! register the same names again before the functions take effect.

use crate::item::WrappedItem;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Computes a derived attribute from a finished-in-progress item
pub type DeriveFn = Arc<dyn Fn(&WrappedItem) -> Value + Send + Sync>;
/// Keeps or drops an item based on one attribute value (`None` when missing)
pub type AttributeFilterFn = Arc<dyn Fn(Option<&Value>) -> bool + Send + Sync>;
/// Keeps or drops an item based on its index
pub type IndexFilterFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;
/// Folds one more parent row into an aggregate row: `(aggregate, parent)`
pub type ReduceFn = Arc<dyn Fn(&WrappedItem, &WrappedItem) -> Value + Send + Sync>;

#[derive(Default)]
struct Functions {
    derive: HashMap<String, DeriveFn>,
    attribute_filters: HashMap<String, AttributeFilterFn>,
    index_filters: HashMap<String, IndexFilterFn>,
    reducers: HashMap<String, ReduceFn>,
}

/// Registry of named functions shared by every model of a registry
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    inner: Arc<RwLock<Functions>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Functions> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Functions> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_derive<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&WrappedItem) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering derive function '{}'", name);
        self.write().derive.insert(name, Arc::new(func));
    }

    pub fn register_attribute_filter<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(Option<&Value>) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering attribute filter '{}'", name);
        self.write().attribute_filters.insert(name, Arc::new(func));
    }

    pub fn register_index_filter<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering index filter '{}'", name);
        self.write().index_filters.insert(name, Arc::new(func));
    }

    pub fn register_reducer<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(&WrappedItem, &WrappedItem) -> Value + Send + Sync + 'static,
    {
        let name = name.into();
        debug!("Registering reducer '{}'", name);
        self.write().reducers.insert(name, Arc::new(func));
    }

    pub fn derive(&self, name: &str) -> Option<DeriveFn> {
        self.read().derive.get(name).cloned()
    }

    pub fn attribute_filter(&self, name: &str) -> Option<AttributeFilterFn> {
        self.read().attribute_filters.get(name).cloned()
    }

    pub fn index_filter(&self, name: &str) -> Option<IndexFilterFn> {
        self.read().index_filters.get(name).cloned()
    }

    pub fn reducer(&self, name: &str) -> Option<ReduceFn> {
        self.read().reducers.get(name).cloned()
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let functions = self.read();
        f.debug_struct("FunctionRegistry")
            .field("derive", &functions.derive.len())
            .field("attribute_filters", &functions.attribute_filters.len())
            .field("index_filters", &functions.index_filters.len())
            .field("reducers", &functions.reducers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_and_lookup() {
        let registry = FunctionRegistry::new();
        registry.register_attribute_filter("positive", |v| {
            v.and_then(Value::as_f64).is_some_and(|n| n > 0.0)
        });
        registry.register_index_filter("even", |index| {
            index.parse::<usize>().is_ok_and(|i| i % 2 == 0)
        });

        let positive = registry.attribute_filter("positive").unwrap();
        assert!(positive(Some(&json!(3))));
        assert!(!positive(Some(&json!(-3))));
        assert!(!positive(None));

        let even = registry.index_filter("even").unwrap();
        assert!(even("2"));
        assert!(!even("3"));

        assert!(registry.derive("positive").is_none());
        assert!(registry.reducer("missing").is_none());
    }

    #[test]
    fn test_clones_share_functions() {
        let registry = FunctionRegistry::new();
        let clone = registry.clone();
        clone.register_derive("one", |_| json!(1));
        assert!(registry.derive("one").is_some());
    }
}
