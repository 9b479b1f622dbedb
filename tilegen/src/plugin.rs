//! Name to constructor tables for everything the config references by name.
//!
//! The embedding host fills these before a config is resolved; nothing is
//! looked up dynamically at request time.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::{Cache, CacheError};
use crate::layer::{QueryFn, SortFn, TransformFn};

/// Builds an external cache from its config `kwargs`.
pub type CacheCtor = Arc<dyn Fn(&Value) -> Result<Box<dyn Cache>, CacheError> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Registry {
    transforms: HashMap<String, TransformFn>,
    sorts: HashMap<String, SortFn>,
    queries: HashMap<String, QueryFn>,
    caches: HashMap<String, CacheCtor>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_transform(&mut self, name: impl Into<String>, f: TransformFn) {
        self.transforms.insert(name.into(), f);
    }

    pub fn register_sort(&mut self, name: impl Into<String>, f: SortFn) {
        self.sorts.insert(name.into(), f);
    }

    pub fn register_query(&mut self, name: impl Into<String>, f: QueryFn) {
        self.queries.insert(name.into(), f);
    }

    pub fn register_cache(&mut self, name: impl Into<String>, ctor: CacheCtor) {
        self.caches.insert(name.into(), ctor);
    }

    #[must_use]
    pub fn transform(&self, name: &str) -> Option<TransformFn> {
        self.transforms.get(name).cloned()
    }

    #[must_use]
    pub fn sort(&self, name: &str) -> Option<SortFn> {
        self.sorts.get(name).cloned()
    }

    #[must_use]
    pub fn query(&self, name: &str) -> Option<QueryFn> {
        self.queries.get(name).cloned()
    }

    #[must_use]
    pub fn cache(&self, name: &str) -> Option<CacheCtor> {
        self.caches.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_by_exact_name() {
        let mut registry = Registry::new();
        registry.register_query("by_zoom", Arc::new(|zoom| Some(format!("SELECT {zoom}"))));

        assert!(registry.query("by_zoom").is_some());
        assert!(registry.query("By_Zoom").is_none());
        assert!(registry.transform("by_zoom").is_none());
    }
}
