//! Registered programmatic views: a named, pre-materialized alias for a
//! base table plus an optional Rust closure residual filter, distinct
//! from a SQL `CREATE VIEW` (which the planner inlines straight from
//! `schema.views`). Registering or deregistering one bumps a generation
//! counter the planner's plan cache checks alongside the schema cookie,
//! so a cached plan build against an old view definition is never reused.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::OwnedValue;

pub type ViewPredicate = Arc<dyn Fn(&[OwnedValue]) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredView {
    pub base_table: String,
    pub filter: Option<ViewPredicate>,
}

#[derive(Default)]
pub struct ViewRegistry {
    generation: u64,
    views: HashMap<String, RegisteredView>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, base_table: impl Into<String>, filter: Option<ViewPredicate>) {
        self.views.insert(
            name.into(),
            RegisteredView {
                base_table: base_table.into(),
                filter,
            },
        );
        self.generation += 1;
    }

    pub fn deregister(&mut self, name: &str) -> bool {
        let removed = self.views.remove(name).is_some();
        if removed {
            self.generation += 1;
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredView> {
        self.views.get(name)
    }

    /// Monotonically increases on every `register`/`deregister`; the
    /// planner folds this into its cache key so a plan built against a
    /// stale view definition is never served from cache.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_a_view_bumps_the_generation() {
        let mut registry = ViewRegistry::new();
        let before = registry.generation();
        registry.register("active_users", "users", None);
        assert!(registry.generation() > before);
        assert_eq!(registry.get("active_users").unwrap().base_table, "users");
    }

    #[test]
    fn filter_closure_is_invoked_against_owned_columns() {
        let mut registry = ViewRegistry::new();
        registry.register(
            "adults",
            "users",
            Some(Arc::new(|cols: &[OwnedValue]| cols[0].as_i64().unwrap_or(0) >= 18)),
        );
        let view = registry.get("adults").unwrap();
        let predicate = view.filter.as_ref().unwrap();
        assert!(predicate(&[OwnedValue::Integer(21)]));
        assert!(!predicate(&[OwnedValue::Integer(10)]));
    }
}
