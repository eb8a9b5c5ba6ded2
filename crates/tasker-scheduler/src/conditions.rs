//! Condition predicates for the conditional strategy.
//!
//! Built-in conditions are pure functions of the local wall clock.
//! Custom predicates are registered under a string key so a persisted
//! `Condition::Named(key)` can be rebuilt after a restart.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{Local, Timelike};
use tasker_core::Condition;

/// A zero-argument predicate. Errors count as "not met".
pub type Predicate = Arc<dyn Fn() -> Result<bool, String> + Send + Sync>;

/// Day is local hour in [6, 20).
pub fn is_day_hour(hour: u32) -> bool {
    (6..20).contains(&hour)
}

/// Named predicate table, cheap to clone and share.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: Arc<RwLock<HashMap<String, Predicate>>>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a predicate under `key`.
    pub fn register<F>(&self, key: &str, predicate: F)
    where
        F: Fn() -> Result<bool, String> + Send + Sync + 'static,
    {
        self.predicates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), Arc::new(predicate));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .predicates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// True if `condition` can be evaluated (built-in or registered).
    pub fn resolves(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Day | Condition::Night => true,
            Condition::Named(key) => self.contains(key),
        }
    }

    /// Evaluate a condition now. Never fails: errors, panics and
    /// unknown keys all mean "not met".
    pub fn evaluate(&self, condition: &Condition) -> bool {
        match condition {
            Condition::Day => is_day_hour(Local::now().hour()),
            Condition::Night => !is_day_hour(Local::now().hour()),
            Condition::Named(key) => {
                let predicate = self
                    .predicates
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(key)
                    .cloned();
                let Some(predicate) = predicate else {
                    tracing::warn!("Unknown condition '{key}', treating as not met");
                    return false;
                };
                match catch_unwind(AssertUnwindSafe(|| predicate())) {
                    Ok(Ok(met)) => met,
                    Ok(Err(e)) => {
                        tracing::debug!("Condition '{key}' errored: {e}");
                        false
                    }
                    Err(_) => {
                        tracing::warn!("Condition '{key}' panicked, treating as not met");
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_hours() {
        assert!(!is_day_hour(5));
        assert!(is_day_hour(6));
        assert!(is_day_hour(19));
        assert!(!is_day_hour(20));
        assert!(!is_day_hour(0));
    }

    #[test]
    fn test_day_and_night_are_complements() {
        let reg = PredicateRegistry::new();
        assert_ne!(reg.evaluate(&Condition::Day), reg.evaluate(&Condition::Night));
    }

    #[test]
    fn test_named_predicates() {
        let reg = PredicateRegistry::new();
        reg.register("always", || Ok(true));
        reg.register("broken", || Err("sensor offline".into()));
        reg.register("panics", || panic!("bug"));

        assert!(reg.evaluate(&Condition::from("always")));
        assert!(!reg.evaluate(&Condition::from("broken")));
        assert!(!reg.evaluate(&Condition::from("panics")));
        assert!(!reg.evaluate(&Condition::from("missing")));

        assert!(reg.resolves(&Condition::from("always")));
        assert!(!reg.resolves(&Condition::from("missing")));
        assert!(reg.resolves(&Condition::Night));
        assert_eq!(reg.keys(), vec!["always", "broken", "panics"]);
    }
}
