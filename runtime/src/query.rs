//! Named, read-only queries over workflow state.
//!
//! A query handler receives a shared reference to the state and returns any
//! `Serialize` value. The runtime answers queries from a read lock, so a query
//! never waits for the racing loop to reach its wait point and never mutates
//! state. Answers are JSON values owned by the caller (a snapshot).

use serde::Serialize;
use std::collections::HashMap;

use crate::error::WorkflowError;

type QueryHandler<S> =
    Box<dyn Fn(&S) -> Result<serde_json::Value, serde_json::Error> + Send + Sync>;

/// Registry of named query handlers for one workflow type
pub struct QueryRegistry<S> {
    handlers: HashMap<String, QueryHandler<S>>,
}

impl<S> QueryRegistry<S> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler under `name`
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::QueryRegistration`] if the name is empty or already taken.
    pub fn register<F, T>(&mut self, name: &str, handler: F) -> Result<(), WorkflowError>
    where
        F: Fn(&S) -> T + Send + Sync + 'static,
        T: Serialize,
    {
        if name.trim().is_empty() {
            return Err(WorkflowError::QueryRegistration {
                name: name.to_string(),
                reason: "query name must not be empty".to_string(),
            });
        }
        if self.handlers.contains_key(name) {
            return Err(WorkflowError::QueryRegistration {
                name: name.to_string(),
                reason: "a handler is already registered under this name".to_string(),
            });
        }

        self.handlers.insert(
            name.to_string(),
            Box::new(move |state| serde_json::to_value(handler(state))),
        );
        tracing::debug!(query = name, "Query handler registered");
        Ok(())
    }

    /// Answer the query `name` against `state`
    ///
    /// # Errors
    ///
    /// - [`WorkflowError::UnknownQuery`] if no handler is registered under `name`
    /// - [`WorkflowError::QueryFailed`] if the handler's answer cannot be serialized
    pub fn answer(&self, name: &str, state: &S) -> Result<serde_json::Value, WorkflowError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| WorkflowError::UnknownQuery(name.to_string()))?;

        handler(state).map_err(|source| WorkflowError::QueryFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Whether a handler is registered under `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered query names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<S> Default for QueryRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> std::fmt::Debug for QueryRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Counter {
        value: i32,
    }

    #[test]
    fn test_register_and_answer() {
        let mut registry = QueryRegistry::new();
        assert!(registry.register("getCounter", Counter::clone).is_ok());

        let answer = registry.answer("getCounter", &Counter { value: 3 });
        assert!(matches!(answer, Ok(ref v) if v["value"] == 3));
        assert_eq!(registry.names(), vec!["getCounter"]);
    }

    #[test]
    fn test_duplicate_name_is_rejected() {
        let mut registry = QueryRegistry::new();
        assert!(registry.register("getCounter", |s: &Counter| s.value).is_ok());

        let duplicate = registry.register("getCounter", |s: &Counter| s.value);
        assert!(matches!(
            duplicate,
            Err(WorkflowError::QueryRegistration { ref name, .. }) if name == "getCounter"
        ));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let mut registry: QueryRegistry<Counter> = QueryRegistry::new();
        let result = registry.register("  ", |s: &Counter| s.value);
        assert!(matches!(result, Err(WorkflowError::QueryRegistration { .. })));
    }

    #[test]
    fn test_unknown_query() {
        let registry: QueryRegistry<Counter> = QueryRegistry::new();
        let result = registry.answer("missing", &Counter { value: 0 });
        assert!(matches!(result, Err(WorkflowError::UnknownQuery(ref name)) if name == "missing"));
    }
}
