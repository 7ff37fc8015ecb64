//! Per-scenario key/value store.
//!
//! "Remember" steps write into it and later fill/assert steps read from it.
//! It lives inside the scenario's world, so it starts empty for every
//! scenario and is dropped with it.

use std::collections::HashMap;

/// Key under which the body of the last matched email is stored
pub const FOUND_EMAIL_BODY: &str = "found email body";

/// Values remembered during one scenario
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScenarioContext {
    values: HashMap<String, String>,
}

impl ScenarioContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous one
    pub fn remember(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        tracing::debug!(key = %key, "remembered value");
        let _ = self.values.insert(key, value.into());
    }

    /// Remembered value for `key`
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// True if `key` has been remembered
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The remembered value if `literal` names one, otherwise `literal` itself
    #[must_use]
    pub fn resolve(&self, literal: &str) -> String {
        self.get(literal).unwrap_or(literal).to_string()
    }

    /// Number of remembered values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing has been remembered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
