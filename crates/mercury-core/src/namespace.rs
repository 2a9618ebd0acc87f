//! Caller-side variable namespace.
//!
//! The engine publishes values back to its caller through a shared
//! string-keyed store: the variable sink appends captured output to it and
//! the action detector writes variables parsed from directive lines.
//! The namespace is created once per host process and injected into every
//! call site; there are no module-level globals.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared, thread-safe variable store.
///
/// Cloning is cheap and clones observe the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    vars: Arc<Mutex<HashMap<String, String>>>,
}

impl Namespace {
    /// Create an empty namespace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        let mut vars = self.vars.lock().unwrap_or_else(|e| e.into_inner());
        vars.insert(name.into(), value.into());
    }

    /// Get a variable's value, if set.
    pub fn get(&self, name: &str) -> Option<String> {
        let vars = self.vars.lock().unwrap_or_else(|e| e.into_inner());
        vars.get(name).cloned()
    }

    /// Append text to a variable, creating it as empty first if unset.
    pub fn append(&self, name: &str, text: &str) {
        let mut vars = self.vars.lock().unwrap_or_else(|e| e.into_inner());
        vars.entry(name.to_string()).or_default().push_str(text);
    }

    /// Whether a variable is set.
    pub fn contains(&self, name: &str) -> bool {
        let vars = self.vars.lock().unwrap_or_else(|e| e.into_inner());
        vars.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let ns = Namespace::new();
        ns.set("greeting", "hello");
        assert_eq!(ns.get("greeting"), Some("hello".to_string()));
        assert_eq!(ns.get("missing"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let ns = Namespace::new();
        let clone = ns.clone();
        clone.set("x", "1");
        assert_eq!(ns.get("x"), Some("1".to_string()));
    }

    #[test]
    fn test_append_creates_then_extends() {
        let ns = Namespace::new();
        ns.append("out", "foo");
        ns.append("out", "bar");
        assert_eq!(ns.get("out"), Some("foobar".to_string()));
    }
}
