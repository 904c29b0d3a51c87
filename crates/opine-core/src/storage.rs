//! Durable client-side key-value storage abstraction
//!
//! The browser build backs this with `localStorage`; servers and tests inject
//! an in-memory implementation. All durable SDK state lives under the `op_`
//! key namespace so a host page can clear it wholesale.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

/// Well-known storage keys used by the SDK
pub mod keys {
    pub const VISITOR_ID: &str = "op_visitor_id";
    pub const SESSION: &str = "op_session";
    pub const SAMPLING: &str = "op_sampling";
    pub const TRIGGERS_SHOWN: &str = "op_triggers_shown";
    pub const TRIGGER_COOLDOWNS: &str = "op_trigger_cooldowns";

    /// Per-survey consent decision key
    pub fn consent(survey_id: i32) -> String {
        format!("op_consent_{}", survey_id)
    }
}

/// Minimal durable key-value store the SDK persists state through.
///
/// Writes are best-effort: a full or unavailable store must not break the
/// host page, so the interface is infallible and implementations swallow
/// their own errors.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// Read a JSON-serialized value from the store.
///
/// Malformed stored data is treated as absent rather than an error; stale
/// state is always recoverable by recreating it.
pub fn get_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = store.get(key)?;
    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Discarding malformed stored value for '{}': {}", key, e);
            store.remove(key);
            None
        }
    }
}

/// Write a JSON-serialized value to the store.
pub fn set_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(raw) => store.set(key, &raw),
        Err(e) => warn!("Failed to serialize value for '{}': {}", key, e),
    }
}

/// In-memory store used by tests and non-browser hosts
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set("op_visitor_id", "abc");

        assert_eq!(store.get("op_visitor_id"), Some("abc".to_string()));

        store.remove("op_visitor_id");
        assert_eq!(store.get("op_visitor_id"), None);
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        set_json(&store, "op_triggers_shown", &vec![1, 2, 3]);

        let shown: Option<Vec<i32>> = get_json(&store, "op_triggers_shown");
        assert_eq!(shown, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_malformed_value_discarded() {
        let store = MemoryStore::new();
        store.set("op_trigger_cooldowns", "{not json");

        let value: Option<HashMap<String, i64>> = get_json(&store, "op_trigger_cooldowns");
        assert_eq!(value, None);
        // The corrupt entry is removed so the next write starts clean
        assert_eq!(store.get("op_trigger_cooldowns"), None);
    }
}
