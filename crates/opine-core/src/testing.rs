//! Test doubles shared by the SDK crates' test suites

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::transport::{Transport, TransportError};

/// In-memory transport recording every call it receives.
///
/// Responses are keyed by request path; unmatched paths answer `{}`. Setting
/// `fail_requests` makes every async request fail, for retry-path tests.
#[derive(Default)]
pub struct MemoryTransport {
    pub posts: Mutex<Vec<(String, Value)>>,
    pub patches: Mutex<Vec<(String, Value)>>,
    pub beacons: Mutex<Vec<(String, Value)>>,
    responses: Mutex<HashMap<String, Value>>,
    fail_requests: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond_with(&self, path: &str, response: Value) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_requests.store(failing, Ordering::SeqCst);
    }

    pub fn post_count(&self, path: &str) -> usize {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    pub fn beacon_count(&self, path: &str) -> usize {
        self.beacons
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .count()
    }

    fn response_for(&self, path: &str) -> Value {
        self.responses
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        self.posts
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        Ok(self.response_for(path))
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        if self.fail_requests.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        self.patches
            .lock()
            .unwrap()
            .push((path.to_string(), body.clone()));
        Ok(self.response_for(path))
    }

    fn send_beacon(&self, path: &str, body: Value) -> bool {
        self.beacons.lock().unwrap().push((path.to_string(), body));
        true
    }
}
