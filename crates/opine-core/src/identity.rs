//! Visitor identity and sliding-window sessions
//!
//! A visitor id is created once per browser and never mutated or removed by
//! the client. A session is an ephemeral token with a sliding expiry: reading
//! a live session refreshes its window, an expired one is replaced.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::storage::{self, keys, KeyValueStore};

/// Minutes of inactivity after which a session expires
pub const SESSION_WINDOW_MINUTES: i64 = 30;

/// Persistent opaque visitor identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorIdentity {
    pub id: String,
}

impl VisitorIdentity {
    /// Load the stored visitor id, creating and persisting one on first visit.
    pub fn load_or_create(store: &dyn KeyValueStore) -> Self {
        if let Some(id) = store.get(keys::VISITOR_ID) {
            return Self { id };
        }

        let id = Uuid::new_v4().to_string();
        store.set(keys::VISITOR_ID, &id);
        Self { id }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    token: String,
    expires_at: i64,
}

/// Ephemeral visitor session with a sliding expiry window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorSession {
    pub token: String,
}

impl VisitorSession {
    /// Return the live session, refreshing its expiry, or start a fresh one.
    pub fn acquire(store: &dyn KeyValueStore, clock: &dyn Clock) -> Self {
        let now = clock.now();

        if let Some(stored) = storage::get_json::<StoredSession>(store, keys::SESSION) {
            if stored.expires_at > now.timestamp_millis() {
                // Sliding window: reading a live session extends it
                Self::persist(store, &stored.token, now.timestamp_millis());
                return Self {
                    token: stored.token,
                };
            }
        }

        let token = Uuid::new_v4().to_string();
        Self::persist(store, &token, now.timestamp_millis());
        Self { token }
    }

    fn persist(store: &dyn KeyValueStore, token: &str, now_ms: i64) {
        let window_ms = Duration::minutes(SESSION_WINDOW_MINUTES).num_milliseconds();
        storage::set_json(
            store,
            keys::SESSION,
            &StoredSession {
                token: token.to_string(),
                expires_at: now_ms + window_ms,
            },
        );
    }
}
