//! Consent gate: the single source of truth for whether capture may run
//!
//! Decisions are survey-scoped and persist in durable client storage with an
//! expiry tied to the recording retention window, so a returning visitor is
//! not prompted again while their decision is still valid.

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use opine_core::storage::{self, keys, KeyValueStore};
use opine_core::Clock;

/// Ceiling on the retention window (10 years); the value is server-supplied
/// and must not be able to overflow date arithmetic
const MAX_RETENTION_DAYS: i64 = 3_650;

/// Recording lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    WaitingConsent,
    Recording,
    Stopped,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredConsent {
    granted: bool,
    expires_at: i64,
}

pub struct ConsentGate {
    survey_id: i32,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ConsentGate {
    pub fn new(survey_id: i32, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            survey_id,
            store,
            clock,
        }
    }

    /// The stored decision for this survey, if one exists and has not
    /// outlived the retention window it was made under.
    pub fn stored_decision(&self) -> Option<bool> {
        let key = keys::consent(self.survey_id);
        let stored = storage::get_json::<StoredConsent>(self.store.as_ref(), &key)?;

        if stored.expires_at <= self.clock.now().timestamp_millis() {
            self.store.remove(&key);
            return None;
        }
        Some(stored.granted)
    }

    /// Persist a decision, valid for the recording retention window.
    pub fn persist(&self, granted: bool, retention_days: i64) {
        let days = retention_days.clamp(0, MAX_RETENTION_DAYS);
        let expires_at = (self.clock.now() + Duration::days(days)).timestamp_millis();
        storage::set_json(
            self.store.as_ref(),
            &keys::consent(self.survey_id),
            &StoredConsent {
                granted,
                expires_at,
            },
        );
    }
}
