//! Size/time-bounded batching of serialized replay events
//!
//! Events come from an external capture callback one at a time and are sealed
//! into compressed batches. The batch payload is a zlib-compressed,
//! base64-encoded JSON array preserving capture order: the format the
//! backend's replay ingestion decodes.

use std::io::Write;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use opine_core::Clock;

use crate::error::RecorderError;

/// Byte ceiling for a batch (measured on the uncompressed events)
pub const MAX_BATCH_BYTES: usize = 64 * 1024;
/// Time ceiling for a batch
pub const MAX_BATCH_AGE_SECS: i64 = 10;

/// An ordered, time-bounded group of serialized replay events.
///
/// Owned exclusively by the buffer until sealed, then handed to the upload
/// queue and dropped from buffer memory regardless of delivery outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompressedEventBatch {
    /// Base64-encoded zlib-compressed JSON event array
    pub events: String,
    pub event_count: usize,
    /// Set on the terminal batch of a recording
    pub is_complete: bool,
}

impl CompressedEventBatch {
    /// The exact JSON body an upload or unload beacon sends for this batch
    pub fn upload_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub struct EventBuffer {
    clock: Arc<dyn Clock>,
    events: Vec<Value>,
    bytes: usize,
    opened_at: Option<DateTime<Utc>>,
    max_bytes: usize,
    max_age: Duration,
}

impl EventBuffer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, MAX_BATCH_BYTES, MAX_BATCH_AGE_SECS)
    }

    pub fn with_limits(clock: Arc<dyn Clock>, max_bytes: usize, max_age_secs: i64) -> Self {
        Self {
            clock,
            events: Vec::new(),
            bytes: 0,
            opened_at: None,
            max_bytes,
            max_age: Duration::seconds(max_age_secs),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Accept one event; returns a sealed batch when the byte or time
    /// ceiling is reached.
    pub fn push(&mut self, event: Value) -> Option<CompressedEventBatch> {
        let now = self.clock.now();
        if self.opened_at.is_none() {
            self.opened_at = Some(now);
        }

        self.bytes += event.to_string().len();
        self.events.push(event);

        let over_bytes = self.bytes >= self.max_bytes;
        let over_age = self
            .opened_at
            .map(|opened| now - opened >= self.max_age)
            .unwrap_or(false);

        if over_bytes || over_age {
            self.seal(false)
        } else {
            None
        }
    }

    /// Seal whatever is buffered. `complete` marks the terminal batch.
    /// Returns `None` when the buffer is empty; an empty flush never
    /// produces a batch.
    pub fn flush(&mut self, complete: bool) -> Option<CompressedEventBatch> {
        if self.events.is_empty() {
            return None;
        }
        self.seal(complete)
    }

    fn seal(&mut self, complete: bool) -> Option<CompressedEventBatch> {
        let events = std::mem::take(&mut self.events);
        self.bytes = 0;
        self.opened_at = None;

        match compress_events(&events) {
            Ok(encoded) => Some(CompressedEventBatch {
                events: encoded,
                event_count: events.len(),
                is_complete: complete,
            }),
            Err(e) => {
                // The window's events are lost; never propagate into the host
                error!("Failed to compress event batch: {}", e);
                None
            }
        }
    }
}

fn compress_events(events: &[Value]) -> Result<String, RecorderError> {
    let json = serde_json::to_vec(events)?;
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(STANDARD.encode(compressed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::ZlibDecoder;
    use opine_core::ManualClock;
    use serde_json::json;
    use std::io::Read;

    fn decode(batch: &CompressedEventBatch) -> Vec<Value> {
        let compressed = STANDARD.decode(&batch.events).unwrap();
        let mut decoder = ZlibDecoder::new(&compressed[..]);
        let mut raw = String::new();
        decoder.read_to_string(&mut raw).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_batch_preserves_capture_order() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::new(clock);

        for i in 0..5 {
            assert!(buffer.push(json!({"type": 3, "seq": i})).is_none());
        }

        let batch = buffer.flush(false).unwrap();
        assert_eq!(batch.event_count, 5);
        assert!(!batch.is_complete);

        let events = decode(&batch);
        let seqs: Vec<i64> = events.iter().map(|e| e["seq"].as_i64().unwrap()).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_byte_ceiling_seals_batch() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::with_limits(clock, 256, MAX_BATCH_AGE_SECS);

        let padding = "x".repeat(100);
        assert!(buffer.push(json!({ "data": padding })).is_none());
        assert!(buffer.push(json!({ "data": padding })).is_none());

        let sealed = buffer.push(json!({ "data": padding }));
        assert!(sealed.is_some());
        assert_eq!(sealed.unwrap().event_count, 3);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_time_ceiling_seals_batch() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::new(clock.clone());

        assert!(buffer.push(json!({"type": 3})).is_none());

        clock.advance(Duration::seconds(MAX_BATCH_AGE_SECS));
        let sealed = buffer.push(json!({"type": 3}));
        assert!(sealed.is_some());
        assert_eq!(sealed.unwrap().event_count, 2);
    }

    #[test]
    fn test_empty_flush_produces_nothing() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::new(clock);

        assert!(buffer.flush(false).is_none());
        assert!(buffer.flush(true).is_none());
    }

    #[test]
    fn test_terminal_flush_sets_complete_flag() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::new(clock);

        buffer.push(json!({"type": 2}));
        let batch = buffer.flush(true).unwrap();
        assert!(batch.is_complete);
    }

    #[test]
    fn test_upload_body_shape() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let mut buffer = EventBuffer::new(clock);

        buffer.push(json!({"type": 2}));
        let batch = buffer.flush(true).unwrap();
        let body = batch.upload_body();

        assert_eq!(body["eventCount"], 1);
        assert_eq!(body["isComplete"], true);
        assert!(body["events"].is_string());
    }
}
