//! Retry-safe upload queue for event batches
//!
//! Batches upload in creation order. A failed upload re-queues the batch at
//! the front and a periodic drainer retries serially; the in-flight flag
//! keeps overlapping drain ticks from running concurrently.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use opine_core::Transport;

use crate::buffer::CompressedEventBatch;

/// Interval between retry-drain ticks
pub const DRAIN_INTERVAL_SECS: u64 = 5;

pub struct BatchUploader {
    transport: Arc<dyn Transport>,
    events_path: String,
    pending: Mutex<VecDeque<CompressedEventBatch>>,
    in_flight: AtomicBool,
}

impl BatchUploader {
    pub fn new(transport: Arc<dyn Transport>, session_token: &str) -> Self {
        Self {
            transport,
            events_path: format!("/recordings/{}/events", session_token),
            pending: Mutex::new(VecDeque::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Queue a batch and kick off an asynchronous drain without blocking
    /// the caller. Outside a runtime the batch simply waits for the next
    /// periodic drain.
    pub fn submit(self: &Arc<Self>, batch: CompressedEventBatch) {
        self.pending.lock().unwrap().push_back(batch);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let uploader = Arc::clone(self);
            handle.spawn(async move {
                uploader.drain().await;
            });
        }
    }

    /// Upload pending batches serially in FIFO order.
    ///
    /// A failure stops the pass and puts the batch back at the front so
    /// ordering is preserved for the next tick. Re-entrant calls are no-ops
    /// while a pass is running.
    pub async fn drain(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        loop {
            let batch = {
                let mut pending = self.pending.lock().unwrap();
                match pending.pop_front() {
                    Some(batch) => batch,
                    None => break,
                }
            };

            let body = batch.upload_body();
            match self.transport.post_json(&self.events_path, &body).await {
                Ok(_) => {
                    debug!(
                        "Uploaded batch of {} events to {}",
                        batch.event_count, self.events_path
                    );
                }
                Err(e) => {
                    warn!(
                        "Batch upload failed, re-queueing {} events: {}",
                        batch.event_count, e
                    );
                    self.pending.lock().unwrap().push_front(batch);
                    break;
                }
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Unload path: hand every pending batch to the beacon transport, one
    /// call per batch, payloads identical to a normal upload. Returns the
    /// number of batches handed off.
    pub fn flush_beacon(&self) -> usize {
        let mut pending = self.pending.lock().unwrap();
        let count = pending.len();
        for batch in pending.drain(..) {
            self.transport
                .send_beacon(&self.events_path, batch.upload_body());
        }
        count
    }
}
