//! Session-replay event recording: batching, compression, retry-safe upload,
//! and the consent gate governing whether capture may run

mod buffer;
mod consent;
mod error;
mod recorder;
mod uploader;

pub use buffer::{CompressedEventBatch, EventBuffer, MAX_BATCH_AGE_SECS, MAX_BATCH_BYTES};
pub use consent::{ConsentGate, RecordingState};
pub use error::RecorderError;
pub use recorder::{Recorder, RecorderConfig, StartOutcome};
pub use uploader::{BatchUploader, DRAIN_INTERVAL_SECS};
