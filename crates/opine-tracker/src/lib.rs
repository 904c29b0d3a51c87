//! Session orchestration facade for the Opine SDK
//!
//! The tracker owns one page view: it initializes the backend session, makes
//! the sampling decision, wires up only the features the backend enabled,
//! and fans page events out to them. Hosts construct it with their own
//! storage, clock, transport and rendering surface.

mod embed;
mod tracker;

pub use embed::{EmbedError, EmbedOptions, DEFAULT_API_ENDPOINT};
pub use tracker::{PageContext, Tracker, TrackerOptions, TrackerState, EVALUATOR_TICK_MS};

pub use opine_core::{
    Clock, HttpTransport, KeyValueStore, MemoryStore, PageEvent, SystemClock, Transport,
};
pub use opine_recorder::RecordingState;
pub use opine_triggers::{ContainerSpec, DismissReason, SurfaceHost, WatchRequest};
