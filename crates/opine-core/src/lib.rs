//! Core types and utilities shared across all Opine SDK crates

pub mod clock;
pub mod device;
pub mod events;
pub mod identity;
pub mod page_match;
pub mod protocol;
pub mod storage;
pub mod testing;
pub mod throttle;
pub mod transport;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::DeviceInfo;
pub use events::{scroll_percent, ElementInfo, PageEvent};
pub use identity::{VisitorIdentity, VisitorSession};
pub use page_match::{CompiledTarget, MatchType, PageTarget, PatternError};
pub use storage::{KeyValueStore, MemoryStore};
pub use throttle::Throttle;
pub use transport::{HttpTransport, Transport, TransportError};

// Re-export external dependencies
pub use async_trait;
pub use chrono;
pub use serde;
pub use serde_json;
pub use thiserror;
pub use tracing;
pub use uuid;
