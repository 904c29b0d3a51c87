//! Heatmap aggregation: buckets raw pointer/scroll events into a compact
//! spatial grid flushed periodically to the backend

mod aggregator;

pub use aggregator::{
    viewport_breakpoint, HeatmapAggregator, HeatmapPayload, HeatmapPoint, ScrollDepthEntry,
    FLUSH_INTERVAL_SECS, GRID_CELL_PX, MOVE_THROTTLE_MS, SCROLL_THROTTLE_MS,
};
