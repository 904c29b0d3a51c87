//! Spatial aggregation of pointer and scroll activity
//!
//! Many raw events collapse into one grid cell, so the flushed payload stays
//! small and carries no per-event detail, only counts. Heatmap delivery is
//! best-effort telemetry: state is cleared before transport hand-off and
//! loss on failure is accepted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use opine_core::events::{scroll_percent, ElementInfo, PageEvent};
use opine_core::{Clock, Throttle, Transport};

/// Grid cell size in CSS pixels
pub const GRID_CELL_PX: f64 = 10.0;
/// Pointer-move sampling interval
pub const MOVE_THROTTLE_MS: i64 = 50;
/// Scroll sampling interval
pub const SCROLL_THROTTLE_MS: i64 = 500;
/// Periodic flush interval
pub const FLUSH_INTERVAL_SECS: u64 = 30;

/// One occupied grid cell
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPoint {
    pub grid_x: i64,
    pub grid_y: i64,
    pub count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

/// Cumulative visit count for one 10% depth bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScrollDepthEntry {
    pub depth: u32,
    pub count: u32,
}

/// Aggregated payload, `POST /heatmap`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapPayload {
    pub site_id: String,
    pub page_path: String,
    pub viewport_breakpoint: String,
    pub clicks: Vec<HeatmapPoint>,
    pub moves: Vec<HeatmapPoint>,
    pub scrolls: Vec<ScrollDepthEntry>,
}

/// Classify a viewport width into the breakpoint the dashboard groups by
pub fn viewport_breakpoint(viewport_width: u32) -> &'static str {
    if viewport_width < 768 {
        "mobile"
    } else if viewport_width < 1024 {
        "tablet"
    } else {
        "desktop"
    }
}

pub struct HeatmapAggregator {
    site_id: String,
    page_path: String,
    breakpoint: &'static str,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    move_throttle: Throttle,
    scroll_throttle: Throttle,
    clicks: HashMap<(i64, i64), HeatmapPoint>,
    moves: HashMap<(i64, i64), HeatmapPoint>,
    scrolls: BTreeMap<u32, u32>,
}

impl HeatmapAggregator {
    pub fn new(
        site_id: String,
        page_path: String,
        viewport_width: u32,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            site_id,
            page_path,
            breakpoint: viewport_breakpoint(viewport_width),
            clock,
            transport,
            move_throttle: Throttle::new(MOVE_THROTTLE_MS),
            scroll_throttle: Throttle::new(SCROLL_THROTTLE_MS),
            clicks: HashMap::new(),
            moves: HashMap::new(),
            scrolls: BTreeMap::new(),
        }
    }

    pub fn handle_event(&mut self, event: &PageEvent) {
        match event {
            PageEvent::PointerMove { x, y } => self.on_pointer_move(*x, *y),
            PageEvent::Click { x, y, target } => self.on_click(*x, *y, target.as_ref()),
            PageEvent::Scroll {
                scroll_top,
                doc_height,
                viewport_height,
            } => self.on_scroll(*scroll_top, *doc_height, *viewport_height),
            _ => {}
        }
    }

    /// Pointer moves are throttled to bound volume; clicks are not.
    pub fn on_pointer_move(&mut self, x: f64, y: f64) {
        let now = self.clock.now();
        if !self.move_throttle.allow(now) {
            return;
        }

        let cell = quantize(x, y);
        let point = self.moves.entry(cell).or_insert_with(|| HeatmapPoint {
            grid_x: cell.0,
            grid_y: cell.1,
            count: 0,
            selector: None,
        });
        point.count += 1;
    }

    pub fn on_click(&mut self, x: f64, y: f64, target: Option<&ElementInfo>) {
        let cell = quantize(x, y);
        let selector = target.map(|t| t.css_selector());
        let point = self.clicks.entry(cell).or_insert_with(|| HeatmapPoint {
            grid_x: cell.0,
            grid_y: cell.1,
            count: 0,
            selector,
        });
        point.count += 1;
    }

    /// Increment every depth bucket up to and including the current position,
    /// encoding "the visitor saw everything above this point".
    pub fn on_scroll(&mut self, scroll_top: f64, doc_height: f64, viewport_height: f64) {
        let now = self.clock.now();
        if !self.scroll_throttle.allow(now) {
            return;
        }

        let Some(percent) = scroll_percent(scroll_top, doc_height, viewport_height) else {
            return;
        };

        let top_bucket = (percent / 10.0).floor() as u32 * 10;
        for depth in (0..=top_bucket).step_by(10) {
            *self.scrolls.entry(depth).or_insert(0) += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.clicks.is_empty() && self.moves.is_empty() && self.scrolls.is_empty()
    }

    /// Serialize and hand accumulated points to the transport.
    ///
    /// No-op when nothing accumulated. Local state is cleared before the
    /// hand-off, so a transport failure loses this window's data rather
    /// than duplicating it later.
    pub fn flush(&mut self) {
        if self.is_empty() {
            return;
        }

        let payload = HeatmapPayload {
            site_id: self.site_id.clone(),
            page_path: self.page_path.clone(),
            viewport_breakpoint: self.breakpoint.to_string(),
            clicks: self.clicks.drain().map(|(_, p)| p).collect(),
            moves: self.moves.drain().map(|(_, p)| p).collect(),
            scrolls: std::mem::take(&mut self.scrolls)
                .into_iter()
                .map(|(depth, count)| ScrollDepthEntry { depth, count })
                .collect(),
        };

        match serde_json::to_value(&payload) {
            Ok(body) => {
                debug!(
                    "Flushing heatmap for {}: {} clicks, {} moves, {} scroll buckets",
                    payload.page_path,
                    payload.clicks.len(),
                    payload.moves.len(),
                    payload.scrolls.len()
                );
                self.transport.send_beacon("/heatmap", body);
            }
            Err(e) => warn!("Failed to serialize heatmap payload: {}", e),
        }
    }
}

fn quantize(x: f64, y: f64) -> (i64, i64) {
    (
        (x / GRID_CELL_PX).floor() as i64,
        (y / GRID_CELL_PX).floor() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use opine_core::testing::MemoryTransport;
    use opine_core::ManualClock;

    fn aggregator(
        clock: Arc<ManualClock>,
        transport: Arc<MemoryTransport>,
    ) -> HeatmapAggregator {
        HeatmapAggregator::new(
            "site-1".to_string(),
            "/pricing".to_string(),
            1280,
            clock,
            transport,
        )
    }

    fn flushed_payload(transport: &MemoryTransport) -> HeatmapPayload {
        let beacons = transport.beacons.lock().unwrap();
        let (path, body) = beacons.last().expect("expected a heatmap beacon").clone();
        assert_eq!(path, "/heatmap");
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_clicks_collapse_into_grid_cells() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        // Three clicks in the same 10px cell, one in another
        heatmap.on_click(12.0, 15.0, None);
        heatmap.on_click(14.0, 19.0, None);
        heatmap.on_click(11.0, 10.0, None);
        heatmap.on_click(205.0, 310.0, None);

        heatmap.flush();
        let payload = flushed_payload(&transport);

        assert_eq!(payload.clicks.len(), 2);
        let total: u32 = payload.clicks.iter().map(|p| p.count).sum();
        assert_eq!(total, 4);

        let dense = payload
            .clicks
            .iter()
            .find(|p| p.grid_x == 1 && p.grid_y == 1)
            .unwrap();
        assert_eq!(dense.count, 3);
    }

    #[test]
    fn test_click_records_target_selector() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        let target = ElementInfo {
            id: Some("cta".to_string()),
            tag: "button".to_string(),
            classes: vec![],
            parent: None,
        };
        heatmap.on_click(50.0, 50.0, Some(&target));

        heatmap.flush();
        let payload = flushed_payload(&transport);
        assert_eq!(payload.clicks[0].selector, Some("#cta".to_string()));
    }

    #[test]
    fn test_pointer_moves_throttled() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock.clone(), transport.clone());

        // Burst of moves inside one throttle window: only the first counts
        heatmap.on_pointer_move(10.0, 10.0);
        heatmap.on_pointer_move(10.0, 10.0);
        heatmap.on_pointer_move(10.0, 10.0);

        clock.advance(Duration::milliseconds(MOVE_THROTTLE_MS));
        heatmap.on_pointer_move(10.0, 10.0);

        heatmap.flush();
        let payload = flushed_payload(&transport);
        assert_eq!(payload.moves.len(), 1);
        assert_eq!(payload.moves[0].count, 2);
    }

    #[test]
    fn test_scroll_fills_buckets_up_to_position() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        // 65% of a 1000px scrollable range
        heatmap.on_scroll(650.0, 2000.0, 1000.0);

        heatmap.flush();
        let payload = flushed_payload(&transport);

        let depths: Vec<u32> = payload.scrolls.iter().map(|s| s.depth).collect();
        assert_eq!(depths, vec![0, 10, 20, 30, 40, 50, 60]);
        assert!(payload.scrolls.iter().all(|s| s.count == 1));
    }

    #[test]
    fn test_scroll_ignored_on_non_scrollable_page() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        heatmap.on_scroll(0.0, 800.0, 1000.0);

        assert!(heatmap.is_empty());
        heatmap.flush();
        assert_eq!(transport.beacon_count("/heatmap"), 0);
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        heatmap.flush();
        heatmap.flush();

        assert_eq!(transport.beacon_count("/heatmap"), 0);
    }

    #[test]
    fn test_flush_clears_state() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let transport = Arc::new(MemoryTransport::new());
        let mut heatmap = aggregator(clock, transport.clone());

        heatmap.on_click(10.0, 10.0, None);
        heatmap.flush();
        assert!(heatmap.is_empty());

        // Second flush sends nothing
        heatmap.flush();
        assert_eq!(transport.beacon_count("/heatmap"), 1);
    }

    #[test]
    fn test_viewport_breakpoints() {
        assert_eq!(viewport_breakpoint(375), "mobile");
        assert_eq!(viewport_breakpoint(768), "tablet");
        assert_eq!(viewport_breakpoint(1024), "desktop");
        assert_eq!(viewport_breakpoint(1920), "desktop");
    }
}
