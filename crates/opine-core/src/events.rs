//! Typed page events
//!
//! The embedding layer translates DOM listener callbacks into these variants
//! and pushes them into the tracker, which makes throttling, ordering and
//! trigger evaluation testable without a real DOM.

/// A single input event observed on the host page
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    PointerMove {
        x: f64,
        y: f64,
    },
    Click {
        x: f64,
        y: f64,
        target: Option<ElementInfo>,
    },
    Scroll {
        scroll_top: f64,
        doc_height: f64,
        viewport_height: f64,
    },
    /// Cursor left the document; `client_y <= 0` means through the top edge
    MouseOut {
        client_y: f64,
    },
    /// A watched element (see trigger watch requests) was clicked
    ElementClick {
        selector: String,
    },
    /// A watched element's intersection ratio changed
    ElementVisible {
        selector: String,
        ratio: f64,
    },
    /// Tab hidden or page being torn down
    PageHidden,
}

/// Lightweight description of a DOM element, enough to derive a selector
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementInfo {
    pub id: Option<String>,
    pub tag: String,
    pub classes: Vec<String>,
    pub parent: Option<Box<ElementInfo>>,
}

impl ElementInfo {
    /// Best-effort CSS selector for the element: its id if present, else
    /// tag plus the first two classes, else walk up the parent chain until
    /// something identifiable (or `body`) is found.
    pub fn css_selector(&self) -> String {
        if let Some(id) = &self.id {
            if !id.is_empty() {
                return format!("#{}", id);
            }
        }

        if !self.classes.is_empty() {
            let classes: Vec<&str> = self
                .classes
                .iter()
                .take(2)
                .map(|c| c.as_str())
                .collect();
            return format!("{}.{}", self.tag, classes.join("."));
        }

        if self.tag.eq_ignore_ascii_case("body") {
            return "body".to_string();
        }

        match &self.parent {
            Some(parent) => parent.css_selector(),
            None => {
                if self.tag.is_empty() {
                    "body".to_string()
                } else {
                    self.tag.clone()
                }
            }
        }
    }
}

/// Scroll position as a percentage of the scrollable range.
///
/// Returns `None` for non-scrollable pages (document no taller than the
/// viewport), which callers treat as a no-op.
pub fn scroll_percent(scroll_top: f64, doc_height: f64, viewport_height: f64) -> Option<f64> {
    let scrollable = doc_height - viewport_height;
    if scrollable <= 0.0 {
        return None;
    }
    Some(((scroll_top / scrollable) * 100.0).clamp(0.0, 100.0))
}
