//! Survey presentation against a host-provided rendering surface
//!
//! The engine decides what container a fired survey needs and drives the
//! host's mount/unmount lifecycle. It owns the one-survey-at-a-time rule and
//! the dismissal semantics; the host owns the actual DOM (or whatever stands
//! in for it).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use opine_core::protocol::{DisplayMode, DisplayPosition, SurveyTrigger};

/// Rendering surface supplied by the embedding layer.
pub trait SurfaceHost: Send + Sync {
    fn mount(&self, container: &ContainerSpec);
    fn unmount(&self);
    /// Install a stylesheet under a marker id. The engine guarantees each
    /// marker is injected at most once per page view.
    fn inject_style(&self, marker_id: &str, css: &str);
    fn selector_exists(&self, selector: &str) -> bool;
}

/// The container a survey renders in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerSpec {
    Modal,
    SlideIn { corner: DisplayPosition },
    Banner { edge: DisplayPosition },
    Inline { selector: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
    CloseButton,
    Backdrop,
    Escape,
}

struct ActiveSurface {
    survey_id: i32,
    modal: bool,
}

pub struct PresentationEngine {
    host: Arc<dyn SurfaceHost>,
    injected_styles: HashSet<&'static str>,
    active: Option<ActiveSurface>,
}

const MODAL_STYLE_ID: &str = "opine-style-modal";
const MODAL_CSS: &str = "@keyframes opine-fade-in { from { opacity: 0; } to { opacity: 1; } } \
     .opine-backdrop { position: fixed; inset: 0; background: rgba(0,0,0,0.5); \
     animation: opine-fade-in 0.2s ease-out; z-index: 2147483646; } \
     .opine-modal { position: fixed; top: 50%; left: 50%; \
     transform: translate(-50%, -50%); z-index: 2147483647; }";

const SLIDE_IN_STYLE_ID: &str = "opine-style-slide-in";
const SLIDE_IN_CSS: &str = "@keyframes opine-slide-up { from { transform: translateY(20px); opacity: 0; } \
     to { transform: translateY(0); opacity: 1; } } \
     .opine-slide-in { position: fixed; animation: opine-slide-up 0.3s ease-out; \
     z-index: 2147483647; }";

const BANNER_STYLE_ID: &str = "opine-style-banner";
const BANNER_CSS: &str = "@keyframes opine-slide-down { from { transform: translateY(-100%); } \
     to { transform: translateY(0); } } \
     .opine-banner { position: fixed; left: 0; right: 0; \
     animation: opine-slide-down 0.3s ease-out; z-index: 2147483647; }";

impl PresentationEngine {
    pub fn new(host: Arc<dyn SurfaceHost>) -> Self {
        Self {
            host,
            injected_styles: HashSet::new(),
            active: None,
        }
    }

    /// Survey id of the currently displayed survey, if any.
    pub fn active_survey(&self) -> Option<i32> {
        self.active.as_ref().map(|surface| surface.survey_id)
    }

    /// Mount the survey a trigger fired for. Returns false when nothing was
    /// shown: another survey is already up, or an inline mount point does
    /// not exist on this page.
    pub fn present(&mut self, trigger: &SurveyTrigger) -> bool {
        if let Some(active) = &self.active {
            debug!(
                "Survey {} already displayed, not presenting {}",
                active.survey_id, trigger.survey_id
            );
            return false;
        }

        let container = match self.container_for(trigger) {
            Some(container) => container,
            None => return false,
        };

        self.ensure_style(&container);
        self.host.mount(&container);
        self.active = Some(ActiveSurface {
            survey_id: trigger.survey_id,
            modal: container == ContainerSpec::Modal,
        });
        debug!("Presented survey {} ({:?})", trigger.survey_id, container);
        true
    }

    /// Dismiss the active survey. Backdrop clicks and the escape key only
    /// apply to modals; the close button dismisses anything. Returns whether
    /// a survey was actually dismissed.
    pub fn dismiss(&mut self, reason: DismissReason) -> bool {
        let Some(active) = &self.active else {
            return false;
        };

        let applies = match reason {
            DismissReason::CloseButton => true,
            DismissReason::Backdrop | DismissReason::Escape => active.modal,
        };
        if !applies {
            return false;
        }

        debug!("Survey {} dismissed ({:?})", active.survey_id, reason);
        self.host.unmount();
        self.active = None;
        true
    }

    /// Tear everything down, used on page unload or tracker destroy.
    pub fn teardown(&mut self) {
        if self.active.take().is_some() {
            self.host.unmount();
        }
    }

    fn container_for(&self, trigger: &SurveyTrigger) -> Option<ContainerSpec> {
        match trigger.display_mode {
            DisplayMode::Modal => Some(ContainerSpec::Modal),
            DisplayMode::SlideIn => Some(ContainerSpec::SlideIn {
                corner: trigger
                    .display_position
                    .unwrap_or(DisplayPosition::BottomRight),
            }),
            DisplayMode::Banner => Some(ContainerSpec::Banner {
                edge: trigger.display_position.unwrap_or(DisplayPosition::Bottom),
            }),
            DisplayMode::Inline | DisplayMode::Embedded => {
                let selector = trigger.trigger_selector.as_ref()?;
                if !self.host.selector_exists(selector) {
                    // The mount point is simply absent on this page
                    debug!(
                        "Inline mount point '{}' not found for survey {}",
                        selector, trigger.survey_id
                    );
                    return None;
                }
                Some(ContainerSpec::Inline {
                    selector: selector.clone(),
                })
            }
        }
    }

    fn ensure_style(&mut self, container: &ContainerSpec) {
        let (marker, css) = match container {
            ContainerSpec::Modal => (MODAL_STYLE_ID, MODAL_CSS),
            ContainerSpec::SlideIn { .. } => (SLIDE_IN_STYLE_ID, SLIDE_IN_CSS),
            ContainerSpec::Banner { .. } => (BANNER_STYLE_ID, BANNER_CSS),
            ContainerSpec::Inline { .. } => return,
        };
        if self.injected_styles.insert(marker) {
            self.host.inject_style(marker, css);
        }
    }
}
