//! Survey trigger evaluation and presentation
//!
//! Trigger rules arrive with the session-init response and are evaluated
//! entirely client-side: page events and clock ticks flow in, fired surveys
//! flow out. Presentation renders the fired survey into a host-provided
//! surface.

mod evaluator;
mod presentation;

pub use evaluator::{TriggerEvaluator, WatchRequest, DEFAULT_VISIBILITY_THRESHOLD};
pub use presentation::{ContainerSpec, DismissReason, PresentationEngine, SurfaceHost};
