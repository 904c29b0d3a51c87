//! The Tracker facade: one instance per page view
//!
//! Initialization talks to the backend once, applies the sampling decision,
//! and wires up only the enabled features. Everything after that is event
//! dispatch. A failed init leaves the tracker silently inert: a tracking
//! script must never break the page it is embedded in, so there is no error
//! surface on this type at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use opine_core::protocol::{CaptureSettings, InitRequest, InitResponse, SurveyTrigger};
use opine_core::storage::{self, keys, KeyValueStore};
use opine_core::{Clock, PageEvent, Transport, VisitorIdentity, VisitorSession};
use opine_heatmap::{HeatmapAggregator, FLUSH_INTERVAL_SECS};
use opine_recorder::{Recorder, RecorderConfig, RecordingState, StartOutcome, DRAIN_INTERVAL_SECS};
use opine_triggers::{
    DismissReason, PresentationEngine, SurfaceHost, TriggerEvaluator, WatchRequest,
};

/// Interval between time-based trigger evaluations
pub const EVALUATOR_TICK_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    /// Initialized and dispatching events
    Ready,
    /// Init failed or the visitor was sampled out; every call is a no-op
    Inert,
    Destroyed,
}

/// Host-environment metadata that does not change within a page view
pub struct TrackerOptions {
    pub site_id: String,
    /// Survey this tag deployment belongs to; scopes consent decisions
    pub survey_id: i32,
    pub user_agent: String,
    pub screen: (u32, u32),
    pub viewport: (u32, u32),
    pub timezone: String,
    pub language: String,
}

/// The page being tracked
#[derive(Debug, Clone)]
pub struct PageContext {
    pub url: String,
    pub path: String,
    pub title: String,
    pub referrer: String,
}

impl PageContext {
    /// Derive the context from a full page URL.
    pub fn from_url(page_url: &str, title: &str, referrer: &str) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(page_url)?;
        Ok(Self {
            url: page_url.to_string(),
            path: parsed.path().to_string(),
            title: title.to_string(),
            referrer: referrer.to_string(),
        })
    }
}

/// Sampling roll made once per visitor; re-applying it against the current
/// rate keeps the decision stable across page views even if the rate moves.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredSampling {
    roll: f64,
}

pub struct Tracker {
    options: TrackerOptions,
    state: Mutex<TrackerState>,
    heatmap: Option<Mutex<HeatmapAggregator>>,
    recorder: Option<tokio::sync::Mutex<Recorder>>,
    evaluator: Option<Mutex<TriggerEvaluator>>,
    presentation: Option<Mutex<PresentationEngine>>,
    consent_pending: AtomicBool,
    unload_flushed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Tracker {
    /// Initialize a tracker for the current page view.
    ///
    /// Always returns a tracker; when the backend is unreachable, the
    /// response is malformed, or the visitor is sampled out, the tracker is
    /// inert rather than an error.
    pub async fn init(
        options: TrackerOptions,
        page: PageContext,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
        host: Arc<dyn SurfaceHost>,
    ) -> Arc<Self> {
        let visitor = VisitorIdentity::load_or_create(store.as_ref());
        let session = VisitorSession::acquire(store.as_ref(), clock.as_ref());

        let request = InitRequest {
            site_id: options.site_id.clone(),
            visitor_id: visitor.id.clone(),
            session_token: Some(session.token.clone()),
            page_url: page.url.clone(),
            page_path: page.path.clone(),
            page_title: page.title.clone(),
            referrer: page.referrer.clone(),
            user_agent: options.user_agent.clone(),
            screen_width: options.screen.0,
            screen_height: options.screen.1,
            viewport_width: options.viewport.0,
            viewport_height: options.viewport.1,
            timezone: options.timezone.clone(),
            language: options.language.clone(),
        };

        let response = match Self::fetch_init(transport.as_ref(), &request).await {
            Some(response) => response,
            None => return Self::inert(options),
        };

        if !sampling_included(store.as_ref(), response.config.sampling_rate) {
            info!(
                "Visitor sampled out at rate {}",
                response.config.sampling_rate
            );
            return Self::inert(options);
        }

        let heatmap = response.config.heatmaps_enabled.then(|| {
            Mutex::new(HeatmapAggregator::new(
                options.site_id.clone(),
                page.path.clone(),
                options.viewport.0,
                clock.clone(),
                transport.clone(),
            ))
        });

        let evaluator = response.config.surveys_enabled.then(|| {
            Mutex::new(TriggerEvaluator::new(
                store.clone(),
                clock.clone(),
                response.triggers,
                &response.page_targets,
                &page.path,
            ))
        });
        let presentation = evaluator
            .is_some()
            .then(|| Mutex::new(PresentationEngine::new(host)));

        let mut consent_pending = false;
        let recorder = if response.config.recording_enabled {
            let mut recorder = Recorder::new(
                RecorderConfig {
                    site_id: options.site_id.clone(),
                    survey_id: options.survey_id,
                    capture: CaptureSettings::default(),
                },
                store,
                clock,
                transport,
            );
            match recorder
                .start(&session, options.viewport, &options.user_agent)
                .await
            {
                Ok(StartOutcome::AwaitingConsent) => consent_pending = true,
                Ok(outcome) => debug!("Recording start outcome: {:?}", outcome),
                Err(e) => warn!("Failed to start recording: {}", e),
            }
            Some(tokio::sync::Mutex::new(recorder))
        } else {
            None
        };

        let tracker = Arc::new(Self {
            options,
            state: Mutex::new(TrackerState::Ready),
            heatmap,
            recorder,
            evaluator,
            presentation,
            consent_pending: AtomicBool::new(consent_pending),
            unload_flushed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });
        tracker.spawn_tasks();
        tracker
    }

    async fn fetch_init(transport: &dyn Transport, request: &InitRequest) -> Option<InitResponse> {
        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to serialize init request: {}", e);
                return None;
            }
        };
        let raw = match transport.post_json("/init", &body).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Session init failed: {}", e);
                return None;
            }
        };
        match serde_json::from_value(raw) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("Malformed init response: {}", e);
                None
            }
        }
    }

    fn inert(options: TrackerOptions) -> Arc<Self> {
        Arc::new(Self {
            options,
            state: Mutex::new(TrackerState::Inert),
            heatmap: None,
            recorder: None,
            evaluator: None,
            presentation: None,
            consent_pending: AtomicBool::new(false),
            unload_flushed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> TrackerState {
        *self.state.lock().unwrap()
    }

    pub fn site_id(&self) -> &str {
        &self.options.site_id
    }

    /// Whether the host must render a recording-consent prompt.
    pub fn consent_pending(&self) -> bool {
        self.consent_pending.load(Ordering::SeqCst)
    }

    /// Element observations the embedding layer must install for the armed
    /// triggers.
    pub fn watch_requests(&self) -> Vec<WatchRequest> {
        match &self.evaluator {
            Some(evaluator) => evaluator.lock().unwrap().watch_requests(),
            None => Vec::new(),
        }
    }

    /// Dispatch one observed page event to every active component.
    pub fn handle_event(&self, event: &PageEvent) {
        if self.state() != TrackerState::Ready {
            return;
        }
        if matches!(event, PageEvent::PageHidden) {
            self.handle_unload();
            return;
        }

        if let Some(heatmap) = &self.heatmap {
            heatmap.lock().unwrap().handle_event(event);
        }
        if let Some(evaluator) = &self.evaluator {
            let fired = evaluator.lock().unwrap().handle_event(event);
            self.present_fired(fired);
        }
    }

    /// Evaluate time-based trigger conditions. Driven by a periodic task;
    /// also callable directly by hosts without a runtime.
    pub fn evaluate_timers(&self) {
        if self.state() != TrackerState::Ready {
            return;
        }
        if let Some(evaluator) = &self.evaluator {
            let fired = evaluator.lock().unwrap().tick();
            self.present_fired(fired);
        }
    }

    fn present_fired(&self, fired: Vec<SurveyTrigger>) {
        let (Some(evaluator), Some(presentation)) = (&self.evaluator, &self.presentation) else {
            return;
        };
        for trigger in fired {
            if presentation.lock().unwrap().present(&trigger) {
                evaluator.lock().unwrap().mark_fired(&trigger);
            }
        }
    }

    /// Flush accumulated heatmap data (a no-op when nothing accumulated).
    pub fn flush_heatmap(&self) {
        if let Some(heatmap) = &self.heatmap {
            heatmap.lock().unwrap().flush();
        }
    }

    /// Retry tick for pending replay-event uploads.
    pub async fn drain_uploads(&self) {
        let uploader = match &self.recorder {
            Some(recorder) => recorder.lock().await.uploader(),
            None => None,
        };
        if let Some(uploader) = uploader {
            uploader.drain().await;
        }
    }

    /// Intake for the external replay-capture callback.
    pub async fn record_event(&self, event: Value) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().await.record_event(event);
        }
    }

    /// Record a host-defined custom event.
    pub async fn track(&self, name: &str, properties: Value) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().await.track(name, properties);
        }
    }

    /// Attach a user identity to the replay stream.
    pub async fn identify(&self, user_id: &str, traits: Value) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().await.identify(user_id, traits);
        }
    }

    /// The visitor accepted the recording-consent prompt.
    pub async fn give_consent(&self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.lock().await.give_consent() {
                warn!("Failed to apply consent: {}", e);
            }
            self.consent_pending.store(false, Ordering::SeqCst);
        }
    }

    /// The visitor declined the recording-consent prompt.
    pub async fn deny_consent(&self) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.lock().await.deny_consent().await {
                warn!("Failed to apply consent denial: {}", e);
            }
            self.consent_pending.store(false, Ordering::SeqCst);
        }
    }

    /// Link a completed survey response to the active recording.
    pub async fn link_response(&self, response_id: i32) {
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.lock().await.link_response(response_id).await {
                warn!("Failed to link response {}: {}", response_id, e);
            }
        }
    }

    /// Dismiss the displayed survey; returns whether one was dismissed.
    pub fn dismiss(&self, reason: DismissReason) -> bool {
        match &self.presentation {
            Some(presentation) => presentation.lock().unwrap().dismiss(reason),
            None => false,
        }
    }

    pub fn recording_state(&self) -> Option<RecordingState> {
        self.recorder
            .as_ref()
            .and_then(|recorder| recorder.try_lock().ok().map(|recorder| recorder.state()))
    }

    /// The single flush-on-exit path, covering unload, pagehide and
    /// tab-hidden. Runs at most once per page view no matter how many of
    /// those signals the host forwards.
    pub fn handle_unload(&self) {
        if self.unload_flushed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Unload: flushing active components");

        if let Some(heatmap) = &self.heatmap {
            heatmap.lock().unwrap().flush();
        }
        if let Some(recorder) = &self.recorder {
            if let Ok(mut recorder) = recorder.try_lock() {
                recorder.flush_on_unload();
            }
        }
        if let Some(evaluator) = &self.evaluator {
            evaluator.lock().unwrap().detach();
        }
    }

    /// Stop every sub-component and cancel the periodic tasks.
    pub async fn destroy(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if let Some(recorder) = &self.recorder {
            recorder.lock().await.stop().await;
        }
        if let Some(evaluator) = &self.evaluator {
            evaluator.lock().unwrap().detach();
        }
        if let Some(presentation) = &self.presentation {
            presentation.lock().unwrap().teardown();
        }
        *self.state.lock().unwrap() = TrackerState::Destroyed;
        info!("Tracker destroyed");
    }

    /// Periodic work runs on the ambient runtime when one exists; hosts
    /// without one drive `flush_heatmap` / `drain_uploads` /
    /// `evaluate_timers` themselves.
    fn spawn_tasks(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let mut tasks = self.tasks.lock().unwrap();

        if self.heatmap.is_some() {
            let tracker = Arc::clone(self);
            tasks.push(handle.spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(FLUSH_INTERVAL_SECS));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    tracker.flush_heatmap();
                }
            }));
        }

        if self.recorder.is_some() {
            let tracker = Arc::clone(self);
            tasks.push(handle.spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(DRAIN_INTERVAL_SECS));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    tracker.drain_uploads().await;
                }
            }));
        }

        if self.evaluator.is_some() {
            let tracker = Arc::clone(self);
            tasks.push(handle.spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_millis(EVALUATOR_TICK_MS));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    tracker.evaluate_timers();
                }
            }));
        }
    }
}

/// One sampling roll per visitor, persisted so the decision holds for the
/// lifetime of the browser rather than re-rolling every page view.
fn sampling_included(store: &dyn KeyValueStore, sampling_rate: f64) -> bool {
    let roll = match storage::get_json::<StoredSampling>(store, keys::SAMPLING) {
        Some(stored) => stored.roll,
        None => {
            let roll = rand::thread_rng().gen_range(0.0..100.0);
            storage::set_json(store, keys::SAMPLING, &StoredSampling { roll });
            roll
        }
    };
    roll < sampling_rate
}
