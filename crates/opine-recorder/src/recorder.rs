//! Recorder lifecycle: session start, consent transitions, event intake
//!
//! The external replay-capture engine (not implemented here) calls
//! `record_event` with already-serialized events; this component batches,
//! compresses and uploads them. Nothing in this file may propagate an error
//! into the host page.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use opine_core::protocol::{
    CaptureSettings, ConsentUpdate, RecordingSettings, StartRecordingRequest,
    StartRecordingResponse,
};
use opine_core::storage::KeyValueStore;
use opine_core::{Clock, DeviceInfo, Transport, VisitorSession};

use crate::buffer::EventBuffer;
use crate::consent::{ConsentGate, RecordingState};
use crate::error::RecorderError;
use crate::uploader::BatchUploader;

pub struct RecorderConfig {
    pub site_id: String,
    pub survey_id: i32,
    /// Local capture defaults; server-issued settings take precedence
    pub capture: CaptureSettings,
}

/// Outcome of starting a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Capture is running
    Recording,
    /// The caller must render a consent prompt
    AwaitingConsent,
    /// Backend sampled this visitor out; the recorder stays inert
    SampledOut,
    /// A stored denial for this survey is still in force
    ConsentDeclined,
}

type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

pub struct Recorder {
    config: RecorderConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    state: RecordingState,
    session_token: Option<String>,
    settings: RecordingSettings,
    buffer: EventBuffer,
    uploader: Option<Arc<BatchUploader>>,
    error_callback: Option<ErrorCallback>,
}

impl Recorder {
    pub fn new(
        config: RecorderConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            config,
            store,
            clock: clock.clone(),
            transport,
            state: RecordingState::Idle,
            session_token: None,
            settings: RecordingSettings::default(),
            buffer: EventBuffer::new(clock),
            uploader: None,
            error_callback: None,
        }
    }

    /// Register a callback surfaced when the capture engine fails
    pub fn on_error(&mut self, callback: ErrorCallback) {
        self.error_callback = Some(callback);
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Upload queue for this recording, once a session exists. Handed out so
    /// periodic drains can run without holding the recorder itself.
    pub fn uploader(&self) -> Option<Arc<BatchUploader>> {
        self.uploader.clone()
    }

    /// Capture policy for the external replay engine: server-issued when a
    /// session is active, local defaults otherwise.
    pub fn capture_settings(&self) -> &CaptureSettings {
        if self.session_token.is_some() {
            &self.settings.capture
        } else {
            &self.config.capture
        }
    }

    /// Start a recording session against the backend.
    ///
    /// A stored consent denial short-circuits before any server session is
    /// created, so a declined recording is never re-created (and therefore
    /// never needs a second deletion request).
    pub async fn start(
        &mut self,
        session: &VisitorSession,
        viewport: (u32, u32),
        user_agent: &str,
    ) -> Result<StartOutcome, RecorderError> {
        if self.gate().stored_decision() == Some(false) {
            debug!(
                "Consent previously denied for survey {}, not recording",
                self.config.survey_id
            );
            return Ok(StartOutcome::ConsentDeclined);
        }

        let device = DeviceInfo::from_user_agent(Some(user_agent));
        let request = StartRecordingRequest {
            site_id: self.config.site_id.clone(),
            session_token: session.token.clone(),
            user_agent: user_agent.to_string(),
            device_type: device.device_type,
            browser: device.browser,
            browser_version: device.browser_version,
            operating_system: device.operating_system,
            viewport_width: viewport.0,
            viewport_height: viewport.1,
        };

        let raw = self
            .transport
            .post_json("/recordings", &serde_json::to_value(&request)?)
            .await?;
        let response: StartRecordingResponse = serde_json::from_value(raw)?;

        if !response.should_record {
            debug!("Visitor sampled out of recording");
            return Ok(StartOutcome::SampledOut);
        }

        self.settings = response.settings.clone();
        self.uploader = Some(Arc::new(BatchUploader::new(
            self.transport.clone(),
            &response.session_token,
        )));
        self.session_token = Some(response.session_token);

        if !self.settings.consent_required {
            self.state = RecordingState::Recording;
            info!("Recording started (no consent required)");
            return Ok(StartOutcome::Recording);
        }

        if self.gate().stored_decision() == Some(true) {
            self.state = RecordingState::Recording;
            info!("Recording started (consent on file)");
            return Ok(StartOutcome::Recording);
        }

        self.state = RecordingState::WaitingConsent;
        Ok(StartOutcome::AwaitingConsent)
    }

    /// Visitor granted consent: persist it, notify the backend
    /// fire-and-forget, and begin capture.
    pub fn give_consent(&mut self) -> Result<(), RecorderError> {
        if self.state != RecordingState::WaitingConsent {
            return Ok(());
        }
        let token = self
            .session_token
            .clone()
            .ok_or(RecorderError::NotStarted)?;

        self.gate().persist(true, self.settings.retention_days);

        let update = ConsentUpdate {
            session_token: token,
            consent: true,
        };
        if let Ok(body) = serde_json::to_value(&update) {
            self.transport.send_beacon("/behavior/consent", body);
        }

        self.state = RecordingState::Recording;
        info!("Consent granted, recording started");
        Ok(())
    }

    /// Visitor denied consent: persist the denial, ask the backend to
    /// delete the unconsented recording (local discard alone is not
    /// sufficient), and reset to idle.
    pub async fn deny_consent(&mut self) -> Result<(), RecorderError> {
        if self.state != RecordingState::WaitingConsent {
            return Ok(());
        }
        let token = self
            .session_token
            .take()
            .ok_or(RecorderError::NotStarted)?;

        self.gate().persist(false, self.settings.retention_days);

        let update = ConsentUpdate {
            session_token: token,
            consent: false,
        };
        if let Err(e) = self
            .transport
            .post_json("/behavior/consent", &serde_json::to_value(&update)?)
            .await
        {
            // Best-effort: the backend reaps unconsented sessions anyway
            warn!("Failed to request recording deletion: {}", e);
        }

        self.uploader = None;
        self.state = RecordingState::Idle;
        info!("Consent denied, recording session discarded");
        Ok(())
    }

    /// Intake for the external capture callback. Ignored unless recording.
    pub fn record_event(&mut self, event: Value) {
        if self.state != RecordingState::Recording {
            return;
        }
        if let Some(batch) = self.buffer.push(event) {
            if let Some(uploader) = &self.uploader {
                uploader.submit(batch);
            }
        }
    }

    /// Record a host-defined custom event
    pub fn track(&mut self, name: &str, properties: Value) {
        let event = json!({
            "type": "custom",
            "name": name,
            "properties": properties,
            "timestamp": self.clock.now().timestamp_millis(),
        });
        self.record_event(event);
    }

    /// Attach a user identity to the replay stream
    pub fn identify(&mut self, user_id: &str, traits: Value) {
        let event = json!({
            "type": "identify",
            "userId": user_id,
            "traits": traits,
            "timestamp": self.clock.now().timestamp_millis(),
        });
        self.record_event(event);
    }

    /// Retry tick for the pending upload queue
    pub async fn drain(&self) {
        if let Some(uploader) = &self.uploader {
            uploader.drain().await;
        }
    }

    /// The capture engine threw on start: revert to idle and surface the
    /// failure to the host without propagating.
    pub fn on_capture_error(&mut self, message: &str) {
        warn!("Capture engine failed: {}", message);
        self.state = RecordingState::Idle;
        if let Some(callback) = &self.error_callback {
            callback(message);
        }
    }

    /// Stop recording, sealing the terminal batch with `isComplete=true`.
    pub async fn stop(&mut self) {
        if self.state == RecordingState::Recording {
            if let Some(batch) = self.buffer.flush(true) {
                if let Some(uploader) = &self.uploader {
                    uploader.submit(batch);
                    uploader.drain().await;
                }
            }
        }
        self.state = RecordingState::Stopped;
    }

    /// Unload path: seal whatever is buffered as the terminal batch and
    /// hand every pending batch to the beacon transport. Returns the number
    /// of batches handed off.
    pub fn flush_on_unload(&mut self) -> usize {
        if self.state == RecordingState::Recording {
            if let Some(batch) = self.buffer.flush(true) {
                if let Some(uploader) = &self.uploader {
                    uploader.submit(batch);
                }
            }
        }
        match &self.uploader {
            Some(uploader) => uploader.flush_beacon(),
            None => 0,
        }
    }

    /// Link a completed survey response to this recording
    pub async fn link_response(&self, response_id: i32) -> Result<(), RecorderError> {
        let token = self.session_token.as_ref().ok_or(RecorderError::NotStarted)?;
        self.transport
            .patch_json(
                &format!("/recordings/{}/events", token),
                &json!({ "responseId": response_id }),
            )
            .await?;
        Ok(())
    }

    fn gate(&self) -> ConsentGate {
        ConsentGate::new(self.config.survey_id, self.store.clone(), self.clock.clone())
    }
}
