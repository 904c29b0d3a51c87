//! Wire contracts between the SDK and its backend
//!
//! Only the shapes the client depends on are modeled here; everything is
//! camelCase on the wire to match the backend's JSON conventions.

use serde::{Deserialize, Serialize};

use crate::page_match::PageTarget;

/// Session-init request, `POST /init`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    pub site_id: String,
    pub visitor_id: String,
    pub session_token: Option<String>,
    pub page_url: String,
    pub page_path: String,
    pub page_title: String,
    pub referrer: String,
    pub user_agent: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub timezone: String,
    pub language: String,
}

/// Session-init response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub session_token: String,
    pub config: FeatureConfig,
    #[serde(default)]
    pub triggers: Vec<SurveyTrigger>,
    #[serde(default)]
    pub page_targets: Vec<PageTarget>,
}

/// Per-site feature enablement and sampling rate (percentage, 0-100)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureConfig {
    #[serde(default)]
    pub recording_enabled: bool,
    #[serde(default)]
    pub heatmaps_enabled: bool,
    #[serde(default)]
    pub surveys_enabled: bool,
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,
}

fn default_sampling_rate() -> f64 {
    100.0
}

/// Canonical trigger type.
///
/// The wire spelling is `TIME_ON_PAGE`; older configs used `TIME_DELAY` for
/// the same behavior, accepted here as an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    PageLoad,
    #[serde(alias = "TIME_DELAY")]
    TimeOnPage,
    ScrollDepth,
    ExitIntent,
    ElementClick,
    ElementVisible,
}

/// Which container the survey renders in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayMode {
    Modal,
    SlideIn,
    Banner,
    Inline,
    Embedded,
}

/// Anchor position for slide-in panels and banners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisplayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    Top,
    Bottom,
}

/// Declarative survey-trigger rule, fetched read-only from the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveyTrigger {
    pub id: i32,
    pub survey_id: i32,
    pub trigger_type: TriggerKind,
    /// Seconds for TIME_ON_PAGE, percentage for SCROLL_DEPTH
    pub trigger_value: Option<f64>,
    pub trigger_selector: Option<String>,
    pub display_mode: DisplayMode,
    pub display_position: Option<DisplayPosition>,
    /// Delay before a PAGE_LOAD trigger fires, in milliseconds
    pub display_delay_ms: Option<i64>,
    #[serde(default)]
    pub show_once: bool,
    pub cooldown_days: Option<i64>,
    /// Sampling percentage, 0-100; absent means always eligible
    pub percentage_show: Option<f64>,
    pub page_target_id: Option<i32>,
}

/// Start a recording session, `POST /recordings`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingRequest {
    pub site_id: String,
    pub session_token: String,
    pub user_agent: String,
    pub device_type: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub operating_system: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

/// Recording settings issued by the backend with the session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSettings {
    #[serde(default)]
    pub consent_required: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default)]
    pub capture: CaptureSettings,
}

fn default_retention_days() -> i64 {
    30
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            consent_required: false,
            retention_days: default_retention_days(),
            capture: CaptureSettings::default(),
        }
    }
}

/// Capture policy forwarded to the external replay engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSettings {
    pub mouse_move_sample_ms: u64,
    pub scroll_sample_ms: u64,
    /// Record only the final value of text inputs, never raw keystrokes
    pub mask_text_inputs: bool,
    pub capture_canvas: bool,
    /// Inline stylesheets and fonts for faithful replay
    pub inline_stylesheets: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            mouse_move_sample_ms: 50,
            scroll_sample_ms: 500,
            mask_text_inputs: true,
            capture_canvas: false,
            inline_stylesheets: true,
        }
    }
}

/// Recording-session response; `should_record=false` means sampled out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub session_token: String,
    pub should_record: bool,
    #[serde(default)]
    pub settings: RecordingSettings,
}

/// Consent decision, `POST /behavior/consent`. `consent=false` instructs the
/// backend to delete the unconsented recording server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentUpdate {
    pub session_token: String,
    pub consent: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trigger_kind_canonical_spelling() {
        let kind: TriggerKind = serde_json::from_value(json!("TIME_ON_PAGE")).unwrap();
        assert_eq!(kind, TriggerKind::TimeOnPage);

        let out = serde_json::to_value(TriggerKind::TimeOnPage).unwrap();
        assert_eq!(out, json!("TIME_ON_PAGE"));
    }

    #[test]
    fn test_trigger_kind_legacy_alias() {
        let kind: TriggerKind = serde_json::from_value(json!("TIME_DELAY")).unwrap();
        assert_eq!(kind, TriggerKind::TimeOnPage);
    }

    #[test]
    fn test_init_response_defaults() {
        let response: InitResponse = serde_json::from_value(json!({
            "sessionToken": "tok",
            "config": {"recordingEnabled": true}
        }))
        .unwrap();

        assert!(response.config.recording_enabled);
        assert!(!response.config.surveys_enabled);
        assert_eq!(response.config.sampling_rate, 100.0);
        assert!(response.triggers.is_empty());
        assert!(response.page_targets.is_empty());
    }

    #[test]
    fn test_trigger_deserializes_from_backend_shape() {
        let trigger: SurveyTrigger = serde_json::from_value(json!({
            "id": 7,
            "surveyId": 3,
            "triggerType": "SCROLL_DEPTH",
            "triggerValue": 60.0,
            "triggerSelector": null,
            "displayMode": "SLIDE_IN",
            "displayPosition": "BOTTOM_RIGHT",
            "displayDelayMs": null,
            "showOnce": true,
            "cooldownDays": 7,
            "percentageShow": 50.0,
            "pageTargetId": null
        }))
        .unwrap();

        assert_eq!(trigger.trigger_type, TriggerKind::ScrollDepth);
        assert_eq!(trigger.display_mode, DisplayMode::SlideIn);
        assert_eq!(
            trigger.display_position,
            Some(DisplayPosition::BottomRight)
        );
        assert!(trigger.show_once);
    }

    #[test]
    fn test_capture_settings_defaults() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.mouse_move_sample_ms, 50);
        assert_eq!(settings.scroll_sample_ms, 500);
        assert!(settings.mask_text_inputs);
        assert!(!settings.capture_canvas);
        assert!(settings.inline_stylesheets);
    }
}
