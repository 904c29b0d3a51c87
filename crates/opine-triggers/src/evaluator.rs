//! Local evaluation of survey trigger rules
//!
//! Triggers are armed once per page view. Arming runs the eligibility
//! pipeline (percentage sampling, cooldown, show-once, page targeting);
//! anything that survives waits for its condition: a point in time, a scroll
//! depth, an exit gesture, or a watched element. Each armed trigger fires at
//! most once and is disarmed when it does.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use opine_core::protocol::{SurveyTrigger, TriggerKind};
use opine_core::storage::{self, keys, KeyValueStore};
use opine_core::{scroll_percent, Clock, CompiledTarget, PageEvent, PageTarget};

/// Intersection ratio a watched element must reach when the rule does not
/// specify one
pub const DEFAULT_VISIBILITY_THRESHOLD: f64 = 0.5;

/// Ceiling on time-based delays (24h); rule values are server-supplied and
/// must not be able to overflow date arithmetic
const MAX_DELAY_MS: i64 = 86_400_000;
/// Ceiling on cooldown windows (10 years)
const MAX_COOLDOWN_DAYS: i64 = 3_650;

/// A DOM observation the embedding layer must set up on the evaluator's
/// behalf. Observed activity comes back as `PageEvent::ElementClick` /
/// `PageEvent::ElementVisible` carrying the same selector.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchRequest {
    Click { selector: String },
    Visibility { selector: String, threshold: f64 },
}

enum Condition {
    At(DateTime<Utc>),
    ScrollDepth(f64),
    ExitIntent,
    ElementClick(String),
    ElementVisible { selector: String, threshold: f64 },
}

struct ArmedTrigger {
    trigger: SurveyTrigger,
    condition: Condition,
}

pub struct TriggerEvaluator {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    armed: Vec<ArmedTrigger>,
}

impl TriggerEvaluator {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        triggers: Vec<SurveyTrigger>,
        page_targets: &[PageTarget],
        page_path: &str,
    ) -> Self {
        Self::with_rng(
            store,
            clock,
            triggers,
            page_targets,
            page_path,
            StdRng::from_entropy(),
        )
    }

    /// As `new`, with an injected sampling source.
    pub fn with_rng(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        triggers: Vec<SurveyTrigger>,
        page_targets: &[PageTarget],
        page_path: &str,
        mut rng: StdRng,
    ) -> Self {
        let targets = compile_targets(page_targets);
        let shown: HashSet<i32> = storage::get_json::<Vec<i32>>(store.as_ref(), keys::TRIGGERS_SHOWN)
            .unwrap_or_default()
            .into_iter()
            .collect();
        let cooldowns: HashMap<String, i64> =
            storage::get_json(store.as_ref(), keys::TRIGGER_COOLDOWNS).unwrap_or_default();
        let now = clock.now();

        let armed = triggers
            .into_iter()
            .filter_map(|trigger| {
                arm(&trigger, &targets, page_path, &shown, &cooldowns, now, &mut rng)
                    .map(|condition| ArmedTrigger { trigger, condition })
            })
            .collect();

        Self {
            store,
            clock,
            armed,
        }
    }

    pub fn armed_len(&self) -> usize {
        self.armed.len()
    }

    /// The element observations the embedding layer must install for the
    /// currently armed triggers.
    pub fn watch_requests(&self) -> Vec<WatchRequest> {
        self.armed
            .iter()
            .filter_map(|armed| match &armed.condition {
                Condition::ElementClick(selector) => Some(WatchRequest::Click {
                    selector: selector.clone(),
                }),
                Condition::ElementVisible {
                    selector,
                    threshold,
                } => Some(WatchRequest::Visibility {
                    selector: selector.clone(),
                    threshold: *threshold,
                }),
                _ => None,
            })
            .collect()
    }

    /// Evaluate an observed page event; returns the triggers it fired.
    pub fn handle_event(&mut self, event: &PageEvent) -> Vec<SurveyTrigger> {
        match event {
            PageEvent::Scroll {
                scroll_top,
                doc_height,
                viewport_height,
            } => match scroll_percent(*scroll_top, *doc_height, *viewport_height) {
                Some(pct) => self.take_matching(|condition| {
                    matches!(condition, Condition::ScrollDepth(depth) if pct >= *depth)
                }),
                None => Vec::new(),
            },
            PageEvent::MouseOut { client_y } if *client_y <= 0.0 => {
                self.take_matching(|condition| matches!(condition, Condition::ExitIntent))
            }
            PageEvent::ElementClick { selector } => self.take_matching(|condition| {
                matches!(condition, Condition::ElementClick(watched) if watched == selector)
            }),
            PageEvent::ElementVisible { selector, ratio } => self.take_matching(|condition| {
                matches!(
                    condition,
                    Condition::ElementVisible { selector: watched, threshold }
                        if watched == selector && *ratio >= *threshold
                )
            }),
            _ => Vec::new(),
        }
    }

    /// Evaluate time-based conditions against the current clock.
    pub fn tick(&mut self) -> Vec<SurveyTrigger> {
        let now = self.clock.now();
        self.take_matching(|condition| matches!(condition, Condition::At(at) if *at <= now))
    }

    /// Persist that a trigger's survey was displayed, feeding the show-once
    /// set and cooldown map future page views consult.
    pub fn mark_fired(&self, trigger: &SurveyTrigger) {
        if trigger.show_once {
            let mut shown: Vec<i32> =
                storage::get_json(self.store.as_ref(), keys::TRIGGERS_SHOWN).unwrap_or_default();
            if !shown.contains(&trigger.id) {
                shown.push(trigger.id);
                storage::set_json(self.store.as_ref(), keys::TRIGGERS_SHOWN, &shown);
            }
        }

        if let Some(days) = trigger.cooldown_days {
            let mut cooldowns: HashMap<String, i64> =
                storage::get_json(self.store.as_ref(), keys::TRIGGER_COOLDOWNS)
                    .unwrap_or_default();
            let days = days.clamp(0, MAX_COOLDOWN_DAYS);
            let expires_at = (self.clock.now() + Duration::days(days)).timestamp_millis();
            cooldowns.insert(trigger.id.to_string(), expires_at);
            storage::set_json(self.store.as_ref(), keys::TRIGGER_COOLDOWNS, &cooldowns);
        }
    }

    /// Disarm everything, used on page teardown.
    pub fn detach(&mut self) {
        self.armed.clear();
    }

    fn take_matching<F>(&mut self, pred: F) -> Vec<SurveyTrigger>
    where
        F: Fn(&Condition) -> bool,
    {
        let (fired, kept): (Vec<ArmedTrigger>, Vec<ArmedTrigger>) = self
            .armed
            .drain(..)
            .partition(|armed| pred(&armed.condition));
        self.armed = kept;
        fired.into_iter().map(|armed| armed.trigger).collect()
    }
}

fn compile_targets(page_targets: &[PageTarget]) -> HashMap<i32, CompiledTarget> {
    let mut targets = HashMap::new();
    for target in page_targets {
        match CompiledTarget::compile(target) {
            Ok(compiled) => {
                targets.insert(target.id, compiled);
            }
            Err(e) => {
                warn!("Skipping page target {} ('{}'): {}", target.id, target.pattern, e);
            }
        }
    }
    targets
}

/// Run the eligibility pipeline for one trigger; `Some(condition)` arms it.
fn arm(
    trigger: &SurveyTrigger,
    targets: &HashMap<i32, CompiledTarget>,
    page_path: &str,
    shown: &HashSet<i32>,
    cooldowns: &HashMap<String, i64>,
    now: DateTime<Utc>,
    rng: &mut StdRng,
) -> Option<Condition> {
    if let Some(pct) = trigger.percentage_show {
        let roll: f64 = rng.gen_range(0.0..100.0);
        if roll >= pct {
            debug!("Trigger {} sampled out ({:.1} >= {})", trigger.id, roll, pct);
            return None;
        }
    }

    if let Some(expires_at) = cooldowns.get(&trigger.id.to_string()) {
        if *expires_at > now.timestamp_millis() {
            debug!("Trigger {} in cooldown", trigger.id);
            return None;
        }
    }

    if trigger.show_once && shown.contains(&trigger.id) {
        debug!("Trigger {} already shown", trigger.id);
        return None;
    }

    if let Some(target_id) = trigger.page_target_id {
        match targets.get(&target_id) {
            Some(compiled) => {
                if !compiled.matches(page_path) {
                    return None;
                }
            }
            None => {
                debug!(
                    "Trigger {} references unknown page target {}",
                    trigger.id, target_id
                );
                return None;
            }
        }
    }

    build_condition(trigger, now)
}

fn build_condition(trigger: &SurveyTrigger, now: DateTime<Utc>) -> Option<Condition> {
    match trigger.trigger_type {
        TriggerKind::PageLoad => {
            let delay = trigger.display_delay_ms.unwrap_or(0).clamp(0, MAX_DELAY_MS);
            Some(Condition::At(now + Duration::milliseconds(delay)))
        }
        TriggerKind::TimeOnPage => {
            let seconds = trigger.trigger_value.unwrap_or(0.0).max(0.0);
            let delay = ((seconds * 1000.0) as i64).clamp(0, MAX_DELAY_MS);
            Some(Condition::At(now + Duration::milliseconds(delay)))
        }
        TriggerKind::ScrollDepth => {
            Some(Condition::ScrollDepth(trigger.trigger_value.unwrap_or(50.0)))
        }
        TriggerKind::ExitIntent => Some(Condition::ExitIntent),
        TriggerKind::ElementClick => {
            let selector = watched_selector(trigger)?;
            Some(Condition::ElementClick(selector))
        }
        TriggerKind::ElementVisible => {
            let selector = watched_selector(trigger)?;
            let threshold = trigger
                .trigger_value
                .map(|pct| (pct / 100.0).clamp(0.0, 1.0))
                .unwrap_or(DEFAULT_VISIBILITY_THRESHOLD);
            Some(Condition::ElementVisible {
                selector,
                threshold,
            })
        }
    }
}

fn watched_selector(trigger: &SurveyTrigger) -> Option<String> {
    match &trigger.trigger_selector {
        Some(selector) if valid_selector(selector) => Some(selector.clone()),
        Some(selector) => {
            warn!(
                "Trigger {} has invalid selector '{}', skipping",
                trigger.id, selector
            );
            None
        }
        None => {
            warn!("Trigger {} requires a selector but has none", trigger.id);
            None
        }
    }
}

/// Syntactic sanity check only; the embedding layer finds out for real when
/// it queries the DOM.
fn valid_selector(selector: &str) -> bool {
    let trimmed = selector.trim();
    !trimmed.is_empty() && !trimmed.contains(['{', '}', ';'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use opine_core::page_match::MatchType;
    use opine_core::protocol::DisplayMode;
    use opine_core::{ManualClock, MemoryStore};

    fn trigger(id: i32, kind: TriggerKind) -> SurveyTrigger {
        SurveyTrigger {
            id,
            survey_id: id * 10,
            trigger_type: kind,
            trigger_value: None,
            trigger_selector: None,
            display_mode: DisplayMode::Modal,
            display_position: None,
            display_delay_ms: None,
            show_once: false,
            cooldown_days: None,
            percentage_show: None,
            page_target_id: None,
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::new(Utc::now())),
            }
        }

        fn evaluator(&self, triggers: Vec<SurveyTrigger>) -> TriggerEvaluator {
            self.evaluator_on(triggers, &[], "/")
        }

        fn evaluator_on(
            &self,
            triggers: Vec<SurveyTrigger>,
            targets: &[PageTarget],
            path: &str,
        ) -> TriggerEvaluator {
            TriggerEvaluator::with_rng(
                self.store.clone(),
                self.clock.clone(),
                triggers,
                targets,
                path,
                StdRng::seed_from_u64(42),
            )
        }
    }

    #[test]
    fn test_page_load_fires_after_delay() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.display_delay_ms = Some(3000);
        let mut evaluator = h.evaluator(vec![rule]);

        assert!(evaluator.tick().is_empty());

        h.clock.advance(Duration::milliseconds(3000));
        let fired = evaluator.tick();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].id, 1);

        // Disarmed after firing
        assert!(evaluator.tick().is_empty());
    }

    #[test]
    fn test_time_on_page_uses_trigger_value_seconds() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::TimeOnPage);
        rule.trigger_value = Some(30.0);
        let mut evaluator = h.evaluator(vec![rule]);

        h.clock.advance(Duration::seconds(29));
        assert!(evaluator.tick().is_empty());

        h.clock.advance(Duration::seconds(1));
        assert_eq!(evaluator.tick().len(), 1);
    }

    #[test]
    fn test_scroll_depth_fires_at_threshold() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::ScrollDepth);
        rule.trigger_value = Some(50.0);
        let mut evaluator = h.evaluator(vec![rule]);

        // 40% of the scrollable range
        let fired = evaluator.handle_event(&PageEvent::Scroll {
            scroll_top: 400.0,
            doc_height: 2000.0,
            viewport_height: 1000.0,
        });
        assert!(fired.is_empty());

        let fired = evaluator.handle_event(&PageEvent::Scroll {
            scroll_top: 600.0,
            doc_height: 2000.0,
            viewport_height: 1000.0,
        });
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_exit_intent_fires_on_top_edge_only() {
        let h = Harness::new();
        let mut evaluator = h.evaluator(vec![trigger(1, TriggerKind::ExitIntent)]);

        let fired = evaluator.handle_event(&PageEvent::MouseOut { client_y: 400.0 });
        assert!(fired.is_empty());

        let fired = evaluator.handle_event(&PageEvent::MouseOut { client_y: -2.0 });
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_element_click_watch_and_fire() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::ElementClick);
        rule.trigger_selector = Some("#signup".to_string());
        let mut evaluator = h.evaluator(vec![rule]);

        assert_eq!(
            evaluator.watch_requests(),
            vec![WatchRequest::Click {
                selector: "#signup".to_string()
            }]
        );

        let fired = evaluator.handle_event(&PageEvent::ElementClick {
            selector: "#other".to_string(),
        });
        assert!(fired.is_empty());

        let fired = evaluator.handle_event(&PageEvent::ElementClick {
            selector: "#signup".to_string(),
        });
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_element_visible_needs_threshold_ratio() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::ElementVisible);
        rule.trigger_selector = Some(".pricing-table".to_string());
        let mut evaluator = h.evaluator(vec![rule]);

        let fired = evaluator.handle_event(&PageEvent::ElementVisible {
            selector: ".pricing-table".to_string(),
            ratio: 0.3,
        });
        assert!(fired.is_empty());

        let fired = evaluator.handle_event(&PageEvent::ElementVisible {
            selector: ".pricing-table".to_string(),
            ratio: 0.6,
        });
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_invalid_selector_never_arms() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::ElementClick);
        rule.trigger_selector = Some("div { color: red }".to_string());
        let evaluator = h.evaluator(vec![rule]);

        assert_eq!(evaluator.armed_len(), 0);
        assert!(evaluator.watch_requests().is_empty());
    }

    #[test]
    fn test_percentage_show_zero_never_arms() {
        let h = Harness::new();
        for seed in 0..20 {
            let mut rule = trigger(1, TriggerKind::PageLoad);
            rule.percentage_show = Some(0.0);
            let evaluator = TriggerEvaluator::with_rng(
                h.store.clone(),
                h.clock.clone(),
                vec![rule],
                &[],
                "/",
                StdRng::seed_from_u64(seed),
            );
            assert_eq!(evaluator.armed_len(), 0);
        }
    }

    #[test]
    fn test_percentage_show_hundred_always_arms() {
        let h = Harness::new();
        for seed in 0..20 {
            let mut rule = trigger(1, TriggerKind::PageLoad);
            rule.percentage_show = Some(100.0);
            let evaluator = TriggerEvaluator::with_rng(
                h.store.clone(),
                h.clock.clone(),
                vec![rule],
                &[],
                "/",
                StdRng::seed_from_u64(seed),
            );
            assert_eq!(evaluator.armed_len(), 1);
        }
    }

    #[test]
    fn test_show_once_blocks_future_page_views() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.show_once = true;

        let mut evaluator = h.evaluator(vec![rule.clone()]);
        let fired = evaluator.tick();
        assert_eq!(fired.len(), 1);
        evaluator.mark_fired(&fired[0]);

        // Simulated reload: a fresh evaluator over the same durable store
        let next = h.evaluator(vec![rule]);
        assert_eq!(next.armed_len(), 0);
    }

    #[test]
    fn test_cooldown_blocks_until_expiry() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.cooldown_days = Some(7);

        let mut evaluator = h.evaluator(vec![rule.clone()]);
        let fired = evaluator.tick();
        evaluator.mark_fired(&fired[0]);

        let blocked = h.evaluator(vec![rule.clone()]);
        assert_eq!(blocked.armed_len(), 0);

        h.clock.advance(Duration::days(8));
        let allowed = h.evaluator(vec![rule]);
        assert_eq!(allowed.armed_len(), 1);
    }

    #[test]
    fn test_extreme_display_delay_is_capped() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.display_delay_ms = Some(i64::MAX);
        let mut evaluator = h.evaluator(vec![rule]);

        assert_eq!(evaluator.armed_len(), 1);
        assert!(evaluator.tick().is_empty());

        h.clock.advance(Duration::milliseconds(MAX_DELAY_MS));
        assert_eq!(evaluator.tick().len(), 1);
    }

    #[test]
    fn test_extreme_cooldown_days_is_capped() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.cooldown_days = Some(i64::MAX);

        let mut evaluator = h.evaluator(vec![rule.clone()]);
        let fired = evaluator.tick();
        assert_eq!(fired.len(), 1);
        evaluator.mark_fired(&fired[0]);

        let blocked = h.evaluator(vec![rule.clone()]);
        assert_eq!(blocked.armed_len(), 0);

        h.clock.advance(Duration::days(MAX_COOLDOWN_DAYS + 1));
        let allowed = h.evaluator(vec![rule]);
        assert_eq!(allowed.armed_len(), 1);
    }

    #[test]
    fn test_page_target_scopes_trigger() {
        let h = Harness::new();
        let target = PageTarget {
            id: 5,
            name: "Blog".to_string(),
            pattern: "/blog/*".to_string(),
            match_type: MatchType::Glob,
        };
        let mut rule = trigger(1, TriggerKind::PageLoad);
        rule.page_target_id = Some(5);

        let on_blog = h.evaluator_on(
            vec![rule.clone()],
            std::slice::from_ref(&target),
            "/blog/post-1",
        );
        assert_eq!(on_blog.armed_len(), 1);

        let on_pricing =
            h.evaluator_on(vec![rule.clone()], std::slice::from_ref(&target), "/pricing");
        assert_eq!(on_pricing.armed_len(), 0);

        // Unknown target id never arms
        rule.page_target_id = Some(99);
        let unknown = h.evaluator_on(vec![rule], std::slice::from_ref(&target), "/blog/post-1");
        assert_eq!(unknown.armed_len(), 0);
    }

    #[test]
    fn test_detach_disarms_everything() {
        let h = Harness::new();
        let mut evaluator = h.evaluator(vec![
            trigger(1, TriggerKind::ExitIntent),
            trigger(2, TriggerKind::PageLoad),
        ]);
        assert_eq!(evaluator.armed_len(), 2);

        evaluator.detach();
        assert_eq!(evaluator.armed_len(), 0);
        assert!(evaluator
            .handle_event(&PageEvent::MouseOut { client_y: -1.0 })
            .is_empty());
    }

    #[test]
    fn test_non_scrollable_page_never_fires_scroll_depth() {
        let h = Harness::new();
        let mut rule = trigger(1, TriggerKind::ScrollDepth);
        rule.trigger_value = Some(50.0);
        let mut evaluator = h.evaluator(vec![rule]);

        let fired = evaluator.handle_event(&PageEvent::Scroll {
            scroll_top: 0.0,
            doc_height: 800.0,
            viewport_height: 1000.0,
        });
        assert!(fired.is_empty());
        assert_eq!(evaluator.armed_len(), 1);
    }
}
