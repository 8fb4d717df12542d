//! Calendar-window context rules.
//!
//! Classification is an ordered scan over rules; the first rule whose
//! day/hour window contains the local wall-clock time wins. No matching
//! rule means the conservative "unknown" context. The operator can pin a
//! label explicitly; `auto` clears the pin.

use std::collections::VecDeque;

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::context::{CategoryFilter, Context, Intensity};
use crate::error::ContextError;
use crate::store::StateDir;

/// Persisted document name, owned by the classifier.
const CONTEXT_DOC: &str = "context_log.json";

/// How many transition records the rolling log keeps.
const MAX_TRANSITIONS: usize = 50;

/// Day-of-week filter for a rule window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayFilter {
    Any,
    Weekdays,
    Weekends,
}

impl DayFilter {
    fn matches(self, now: &DateTime<Local>) -> bool {
        let weekend = matches!(now.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun);
        match self {
            Self::Any => true,
            Self::Weekdays => !weekend,
            Self::Weekends => weekend,
        }
    }
}

/// One calendar-window rule mapping a time window to a policy bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRule {
    pub label: String,
    pub days: DayFilter,
    /// Window start hour, inclusive.
    pub start_hour: u32,
    /// Window end hour, exclusive. A start past the end wraps midnight.
    pub end_hour: u32,
    pub max_concurrency: usize,
    pub categories: CategoryFilter,
    pub intensity: Intensity,
}

impl ClassifierRule {
    fn matches(&self, now: &DateTime<Local>) -> bool {
        if !self.days.matches(now) {
            return false;
        }
        let hour = now.hour();
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    fn to_context(&self, detected_at: DateTime<Utc>) -> Context {
        Context {
            label: self.label.clone(),
            detected_at,
            max_concurrency: self.max_concurrency.max(1),
            allowed_categories: self.categories.clone(),
            intensity: self.intensity,
        }
    }
}

/// A recorded context change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Option<String>,
    pub to: String,
    pub explicit: bool,
    pub timestamp: DateTime<Utc>,
}

/// Persisted classifier state: the rolling log plus any operator pin.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ClassifierState {
    transitions: VecDeque<TransitionRecord>,
    override_label: Option<String>,
}

/// Infers the current policy context from time and day.
pub struct ContextClassifier {
    rules: Vec<ClassifierRule>,
    state: RwLock<ClassifierState>,
    store: StateDir,
}

impl ContextClassifier {
    /// Create a classifier with the default rule set, restoring any
    /// persisted transition log and operator pin.
    pub fn new(store: StateDir) -> Result<Self, ContextError> {
        Self::with_rules(store, default_rules())
    }

    /// Create a classifier with an explicit rule set.
    pub fn with_rules(store: StateDir, rules: Vec<ClassifierRule>) -> Result<Self, ContextError> {
        let state = store.load::<ClassifierState>(CONTEXT_DOC)?.unwrap_or_default();
        Ok(Self {
            rules,
            state: RwLock::new(state),
            store,
        })
    }

    /// Pure classification: first matching rule, or the unknown context.
    ///
    /// Does not consult the operator pin and does not log transitions.
    pub fn classify(&self, now: DateTime<Local>) -> Context {
        let detected_at = now.with_timezone(&Utc);
        self.rules
            .iter()
            .find(|rule| rule.matches(&now))
            .map(|rule| rule.to_context(detected_at))
            .unwrap_or_else(|| Context::unknown(detected_at))
    }

    /// Detect the current context, honoring an operator pin and recording
    /// any label change into the rolling transition log.
    pub async fn detect(&self, now: DateTime<Local>) -> Result<Context, ContextError> {
        let mut state = self.state.write().await;

        let context = match &state.override_label {
            Some(label) => self
                .rule_context(label, now.with_timezone(&Utc))
                // A pinned label always names a rule; set_explicit enforces it.
                .unwrap_or_else(|| Context::unknown(now.with_timezone(&Utc))),
            None => self.classify(now),
        };

        let changed = state
            .transitions
            .back()
            .map(|t| t.to != context.label)
            .unwrap_or(true);
        if changed {
            let from = state.transitions.back().map(|t| t.to.clone());
            tracing::info!(from = ?from, to = %context.label, "context transition");
            push_transition(
                &mut state.transitions,
                TransitionRecord {
                    from,
                    to: context.label.clone(),
                    explicit: false,
                    timestamp: context.detected_at,
                },
            );
            self.store.save(CONTEXT_DOC, &*state)?;
        }

        Ok(context)
    }

    /// Pin the context to a rule label, or clear the pin with `auto`.
    ///
    /// Returns the context now in effect. Unknown labels are rejected;
    /// the label space is closed, like the action space.
    pub async fn set_explicit(
        &self,
        label: &str,
        now: DateTime<Local>,
    ) -> Result<Context, ContextError> {
        let mut state = self.state.write().await;
        let detected_at = now.with_timezone(&Utc);

        let (new_override, context) = if label.eq_ignore_ascii_case("auto") {
            (None, self.classify(now))
        } else {
            let context = self
                .rule_context(label, detected_at)
                .ok_or_else(|| ContextError::UnknownLabel {
                    label: label.to_string(),
                })?;
            (Some(context.label.clone()), context)
        };

        let from = state.transitions.back().map(|t| t.to.clone());
        tracing::info!(from = ?from, to = %context.label, "explicit context override");
        push_transition(
            &mut state.transitions,
            TransitionRecord {
                from,
                to: context.label.clone(),
                explicit: true,
                timestamp: detected_at,
            },
        );
        state.override_label = new_override;
        self.store.save(CONTEXT_DOC, &*state)?;

        Ok(context)
    }

    /// Recent transitions, oldest first.
    pub async fn transitions(&self) -> Vec<TransitionRecord> {
        self.state.read().await.transitions.iter().cloned().collect()
    }

    /// The currently pinned label, if any.
    pub async fn override_label(&self) -> Option<String> {
        self.state.read().await.override_label.clone()
    }

    /// Labels of the configured rules.
    pub fn labels(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.label.as_str()).collect()
    }

    fn rule_context(&self, label: &str, detected_at: DateTime<Utc>) -> Option<Context> {
        self.rules
            .iter()
            .find(|r| r.label.eq_ignore_ascii_case(label))
            .map(|r| r.to_context(detected_at))
    }
}

fn push_transition(log: &mut VecDeque<TransitionRecord>, record: TransitionRecord) {
    log.push_back(record);
    while log.len() > MAX_TRANSITIONS {
        log.pop_front();
    }
}

/// The built-in rule set.
///
/// Overnight is the high-autonomy window: nobody is around, so the pool
/// may run wide and deep. Weekday midday allows moderate background work.
/// The evening window is kept narrow and light since the human is likely
/// at the machine.
pub fn default_rules() -> Vec<ClassifierRule> {
    vec![
        ClassifierRule {
            label: "overnight".to_string(),
            days: DayFilter::Any,
            start_hour: 22,
            end_hour: 6,
            max_concurrency: 3,
            categories: CategoryFilter::All,
            intensity: Intensity::Deep,
        },
        ClassifierRule {
            label: "workday".to_string(),
            days: DayFilter::Weekdays,
            start_hour: 9,
            end_hour: 17,
            max_concurrency: 2,
            categories: CategoryFilter::Only(
                ["maintenance", "bugfix", "research", "data_entry"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            intensity: Intensity::Standard,
        },
        ClassifierRule {
            label: "evening".to_string(),
            days: DayFilter::Any,
            start_hour: 18,
            end_hour: 21,
            max_concurrency: 1,
            categories: CategoryFilter::Only(
                ["maintenance", "data_entry"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            intensity: Intensity::Light,
        },
    ]
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn local(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, m, d, h, 30, 0).unwrap()
    }

    fn classifier() -> ContextClassifier {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();
        // Leak the tempdir so the store outlives this helper in tests.
        std::mem::forget(dir);
        ContextClassifier::new(store).unwrap()
    }

    // 2026-08-03 is a Monday; 2026-08-08 a Saturday.

    #[test]
    fn test_overnight_wraps_midnight() {
        let c = classifier();
        assert_eq!(c.classify(local(2026, 8, 3, 23)).label, "overnight");
        assert_eq!(c.classify(local(2026, 8, 3, 2)).label, "overnight");
        assert_eq!(c.classify(local(2026, 8, 3, 5)).label, "overnight");
    }

    #[test]
    fn test_weekday_midday_is_workday() {
        let c = classifier();
        let ctx = c.classify(local(2026, 8, 3, 11));
        assert_eq!(ctx.label, "workday");
        assert_eq!(ctx.max_concurrency, 2);
        assert!(ctx.allows_category("bugfix"));
        assert!(!ctx.allows_category("publishing"));
    }

    #[test]
    fn test_weekend_midday_falls_through_to_unknown() {
        let c = classifier();
        let ctx = c.classify(local(2026, 8, 8, 11));
        assert_eq!(ctx.label, "unknown");
        assert_eq!(ctx.max_concurrency, 1);
    }

    #[test]
    fn test_evening_window() {
        let c = classifier();
        let ctx = c.classify(local(2026, 8, 3, 19));
        assert_eq!(ctx.label, "evening");
        assert_eq!(ctx.max_concurrency, 1);
        assert_eq!(ctx.intensity, Intensity::Light);
    }

    #[test]
    fn test_gap_hours_are_unknown() {
        let c = classifier();
        assert_eq!(c.classify(local(2026, 8, 3, 7)).label, "unknown");
        assert_eq!(c.classify(local(2026, 8, 3, 21)).label, "unknown");
    }

    #[tokio::test]
    async fn test_detect_logs_transitions_once() {
        let c = classifier();

        c.detect(local(2026, 8, 3, 11)).await.unwrap();
        c.detect(local(2026, 8, 3, 12)).await.unwrap(); // same label, no new record
        c.detect(local(2026, 8, 3, 19)).await.unwrap();

        let log = c.transitions().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].to, "workday");
        assert_eq!(log[1].to, "evening");
        assert_eq!(log[1].from.as_deref(), Some("workday"));
        assert!(!log[1].explicit);
    }

    #[tokio::test]
    async fn test_explicit_override_and_clear() {
        let c = classifier();
        let noon = local(2026, 8, 3, 12);

        let pinned = c.set_explicit("overnight", noon).await.unwrap();
        assert_eq!(pinned.label, "overnight");
        assert_eq!(pinned.max_concurrency, 3);

        // The pin wins over classification.
        let detected = c.detect(noon).await.unwrap();
        assert_eq!(detected.label, "overnight");

        let cleared = c.set_explicit("auto", noon).await.unwrap();
        assert_eq!(cleared.label, "workday");
        assert!(c.override_label().await.is_none());

        let log = c.transitions().await;
        assert!(log.iter().any(|t| t.explicit));
    }

    #[tokio::test]
    async fn test_unknown_label_rejected() {
        let c = classifier();
        let result = c.set_explicit("hyperdrive", local(2026, 8, 3, 12)).await;
        assert!(matches!(
            result,
            Err(ContextError::UnknownLabel { .. })
        ));
    }

    #[tokio::test]
    async fn test_transition_log_is_bounded() {
        let c = classifier();
        for i in 0..(MAX_TRANSITIONS + 20) {
            // Alternate labels so every call records a transition.
            let label = if i % 2 == 0 { "overnight" } else { "evening" };
            c.set_explicit(label, local(2026, 8, 3, 12)).await.unwrap();
        }
        assert_eq!(c.transitions().await.len(), MAX_TRANSITIONS);
    }

    #[tokio::test]
    async fn test_override_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateDir::open(dir.path()).unwrap();

        let c = ContextClassifier::new(store.clone()).unwrap();
        c.set_explicit("overnight", local(2026, 8, 3, 12))
            .await
            .unwrap();
        drop(c);

        let reloaded = ContextClassifier::new(store).unwrap();
        assert_eq!(reloaded.override_label().await.as_deref(), Some("overnight"));
    }
}
