//! Noise reduction and payload sanitization for classified records.

use faultline_core::{ErrorCategory, ExceptionRecord, UserImpact};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace};

/// Appended where a stack trace was cut at the configured length.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// The generic message browsers substitute for cross-origin script errors.
const CROSS_ORIGIN_PLACEHOLDER: &str = "Script error.";

/// What a matching rule does with the record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterAction {
    /// Never report records matching this rule.
    Drop,
    /// Keep a `rate` fraction of matching records, chosen per call.
    Throttle { rate: f64 },
}

/// One entry in the ordered rule list. Rules are evaluated in insertion
/// order and the first match wins, so precedence is ordering.
pub struct FilterRule {
    pub name: String,
    pub action: FilterAction,
    matcher: Box<dyn Fn(&ExceptionRecord) -> bool + Send + Sync>,
}

impl FilterRule {
    pub fn new(
        name: impl Into<String>,
        action: FilterAction,
        matcher: impl Fn(&ExceptionRecord) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            matcher: Box::new(matcher),
        }
    }

    fn matches(&self, record: &ExceptionRecord) -> bool {
        (self.matcher)(record)
    }
}

/// Decides whether a record is worth sending and strips anything unsafe or
/// oversized before transmission.
///
/// The throttle draw uses an injectable seedable RNG so tests can replay
/// sampling decisions deterministically; production construction seeds from
/// OS entropy.
pub struct ExceptionFilter {
    rules: Mutex<Vec<FilterRule>>,
    enabled: AtomicBool,
    max_stack_length: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl ExceptionFilter {
    pub fn new(enabled: bool, max_stack_length: usize) -> Self {
        Self::with_rng(enabled, max_stack_length, StdRng::from_entropy())
    }

    pub fn with_rng(enabled: bool, max_stack_length: usize, rng: StdRng) -> Self {
        Self {
            rules: Mutex::new(Self::default_rules()),
            enabled: AtomicBool::new(enabled),
            max_stack_length: AtomicUsize::new(max_stack_length),
            rng: Mutex::new(rng),
        }
    }

    /// The built-in rule set, in evaluation order.
    fn default_rules() -> Vec<FilterRule> {
        vec![
            // Cross-origin placeholders carry no diagnostic value at all.
            FilterRule::new("script-error", FilterAction::Drop, |record| {
                record.error.message == CROSS_ORIGIN_PLACEHOLDER
            }),
            FilterRule::new(
                "network-error",
                FilterAction::Throttle { rate: 0.1 },
                |record| record.classification.category == ErrorCategory::Network,
            ),
            FilterRule::new(
                "low-impact",
                FilterAction::Throttle { rate: 0.2 },
                |record| record.classification.user_impact == UserImpact::Low,
            ),
        ]
    }

    /// Whether `record` should continue toward delivery.
    pub fn should_keep(&self, record: &ExceptionRecord) -> bool {
        if !self.enabled.load(Ordering::Relaxed) {
            return true;
        }

        let rules = self.rules.lock().unwrap();
        for rule in rules.iter() {
            if !rule.matches(record) {
                continue;
            }
            return match rule.action {
                FilterAction::Drop => {
                    debug!(record_id = %record.id, rule = %rule.name, "Dropping record");
                    false
                }
                FilterAction::Throttle { rate } => {
                    let kept = self.rng.lock().unwrap().gen::<f64>() < rate;
                    trace!(
                        record_id = %record.id,
                        rule = %rule.name,
                        rate,
                        kept,
                        "Throttle draw"
                    );
                    kept
                }
            };
        }

        true
    }

    /// Produce the record actually transmitted: overlong stack traces are
    /// truncated and context fields mirroring persisted browser storage are
    /// removed. Copy-on-write; the input record is untouched, so retries
    /// always operate on the sanitized copy.
    pub fn sanitize(&self, record: &ExceptionRecord) -> ExceptionRecord {
        let max_stack = self.max_stack_length.load(Ordering::Relaxed);
        let mut sanitized = record.clone();

        if let Some(stack) = &sanitized.error.stack {
            if stack.chars().count() > max_stack {
                let mut truncated: String = stack.chars().take(max_stack).collect();
                truncated.push_str(TRUNCATION_MARKER);
                trace!(
                    record_id = %record.id,
                    original_chars = stack.chars().count(),
                    max_stack,
                    "Truncated stack trace"
                );
                sanitized.error.stack = Some(truncated);
            }
        }

        sanitized
            .context
            .retain(|key, _| !mirrors_browser_storage(key));

        sanitized
    }

    /// Append a rule. Later additions evaluate after earlier ones, so
    /// callers needing precedence must order additions accordingly.
    pub fn add_rule(&self, rule: FilterRule) {
        self.rules.lock().unwrap().push(rule);
    }

    /// Remove the rule named `name`. Returns whether a rule was removed.
    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.lock().unwrap();
        let before = rules.len();
        rules.retain(|rule| rule.name != name);
        rules.len() < before
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn set_max_stack_length(&self, max_stack_length: usize) {
        self.max_stack_length
            .store(max_stack_length, Ordering::Relaxed);
    }
}

/// Context keys that mirror persisted browser storage or cookies must never
/// leave the client.
fn mirrors_browser_storage(key: &str) -> bool {
    key == "localStorage" || key == "sessionStorage" || key.to_lowercase().contains("cookie")
}
