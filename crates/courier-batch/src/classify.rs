//! Error classification with windowed aggregation
//!
//! Messages are matched against an ordered pattern list; a pattern tags the
//! message with a category and severity, and may additionally group
//! recurring matches inside a sliding time window so that repeated similar
//! errors are summarised instead of flooding the sinks.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use regex::Regex;

use courier_common::NotifyLevel;

/// How a pattern recognizes a message.
pub enum PatternMatcher {
    Regex(Regex),
    Predicate(Box<dyn Fn(&str) -> bool + Send + Sync>),
}

impl PatternMatcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            PatternMatcher::Regex(re) => re.is_match(text),
            PatternMatcher::Predicate(pred) => pred(text),
        }
    }
}

impl std::fmt::Debug for PatternMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternMatcher::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            PatternMatcher::Predicate(_) => f.debug_tuple("Predicate").finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
        };
        write!(f, "{}", s)
    }
}

/// Sliding-window aggregation settings for a pattern.
#[derive(Debug, Clone, Copy)]
pub struct AggregationWindow {
    pub window_ms: u64,
    pub count_threshold: u32,
}

/// One entry in the ordered pattern list.
#[derive(Debug)]
pub struct ErrorPattern {
    pub matcher: PatternMatcher,
    pub category: String,
    pub severity: ErrorSeverity,
    pub aggregation: Option<AggregationWindow>,
}

impl ErrorPattern {
    pub fn regex(
        pattern: Regex,
        category: impl Into<String>,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            matcher: PatternMatcher::Regex(pattern),
            category: category.into(),
            severity,
            aggregation: None,
        }
    }

    pub fn predicate(
        pred: impl Fn(&str) -> bool + Send + Sync + 'static,
        category: impl Into<String>,
        severity: ErrorSeverity,
    ) -> Self {
        Self {
            matcher: PatternMatcher::Predicate(Box::new(pred)),
            category: category.into(),
            severity,
            aggregation: None,
        }
    }

    pub fn with_aggregation(mut self, window_ms: u64, count_threshold: u32) -> Self {
        self.aggregation = Some(AggregationWindow {
            window_ms,
            count_threshold,
        });
        self
    }
}

/// Running count of matches for one `"{category}-{severity}-{level}"` bucket.
#[derive(Debug, Clone)]
struct MessageGroup {
    count: u32,
    first_seen: Instant,
    window_ms: u64,
}

impl MessageGroup {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.first_seen)
    }

    fn expired(&self, now: Instant) -> bool {
        self.age(now).as_millis() as u64 > self.window_ms
    }
}

/// Aggregation details attached to a classification that crossed its
/// window's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationInfo {
    pub count: u32,
    pub age: Duration,
}

/// Result of classifying one message.
#[derive(Debug, Clone)]
pub struct ClassifiedMessage {
    pub text: String,
    pub category: String,
    pub severity: ErrorSeverity,
    pub aggregation: Option<AggregationInfo>,
    pub is_aggregated: bool,
    pub occurrences: u32,
}

impl ClassifiedMessage {
    fn single(text: &str, category: &str, severity: ErrorSeverity) -> Self {
        Self {
            text: text.to_string(),
            category: category.to_string(),
            severity,
            aggregation: None,
            is_aggregated: false,
            occurrences: 1,
        }
    }
}

/// Non-expired aggregation bucket, as reported by [`get_aggregated_errors`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatedGroup {
    pub count: u32,
    pub window_ms: u64,
}

#[derive(Default)]
struct ClassifierState {
    patterns: Vec<ErrorPattern>,
    groups: HashMap<String, MessageGroup>,
}

fn group_key(category: &str, severity: ErrorSeverity, level: NotifyLevel) -> String {
    format!("{}-{}-{}", category, severity, level)
}

/// Pattern registry plus windowed match tracking.
///
/// A process-wide instance backs the module-level functions; standalone
/// instances are useful for isolated pipelines and tests.
#[derive(Default)]
pub struct ErrorClassifier {
    state: Mutex<ClassifierState>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append patterns; earlier patterns win on overlap.
    pub fn add_error_patterns(&self, patterns: Vec<ErrorPattern>) {
        self.state.lock().patterns.extend(patterns);
    }

    pub fn clear_error_patterns(&self) {
        self.state.lock().patterns.clear();
    }

    /// Garbage-collect aggregation buckets whose window has expired. Buckets
    /// still inside their window are kept.
    pub fn clear_error_tracking(&self) {
        let now = Instant::now();
        self.state.lock().groups.retain(|_, group| !group.expired(now));
    }

    /// Wipe patterns and tracking state. Test support.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.patterns.clear();
        state.groups.clear();
    }

    pub fn classify_message(&self, text: &str, level: NotifyLevel) -> ClassifiedMessage {
        self.classify_at(text, level, Instant::now())
    }

    /// Classification against an explicit clock, for deterministic window
    /// behavior in tests.
    pub fn classify_at(&self, text: &str, level: NotifyLevel, now: Instant) -> ClassifiedMessage {
        let mut state = self.state.lock();
        let ClassifierState { patterns, groups } = &mut *state;

        for pattern in patterns.iter() {
            if !pattern.matcher.matches(text) {
                continue;
            }

            let Some(aggregation) = pattern.aggregation else {
                return ClassifiedMessage::single(text, &pattern.category, pattern.severity);
            };

            let key = group_key(&pattern.category, pattern.severity, level);
            let group = groups.entry(key).or_insert_with(|| MessageGroup {
                count: 0,
                first_seen: now,
                window_ms: aggregation.window_ms,
            });

            let age = group.age(now);
            if age.as_millis() as u64 <= aggregation.window_ms {
                group.count += 1;
                if group.count >= aggregation.count_threshold {
                    return ClassifiedMessage {
                        text: text.to_string(),
                        category: pattern.category.clone(),
                        severity: pattern.severity,
                        aggregation: Some(AggregationInfo {
                            count: group.count,
                            age,
                        }),
                        is_aggregated: true,
                        occurrences: group.count,
                    };
                }
                return ClassifiedMessage::single(text, &pattern.category, pattern.severity);
            }

            // Window expired: this match starts a fresh window.
            group.count = 1;
            group.first_seen = now;
            return ClassifiedMessage::single(text, &pattern.category, pattern.severity);
        }

        ClassifiedMessage::single(text, "UNKNOWN", ErrorSeverity::Low)
    }

    /// Buckets still inside their aggregation window, keyed by group key.
    pub fn get_aggregated_errors(&self) -> HashMap<String, AggregatedGroup> {
        self.get_aggregated_errors_at(Instant::now())
    }

    fn get_aggregated_errors_at(&self, now: Instant) -> HashMap<String, AggregatedGroup> {
        self.state
            .lock()
            .groups
            .iter()
            .filter(|(_, group)| !group.expired(now))
            .map(|(key, group)| {
                (
                    key.clone(),
                    AggregatedGroup {
                        count: group.count,
                        window_ms: group.window_ms,
                    },
                )
            })
            .collect()
    }
}

/// Render a classification for sink output.
pub fn format_classified_error(classified: &ClassifiedMessage) -> String {
    if classified.is_aggregated {
        let seconds = classified
            .aggregation
            .map(|info| info.age.as_secs_f64().round() as u64)
            .unwrap_or(10);
        let count = classified
            .aggregation
            .map(|info| info.count)
            .unwrap_or(classified.occurrences);
        return format!(
            "[AGGREGATED] {} similar {} messages in last {}s",
            count, classified.category, seconds
        );
    }
    format!(
        "Message: {}\nCategory: {}\nSeverity: {}",
        classified.text, classified.category, classified.severity
    )
}

// ============================================================================
// Process-wide default instance
// ============================================================================

static GLOBAL: OnceLock<ErrorClassifier> = OnceLock::new();

fn global() -> &'static ErrorClassifier {
    GLOBAL.get_or_init(ErrorClassifier::new)
}

pub fn add_error_patterns(patterns: Vec<ErrorPattern>) {
    global().add_error_patterns(patterns);
}

pub fn clear_error_patterns() {
    global().clear_error_patterns();
}

pub fn clear_error_tracking() {
    global().clear_error_tracking();
}

pub fn classify_message(text: &str, level: NotifyLevel) -> ClassifiedMessage {
    global().classify_message(text, level)
}

pub fn get_aggregated_errors() -> HashMap<String, AggregatedGroup> {
    global().get_aggregated_errors()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pattern() -> ErrorPattern {
        ErrorPattern::regex(
            Regex::new("(?i)test error").unwrap(),
            "TEST_ERROR",
            ErrorSeverity::Low,
        )
    }

    #[test]
    fn test_unmatched_returns_unknown_low() {
        let classifier = ErrorClassifier::new();
        let classified = classifier.classify_message("nothing to see", NotifyLevel::Error);
        assert_eq!(classified.category, "UNKNOWN");
        assert_eq!(classified.severity, ErrorSeverity::Low);
        assert!(!classified.is_aggregated);
        assert_eq!(classified.occurrences, 1);
    }

    #[test]
    fn test_first_matching_pattern_wins() {
        let classifier = ErrorClassifier::new();
        classifier.add_error_patterns(vec![
            ErrorPattern::predicate(|t| t.contains("db"), "DATABASE", ErrorSeverity::High),
            ErrorPattern::predicate(|t| t.contains("db"), "SHADOWED", ErrorSeverity::Low),
        ]);

        let classified = classifier.classify_message("db timeout", NotifyLevel::Error);
        assert_eq!(classified.category, "DATABASE");
        assert_eq!(classified.severity, ErrorSeverity::High);
    }

    #[test]
    fn test_no_aggregation_config_is_never_aggregated() {
        let classifier = ErrorClassifier::new();
        classifier.add_error_patterns(vec![test_pattern()]);

        for _ in 0..5 {
            let classified = classifier.classify_message("TEST ERROR here", NotifyLevel::Error);
            assert!(!classified.is_aggregated);
            assert_eq!(classified.occurrences, 1);
        }
    }

    #[test]
    fn test_format_aggregated() {
        let classified = ClassifiedMessage {
            text: "test error".to_string(),
            category: "TEST_ERROR".to_string(),
            severity: ErrorSeverity::Low,
            aggregation: Some(AggregationInfo {
                count: 7,
                age: Duration::from_millis(4_600),
            }),
            is_aggregated: true,
            occurrences: 7,
        };
        assert_eq!(
            format_classified_error(&classified),
            "[AGGREGATED] 7 similar TEST_ERROR messages in last 5s"
        );
    }

    #[test]
    fn test_format_aggregated_defaults_to_ten_seconds() {
        let classified = ClassifiedMessage {
            text: "test error".to_string(),
            category: "TEST_ERROR".to_string(),
            severity: ErrorSeverity::Low,
            aggregation: None,
            is_aggregated: true,
            occurrences: 3,
        };
        assert_eq!(
            format_classified_error(&classified),
            "[AGGREGATED] 3 similar TEST_ERROR messages in last 10s"
        );
    }

    #[test]
    fn test_format_single() {
        let classified = ClassifiedMessage::single("boom", "UNKNOWN", ErrorSeverity::Low);
        assert_eq!(
            format_classified_error(&classified),
            "Message: boom\nCategory: UNKNOWN\nSeverity: low"
        );
    }

    #[test]
    fn test_group_key_shape() {
        assert_eq!(
            group_key("TEST_ERROR", ErrorSeverity::Low, NotifyLevel::Error),
            "TEST_ERROR-low-error"
        );
    }
}
