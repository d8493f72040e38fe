use crate::telemetry::{Severity, Timestamp};
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether a metric value breaches a rule
pub type AlertPredicate = Arc<dyn Fn(f64) -> bool + Send + Sync>;

/// How a rule compares the current metric value
#[derive(Clone, Default)]
pub enum AlertCondition {
    /// Fires when `value > threshold`
    #[default]
    Threshold,
    /// Fires when the predicate returns `true`; the threshold is informational only
    Custom(AlertPredicate),
}

impl fmt::Debug for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertCondition::Threshold => f.write_str("Threshold"),
            AlertCondition::Custom(_) => f.write_str("Custom(<predicate>)"),
        }
    }
}

/// A named alert rule over a single metric
///
/// Rules are registered once at startup and never change afterwards.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    pub description: String,
    pub metric: String,
    pub severity: Severity,
    pub threshold: f64,
    pub condition: AlertCondition,
}

impl AlertRule {
    /// Create a threshold rule that fires when `metric > threshold`
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        metric: impl Into<String>,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            metric: metric.into(),
            severity,
            threshold,
            condition: AlertCondition::Threshold,
        }
    }

    /// Replace the default comparison with a custom predicate
    pub fn with_condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(f64) -> bool + Send + Sync + 'static,
    {
        self.condition = AlertCondition::Custom(Arc::new(predicate));
        self
    }

    /// Whether `value` breaches this rule
    pub fn is_triggered(&self, value: f64) -> bool {
        match &self.condition {
            AlertCondition::Threshold => value > self.threshold,
            AlertCondition::Custom(predicate) => predicate(value),
        }
    }
}

/// A fired alert, handed to every registered handler
#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub rule: AlertRule,
    pub value: f64,
    pub timestamp: Timestamp,
    pub message: String,
}

impl AlertEvent {
    pub fn new(rule: AlertRule, value: f64, timestamp: Timestamp) -> Self {
        let message = format!(
            "{}: {} (value: {:.2}, threshold: {:.2})",
            rule.name, rule.description, value, rule.threshold
        );
        Self {
            rule,
            value,
            timestamp,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn error_rate_rule() -> AlertRule {
        AlertRule::new(
            "high_error_rate",
            "Error rate is above 10%",
            "error_rate",
            0.1,
            Severity::Critical,
        )
    }

    #[test]
    fn test_threshold_condition_is_strictly_greater() {
        let rule = error_rate_rule();
        assert!(!rule.is_triggered(0.05));
        assert!(!rule.is_triggered(0.1));
        assert!(rule.is_triggered(0.15));
    }

    #[test]
    fn test_custom_condition_overrides_threshold() {
        let rule = error_rate_rule().with_condition(|value| value < 0.01);
        assert!(rule.is_triggered(0.0));
        assert!(!rule.is_triggered(0.5));
        assert_eq!(format!("{:?}", rule.condition), "Custom(<predicate>)");
    }

    #[test]
    fn test_alert_event_message_format() {
        let event = AlertEvent::new(error_rate_rule(), 0.15, Utc::now());
        assert_eq!(
            event.message,
            "high_error_rate: Error rate is above 10% (value: 0.15, threshold: 0.10)"
        );
    }
}
