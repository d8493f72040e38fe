use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Default suppression window after a rule fires
pub const DEFAULT_COOLDOWN_SECS: i64 = 300;

/// Tracks when each alert rule last fired
///
/// A rule that fired less than one cooldown window ago is suppressed. Entries
/// are keyed by rule name, so rules sharing a name share their window.
#[derive(Debug)]
pub struct FiredAlertLedger {
    cooldown: Duration,
    last_fired: HashMap<String, DateTime<Utc>>,
}

impl Default for FiredAlertLedger {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

impl FiredAlertLedger {
    /// Create a ledger with the given cooldown window
    ///
    /// # Arguments
    ///
    /// * `cooldown` - How long a fired rule stays suppressed
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_fired: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Check whether `rule` may fire at `now`
    ///
    /// # Returns
    ///
    /// `true` if the rule never fired or its last firing is at least one
    /// cooldown window before `now`
    pub fn can_fire_at(&self, rule: &str, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(rule) {
            Some(&last) => now - last >= self.cooldown,
            None => true,
        }
    }

    /// Record that `rule` fired at `timestamp`
    pub fn record_fired_at(&mut self, rule: &str, timestamp: DateTime<Utc>) {
        self.last_fired.insert(rule.to_string(), timestamp);
    }

    /// Check and record in one step
    ///
    /// # Returns
    ///
    /// `true` if the rule was allowed to fire and the ledger now holds `now`,
    /// `false` if it is still cooling down (the ledger is left untouched)
    pub fn try_fire_at(&mut self, rule: &str, now: DateTime<Utc>) -> bool {
        if !self.can_fire_at(rule, now) {
            return false;
        }
        self.record_fired_at(rule, now);
        true
    }

    pub fn last_fired(&self, rule: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(rule).copied()
    }

    /// Number of rules that have fired at least once
    pub fn len(&self) -> usize {
        self.last_fired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_fired.is_empty()
    }
}
