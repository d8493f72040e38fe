use crate::alerts::{AlertEvent, AlertHandler, AlertRule, Clock, FiredAlertLedger, SystemClock};
use crate::ticker::periodic;
use log::{debug, error, info};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the manager guards with its single lock
#[derive(Default)]
struct AlertState {
    rules: Vec<AlertRule>,
    handlers: Vec<Arc<dyn AlertHandler>>,
    metrics: HashMap<String, f64>,
    ledger: FiredAlertLedger,
}

/// Holds the latest value of every metric and fires alert rules against them
///
/// Producers update metrics from any thread. A periodic evaluation pass
/// compares every rule with the current value of its metric and dispatches an
/// [`AlertEvent`] to all handlers, at most once per rule per cooldown window.
/// Handlers run outside the lock so a slow webhook never blocks producers.
pub struct AlertManager {
    state: RwLock<AlertState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AlertManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("AlertManager")
            .field("rule_count", &state.rules.len())
            .field("handler_count", &state.handlers.len())
            .field("metric_count", &state.metrics.len())
            .field("cooldown", &state.ledger.cooldown())
            .finish()
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::with_ledger(FiredAlertLedger::default(), Arc::new(SystemClock))
    }
}

impl AlertManager {
    /// Create an alert manager using the system clock
    ///
    /// # Arguments
    ///
    /// * `cooldown` - Minimum time between two firings of the same rule
    pub fn new(cooldown: chrono::Duration) -> Self {
        Self::with_clock(cooldown, Arc::new(SystemClock))
    }

    /// Create an alert manager with an injected clock
    pub fn with_clock(cooldown: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self::with_ledger(FiredAlertLedger::new(cooldown), clock)
    }

    fn with_ledger(ledger: FiredAlertLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(AlertState {
                ledger,
                ..AlertState::default()
            }),
            clock,
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, AlertState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AlertState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an alert rule
    ///
    /// Names are not checked for uniqueness; rules sharing a name share a
    /// cooldown window.
    pub fn register_alert(&self, rule: AlertRule) {
        info!(
            "Registered alert rule '{}' on metric '{}' (threshold {:.2}, severity {})",
            rule.name, rule.metric, rule.threshold, rule.severity
        );
        self.write_state().rules.push(rule);
    }

    /// Register a handler; handlers are invoked in registration order
    pub fn register_handler(&self, handler: Arc<dyn AlertHandler>) {
        debug!("Registered alert handler '{}'", handler.name());
        self.write_state().handlers.push(handler);
    }

    /// Set a metric to `value`, replacing any previous value
    pub fn update_metric(&self, name: &str, value: f64) {
        self.write_state().metrics.insert(name.to_string(), value);
    }

    /// Add `delta` to a metric, treating a missing metric as zero
    pub fn increment_counter(&self, name: &str, delta: f64) {
        let mut state = self.write_state();
        *state.metrics.entry(name.to_string()).or_insert(0.0) += delta;
    }

    /// Record a histogram observation
    ///
    /// Only the latest observation is kept, so this behaves like
    /// [`update_metric`](Self::update_metric).
    pub fn record_histogram(&self, name: &str, value: f64) {
        self.update_metric(name, value);
    }

    pub fn get_metric(&self, name: &str) -> Option<f64> {
        self.read_state().metrics.get(name).copied()
    }

    /// Snapshot of every metric value
    pub fn metrics(&self) -> HashMap<String, f64> {
        self.read_state().metrics.clone()
    }

    /// Remove every metric value
    ///
    /// Rules, handlers and cooldown state are kept.
    pub fn reset(&self) {
        self.write_state().metrics.clear();
    }

    pub fn rule_count(&self) -> usize {
        self.read_state().rules.len()
    }

    pub fn handler_count(&self) -> usize {
        self.read_state().handlers.len()
    }

    /// Run one evaluation pass over every rule
    ///
    /// Rules whose metric has never been written are skipped. Rules still in
    /// their cooldown window are suppressed silently.
    ///
    /// # Returns
    ///
    /// Number of alert events dispatched during this pass
    pub async fn evaluate(&self) -> usize {
        let (rules, metrics) = {
            let state = self.read_state();
            (state.rules.clone(), state.metrics.clone())
        };

        let mut dispatched = 0;
        for rule in rules {
            let Some(&value) = metrics.get(&rule.metric) else {
                continue;
            };
            if rule.is_triggered(value) && self.fire(rule, value).await {
                dispatched += 1;
            }
        }
        dispatched
    }

    async fn fire(&self, rule: AlertRule, value: f64) -> bool {
        let now = self.clock.now();
        let handlers = {
            let mut state = self.write_state();
            if !state.ledger.try_fire_at(&rule.name, now) {
                debug!("Alert '{}' suppressed by cooldown", rule.name);
                return false;
            }
            state.handlers.clone()
        };

        let event = AlertEvent::new(rule, value, now);
        info!("Alert fired: {}", event.message);

        for handler in &handlers {
            if let Err(e) = handler.handle(&event).await {
                error!(
                    "Alert handler '{}' failed for rule '{}': {}",
                    handler.name(),
                    event.rule.name,
                    e
                );
            }
        }
        true
    }

    /// Evaluate rules every `interval` until `cancel` fires
    ///
    /// The first evaluation happens one interval after the call. Ticks that
    /// fall behind are skipped, so evaluations never overlap.
    pub async fn start(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = periodic(interval);
        info!("Alert evaluation started (interval {:?})", interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Alert evaluation stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let dispatched = self.evaluate().await;
                    if dispatched > 0 {
                        debug!("Evaluation dispatched {} alert(s)", dispatched);
                    }
                }
            }
        }
    }
}
