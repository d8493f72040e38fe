/// Metric store, rule evaluation and alert dispatch
pub mod alert_manager;
pub mod clock;
pub mod cooldown;
pub mod handlers;
pub mod rules;

pub use alert_manager::AlertManager;
pub use clock::{Clock, SystemClock};
pub use cooldown::{FiredAlertLedger, DEFAULT_COOLDOWN_SECS};
pub use handlers::{AlertHandler, ConsoleHandler, WebhookHandler};
pub use rules::{AlertCondition, AlertEvent, AlertPredicate, AlertRule};
