/// Configuration loading, validation and environment overrides
#[allow(clippy::module_inception)]
pub mod config;

pub use config::{
    AlertRuleConfig, AlertsConfig, CollectorConfig, Config, ExceptionsConfig, ExporterConfig,
    LoggingConfig, ServiceConfig, WorkloadConfig, KNOWN_BACKENDS,
};
