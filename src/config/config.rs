use crate::error::ConfigError;
use crate::telemetry::{Severity, TelemetryKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Backends the collector knows how to route by default
pub const KNOWN_BACKENDS: &[&str] = &["jaeger", "prometheus", "elasticsearch"];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// Upper bound for every interval, timeout and cooldown (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// Complete application configuration
///
/// Every section has defaults, so a file only needs the values it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub logging: LoggingConfig,
    pub alerts: AlertsConfig,
    pub collector: CollectorConfig,
    pub exceptions: ExceptionsConfig,
    pub workload: WorkloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub environment: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "telemetry-hub".to_string(),
            environment: "development".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub evaluation_interval_secs: u64,
    pub cooldown_secs: u64,
    /// Register a webhook handler posting to this URL
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    pub rules: Vec<AlertRuleConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval_secs: 30,
            cooldown_secs: 300,
            webhook_url: None,
            webhook_timeout_secs: 10,
            rules: vec![AlertRuleConfig {
                name: "high_error_rate".to_string(),
                description: "Error rate is above 10%".to_string(),
                metric: "error_rate".to_string(),
                threshold: 0.1,
                severity: Severity::Critical,
            }],
        }
    }
}

impl AlertsConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        i64::try_from(self.cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// One alert rule as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertRuleConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub metric: String,
    pub threshold: f64,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub export_interval_secs: u64,
    pub stats_interval_secs: u64,
    /// Run one last export cycle when shutting down
    pub flush_on_shutdown: bool,
    pub exporters: HashMap<String, ExporterConfig>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let exporters = KNOWN_BACKENDS
            .iter()
            .map(|name| (name.to_string(), ExporterConfig::default()))
            .collect();
        Self {
            export_interval_secs: 10,
            stats_interval_secs: 30,
            flush_on_shutdown: false,
            exporters,
        }
    }
}

impl CollectorConfig {
    pub fn export_interval(&self) -> Duration {
        Duration::from_secs(self.export_interval_secs)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

/// Per-backend exporter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    pub enabled: bool,
    /// POST batches here; without it the batch is only logged
    pub endpoint: Option<String>,
    /// Record kinds shipped to this backend; defaults depend on the backend name
    pub kinds: Option<Vec<TelemetryKind>>,
    pub timeout_secs: u64,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            kinds: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExceptionsConfig {
    pub capture_stack_trace: bool,
    pub max_stack_depth: usize,
    pub group_by_message: bool,
    pub ignore_patterns: Vec<String>,
}

impl Default for ExceptionsConfig {
    fn default() -> Self {
        Self {
            capture_stack_trace: true,
            max_stack_depth: 50,
            group_by_message: true,
            ignore_patterns: Vec::new(),
        }
    }
}

/// Simulated request traffic driving the other components
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    /// Probability in `[0, 1]` that a simulated request fails
    pub error_probability: f64,
    pub services: Vec<String>,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2000,
            error_probability: 0.15,
            services: vec![
                "frontend".to_string(),
                "cartservice".to_string(),
                "productcatalog".to_string(),
                "checkoutservice".to_string(),
            ],
        }
    }
}

impl WorkloadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file and validate it
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    ///
    /// See [`apply_env_overrides_from`](Self::apply_env_overrides_from) for
    /// the recognised variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`
    ///
    /// Recognised keys:
    /// `TELEMETRY_HUB_SERVICE_NAME`, `TELEMETRY_HUB_LOG_LEVEL`,
    /// `TELEMETRY_HUB_ALERT_WEBHOOK_URL`, `TELEMETRY_HUB_EXPORT_INTERVAL_SECS`,
    /// `TELEMETRY_HUB_ERROR_PROBABILITY`, and `JAEGER_URL`, `PROMETHEUS_URL`,
    /// `ELASTICSEARCH_URL` which set the endpoint of the matching exporter.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` if a numeric variable does not parse.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("TELEMETRY_HUB_SERVICE_NAME") {
            self.service.name = name;
        }
        if let Some(level) = lookup("TELEMETRY_HUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(url) = lookup("TELEMETRY_HUB_ALERT_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(url);
        }
        if let Some(raw) = lookup("TELEMETRY_HUB_EXPORT_INTERVAL_SECS") {
            self.collector.export_interval_secs = raw.trim().parse().map_err(|e| {
                ConfigError::ParseError(format!(
                    "TELEMETRY_HUB_EXPORT_INTERVAL_SECS='{}': {}",
                    raw, e
                ))
            })?;
        }
        if let Some(raw) = lookup("TELEMETRY_HUB_ERROR_PROBABILITY") {
            self.workload.error_probability = raw.trim().parse().map_err(|e| {
                ConfigError::ParseError(format!("TELEMETRY_HUB_ERROR_PROBABILITY='{}': {}", raw, e))
            })?;
        }

        for (var, backend) in [
            ("JAEGER_URL", "jaeger"),
            ("PROMETHEUS_URL", "prometheus"),
            ("ELASTICSEARCH_URL", "elasticsearch"),
        ] {
            if let Some(url) = lookup(var) {
                self.collector
                    .exporters
                    .entry(backend.to_string())
                    .or_default()
                    .endpoint = Some(url);
            }
        }

        Ok(())
    }

    /// Check every value for consistency
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first invalid value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.name.trim().is_empty() {
            return Err(invalid("service.name must not be empty"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            )));
        }

        check_duration("alerts.evaluation_interval_secs", self.alerts.evaluation_interval_secs)?;
        check_duration("alerts.webhook_timeout_secs", self.alerts.webhook_timeout_secs)?;
        if self.alerts.cooldown_secs > MAX_DURATION_SECS {
            return Err(invalid(format!(
                "alerts.cooldown_secs must be at most {}",
                MAX_DURATION_SECS
            )));
        }
        if let Some(url) = &self.alerts.webhook_url {
            if !is_http_url(url) {
                return Err(invalid(format!(
                    "alerts.webhook_url '{}' must start with http:// or https://",
                    url
                )));
            }
        }
        for rule in &self.alerts.rules {
            if rule.name.trim().is_empty() {
                return Err(invalid("alert rule name must not be empty"));
            }
            if rule.metric.trim().is_empty() {
                return Err(invalid(format!("alert rule '{}' has no metric", rule.name)));
            }
            if !rule.threshold.is_finite() {
                return Err(invalid(format!(
                    "alert rule '{}' threshold must be a finite number",
                    rule.name
                )));
            }
            if rule.severity == Severity::Debug {
                return Err(invalid(format!(
                    "alert rule '{}' severity must be info, warning, error or critical",
                    rule.name
                )));
            }
        }

        check_duration("collector.export_interval_secs", self.collector.export_interval_secs)?;
        check_duration("collector.stats_interval_secs", self.collector.stats_interval_secs)?;
        for (name, exporter) in &self.collector.exporters {
            check_duration(
                &format!("collector.exporters.{}.timeout_secs", name),
                exporter.timeout_secs,
            )?;
            if let Some(endpoint) = &exporter.endpoint {
                if !is_http_url(endpoint) {
                    return Err(invalid(format!(
                        "collector.exporters.{}.endpoint '{}' must start with http:// or https://",
                        name, endpoint
                    )));
                }
            }
            if exporter.kinds.is_none() && !KNOWN_BACKENDS.contains(&name.as_str()) {
                return Err(invalid(format!(
                    "collector.exporters.{} is not a known backend and must list its kinds",
                    name
                )));
            }
        }

        if self.exceptions.max_stack_depth == 0 {
            return Err(invalid("exceptions.max_stack_depth must be greater than 0"));
        }

        if self.workload.interval_ms == 0 {
            return Err(invalid("workload.interval_ms must be greater than 0"));
        }
        if self.workload.interval_ms / 1000 > MAX_DURATION_SECS {
            return Err(invalid(format!(
                "workload.interval_ms must be at most {}",
                MAX_DURATION_SECS * 1000
            )));
        }
        if !(0.0..=1.0).contains(&self.workload.error_probability) {
            return Err(invalid(format!(
                "workload.error_probability must be between 0 and 1, got {}",
                self.workload.error_probability
            )));
        }
        if self.workload.enabled && self.workload.services.is_empty() {
            return Err(invalid("workload.services must not be empty when the workload is enabled"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Require `1..=MAX_DURATION_SECS`
fn check_duration(field: &str, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(invalid(format!("{} must be greater than 0", field)));
    }
    if secs > MAX_DURATION_SECS {
        return Err(invalid(format!(
            "{} must be at most {}, got {}",
            field, MAX_DURATION_SECS, secs
        )));
    }
    Ok(())
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.alerts.rules.len(), 1);
        assert_eq!(config.alerts.cooldown(), chrono::Duration::minutes(5));
        assert_eq!(config.collector.export_interval(), Duration::from_secs(10));
        assert_eq!(config.collector.stats_interval(), Duration::from_secs(30));
        assert!(!config.collector.flush_on_shutdown);
        assert_eq!(config.collector.exporters.len(), 3);
        assert!(config.exceptions.capture_stack_trace);
        assert_eq!(config.exceptions.max_stack_depth, 50);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [service]
            name = "checkout"

            [alerts]
            cooldown_secs = 60

            [[alerts.rules]]
            name = "slow_checkout"
            metric = "latency_ms"
            threshold = 750.0
            severity = "warning"
            "#,
        )
        .unwrap();

        assert_eq!(config.service.name, "checkout");
        assert_eq!(config.service.environment, "development");
        assert_eq!(config.alerts.cooldown_secs, 60);
        assert_eq!(config.alerts.evaluation_interval_secs, 30);
        assert_eq!(config.alerts.rules.len(), 1);
        assert_eq!(config.alerts.rules[0].severity, Severity::Warning);
        assert_eq!(config.alerts.rules[0].description, "");
        assert_eq!(config.workload.error_probability, 0.15);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [collector]
            export_interval_secs = 5
            flush_on_shutdown = true

            [collector.exporters.jaeger]
            endpoint = "http://localhost:14268/api/traces"

            [collector.exporters.archive]
            kinds = ["logs", "exceptions"]
            "#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.collector.export_interval_secs, 5);
        assert!(config.collector.flush_on_shutdown);
        assert_eq!(
            config.collector.exporters["jaeger"].endpoint.as_deref(),
            Some("http://localhost:14268/api/traces")
        );
        assert_eq!(
            config.collector.exporters["archive"].kinds,
            Some(vec![TelemetryKind::Logs, TelemetryKind::Exceptions])
        );
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/telemetry-hub.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }

    #[test]
    fn test_malformed_toml_is_toml_error() {
        let result = Config::from_toml_str("[alerts\ncooldown_secs = ");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_rejects_zero_intervals() {
        let mut config = Config::default();
        config.alerts.evaluation_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));

        let mut config = Config::default();
        config.collector.export_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversized_durations() {
        let result = Config::from_toml_str("[alerts]\ncooldown_secs = 9223372036854775807");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let mut config = Config::default();
        config.alerts.cooldown_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());
        config.alerts.cooldown_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.alerts.evaluation_interval_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.stats_interval_secs = MAX_DURATION_SECS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.collector.exporters.get_mut("jaeger").unwrap().timeout_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.interval_ms = u64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cooldown_saturates_instead_of_panicking() {
        let mut config = Config::default();
        config.alerts.cooldown_secs = u64::MAX;
        assert_eq!(config.alerts.cooldown(), chrono::Duration::MAX);

        config.alerts.cooldown_secs = i64::MAX as u64;
        assert_eq!(config.alerts.cooldown(), chrono::Duration::MAX);

        config.alerts.cooldown_secs = 0;
        assert_eq!(config.alerts.cooldown(), chrono::Duration::zero());
    }

    #[test]
    fn test_rejects_debug_severity_on_rules() {
        let result = Config::from_toml_str(
            r#"
            [[alerts.rules]]
            name = "noisy"
            metric = "m"
            threshold = 1.0
            severity = "debug"
            "#,
        );
        match result {
            Err(ConfigError::ValidationError(message)) => assert!(message.contains("noisy")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_stack_depth() {
        let mut config = Config::default();
        config.exceptions.max_stack_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_urls_and_probability() {
        let mut config = Config::default();
        config.alerts.webhook_url = Some("ftp://example.com".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.workload.error_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_needs_kinds() {
        let mut config = Config::default();
        config
            .collector
            .exporters
            .insert("archive".to_string(), ExporterConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TELEMETRY_HUB_SERVICE_NAME", "cartservice"),
            ("TELEMETRY_HUB_EXPORT_INTERVAL_SECS", "15"),
            ("TELEMETRY_HUB_ALERT_WEBHOOK_URL", "http://hooks.local/alerts"),
            ("JAEGER_URL", "http://jaeger:14268"),
            ("ELASTICSEARCH_URL", "http://es:9200"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.service.name, "cartservice");
        assert_eq!(config.collector.export_interval_secs, 15);
        assert_eq!(
            config.alerts.webhook_url.as_deref(),
            Some("http://hooks.local/alerts")
        );
        assert_eq!(
            config.collector.exporters["jaeger"].endpoint.as_deref(),
            Some("http://jaeger:14268")
        );
        assert_eq!(config.collector.exporters["prometheus"].endpoint, None);
        assert_eq!(
            config.collector.exporters["elasticsearch"].endpoint.as_deref(),
            Some("http://es:9200")
        );
    }

    #[test]
    fn test_env_override_parse_error() {
        let mut config = Config::default();
        let result = config.apply_env_overrides_from(|key| {
            (key == "TELEMETRY_HUB_EXPORT_INTERVAL_SECS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    // Property: validation accepts exactly the probabilities in [0, 1]
    #[quickcheck]
    fn prop_error_probability_bounds(probability: f64) -> bool {
        let mut config = Config::default();
        config.workload.error_probability = probability;
        let in_range = (0.0..=1.0).contains(&probability);
        config.validate().is_ok() == in_range
    }

    // Property: a serialized config parses back to the same value
    #[quickcheck]
    fn prop_toml_round_trip(export_secs: u16, depth: u8) -> bool {
        let mut config = Config::default();
        config.collector.export_interval_secs = u64::from(export_secs) + 1;
        config.exceptions.max_stack_depth = usize::from(depth) + 1;

        let text = match toml::to_string(&config) {
            Ok(text) => text,
            Err(_) => return false,
        };
        Config::from_toml_str(&text).map(|parsed| parsed == config).unwrap_or(false)
    }
}
