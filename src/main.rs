use anyhow::Context;
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use telemetry_hub::alerts::{AlertManager, AlertRule, ConsoleHandler, WebhookHandler};
use telemetry_hub::collector::TelemetryCollector;
use telemetry_hub::config::Config;
use telemetry_hub::error::ConfigError;
use telemetry_hub::exceptions::ExceptionTracker;
use telemetry_hub::workload::SampleWorkload;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Command-line arguments for the telemetry hub
#[derive(Parser)]
#[command(
    name = "telemetry-hub",
    about = "Telemetry aggregation and alerting core",
    long_about = "Buffers spans, logs, metrics and exceptions from a simulated workload, \
                  exports them in periodic batches, tracks and groups exceptions, and fires \
                  threshold alerts with per-rule cooldown."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        help = "Run for a fixed number of seconds, then shut down"
    )]
    duration_seconds: Option<u64>,
}

impl Cli {
    /// Validate the CLI arguments
    ///
    /// # Returns
    ///
    /// `Ok(())` if all arguments are valid, `Err(String)` with error message otherwise
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
            // Missing files fall back to defaults in TelemetryHub::load_config
        }

        if self.duration_seconds == Some(0) {
            return Err("Duration must be at least one second".to_string());
        }

        Ok(())
    }

    /// Convert config path to string safely, handling non-UTF-8 paths
    ///
    /// # Returns
    ///
    /// `Ok(Some(path_str))` if config is provided and valid UTF-8,
    /// `Ok(None)` if no config provided,
    /// `Err(String)` if config path contains invalid UTF-8
    fn config_path_str(&self) -> Result<Option<&str>, String> {
        match &self.config {
            Some(path) => match path.to_str() {
                Some(path_str) => Ok(Some(path_str)),
                None => Err(format!(
                    "Configuration file path contains invalid UTF-8 characters: {}",
                    path.display()
                )),
            },
            None => Ok(None),
        }
    }
}

/// Wires the alert manager, collector, exception tracker and workload together
pub struct TelemetryHub {
    config: Config,
    alerts: Arc<AlertManager>,
    collector: Arc<TelemetryCollector>,
    tracker: Arc<ExceptionTracker>,
    workload: Arc<SampleWorkload>,
}

impl TelemetryHub {
    /// Load configuration, falling back to defaults
    ///
    /// A missing file yields defaults with a warning; an invalid file is
    /// reported and defaults are used. Environment overrides are applied
    /// afterwards and must leave a valid configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the environment overrides cannot be parsed or
    /// produce an invalid configuration
    pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
        let mut config = match config_path {
            Some(path) => {
                info!("Loading configuration from: {}", path);
                match Config::from_file(std::path::Path::new(path)) {
                    Ok(config) => config,
                    Err(ConfigError::ReadError(_)) => {
                        warn!(
                            "Configuration file '{}' not found or unreadable, using defaults",
                            path
                        );
                        Config::default()
                    }
                    Err(e) => {
                        error!("Configuration error in '{}': {}", path, e);
                        warn!("Using default configuration due to invalid config file");
                        Config::default()
                    }
                }
            }
            None => {
                info!("Using default configuration");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Build every component from configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let alerts = Arc::new(AlertManager::new(config.alerts.cooldown()));
        alerts.register_handler(Arc::new(ConsoleHandler::new()));
        if let Some(url) = &config.alerts.webhook_url {
            let webhook = WebhookHandler::new(
                url.clone(),
                Duration::from_secs(config.alerts.webhook_timeout_secs),
            )
            .context("failed to create webhook alert handler")?;
            alerts.register_handler(Arc::new(webhook));
        }
        for rule in &config.alerts.rules {
            alerts.register_alert(AlertRule::new(
                rule.name.clone(),
                rule.description.clone(),
                rule.metric.clone(),
                rule.threshold,
                rule.severity,
            ));
        }
        info!(
            "Alert manager initialized with {} rule(s) and {} handler(s)",
            alerts.rule_count(),
            alerts.handler_count()
        );

        let collector = Arc::new(
            TelemetryCollector::from_config(&config.collector)
                .context("failed to create telemetry exporters")?,
        );

        let tracker = Arc::new(ExceptionTracker::from_config(&config.exceptions));
        info!("Exception tracking initialized");

        let workload = Arc::new(SampleWorkload::new(
            config.workload.clone(),
            Arc::clone(&alerts),
            Arc::clone(&collector),
            Arc::clone(&tracker),
        ));

        Ok(Self {
            config,
            alerts,
            collector,
            tracker,
            workload,
        })
    }

    /// Run every periodic task until `cancel` fires, then wait for them to stop
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if self.config.alerts.enabled {
            let alerts = Arc::clone(&self.alerts);
            let interval = self.config.alerts.evaluation_interval();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                alerts.start(interval, cancel).await;
            }));
        } else {
            info!("Alert evaluation disabled");
        }

        {
            let collector = Arc::clone(&self.collector);
            let export_interval = self.config.collector.export_interval();
            let stats_interval = self.config.collector.stats_interval();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                collector
                    .start(export_interval, stats_interval, cancel)
                    .await;
            }));
        }

        if self.config.workload.enabled {
            let workload = Arc::clone(&self.workload);
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                workload.run(cancel).await;
            }));
        } else {
            info!("Sample workload disabled");
        }

        for task in tasks {
            if let Err(e) = task.await {
                error!("Background task failed: {}", e);
            }
        }
    }

    /// Log a final summary of what the hub saw
    pub fn report(&self) {
        let mut groups: Vec<(String, usize)> =
            self.tracker.get_exception_groups().into_iter().collect();
        groups.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        info!(
            "Processed {} request(s), {} exception(s) in {} group(s)",
            self.workload.request_count(),
            self.tracker.exception_count(),
            groups.len()
        );
        for (fingerprint, count) in groups {
            info!("  {} x{}", fingerprint, count);
        }
        self.collector.stats().log();
    }
}

/// Initialize `env_logger`, honouring `RUST_LOG` when it is set
fn init_logging(verbose: bool) {
    if verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace")).init();
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Apply `logging.level` from the configuration unless `RUST_LOG` decides
fn apply_config_log_level(config: &Config) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match LevelFilter::from_str(&config.logging.level) {
        Ok(level) => log::set_max_level(level),
        Err(_) => warn!("Unknown log level '{}', keeping info", config.logging.level),
    }
}

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let cli = Cli::parse();

    init_logging(cli.verbose);

    info!("Starting telemetry hub");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config_path = match cli.config_path_str() {
        Ok(path) => path,
        Err(e) => {
            error!("Invalid configuration path: {}", e);
            std::process::exit(1);
        }
    };

    let config = match TelemetryHub::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    apply_config_log_level(&config);

    info!(
        "Service '{}' ({})",
        config.service.name, config.service.environment
    );

    let hub = match TelemetryHub::new(config) {
        Ok(hub) => hub,
        Err(e) => {
            error!("Failed to initialize telemetry hub: {:#}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();

    // Set up signal handling for graceful shutdown (SIGINT)
    let signal_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        signal_token.cancel();
    }) {
        error!("Failed to install SIGINT handler: {}", e);
        std::process::exit(1);
    }

    if let Some(seconds) = cli.duration_seconds {
        let timer_token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            info!("Run duration of {}s elapsed, shutting down", seconds);
            timer_token.cancel();
        });
        info!("Telemetry hub is running for {}s. Press Ctrl+C to stop early.", seconds);
    } else {
        info!("Telemetry hub is running. Press Ctrl+C to stop.");
    }

    hub.run(cancel).await;
    hub.report();

    info!("Telemetry hub shutdown complete");
}
