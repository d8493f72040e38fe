use crate::config::ExporterConfig;
use crate::error::ExportError;
use crate::telemetry::{TelemetryBatch, TelemetryKind};
use log::{debug, info};
use reqwest::Client;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Trait for backends receiving exported batches
///
/// Implementations must report failures through the returned error and never
/// panic; the collector logs and counts failures but does not retry them.
pub trait Exporter: Send + Sync {
    /// Backend name used in logs and statistics
    fn name(&self) -> &str;

    /// Record kinds this backend accepts
    fn kinds(&self) -> &[TelemetryKind];

    /// Ship a batch already filtered to [`kinds`](Self::kinds)
    fn export<'a>(
        &'a self,
        batch: &'a TelemetryBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>>;
}

/// Kinds routed to a backend when its configuration does not list any
///
/// Unknown backends receive nothing.
pub fn default_kinds(backend: &str) -> Vec<TelemetryKind> {
    match backend {
        "jaeger" => vec![TelemetryKind::Spans],
        "prometheus" => vec![TelemetryKind::Metrics],
        "elasticsearch" => vec![TelemetryKind::Logs, TelemetryKind::Exceptions],
        _ => Vec::new(),
    }
}

/// Build the exporter described by a configuration entry
///
/// Entries with an endpoint post over HTTP; entries without one only log.
///
/// # Errors
///
/// Returns `ExportError::HttpError` if the HTTP client cannot be built
pub fn build_exporter(
    name: &str,
    config: &ExporterConfig,
) -> Result<Box<dyn Exporter>, ExportError> {
    let kinds = config
        .kinds
        .clone()
        .unwrap_or_else(|| default_kinds(name));

    match &config.endpoint {
        Some(endpoint) => Ok(Box::new(HttpExporter::new(
            name,
            endpoint.clone(),
            kinds,
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Box::new(LoggingExporter::new(name, kinds))),
    }
}

/// Logs what it would ship without contacting the backend
#[derive(Debug, Clone)]
pub struct LoggingExporter {
    name: String,
    kinds: Vec<TelemetryKind>,
}

impl LoggingExporter {
    pub fn new(name: impl Into<String>, kinds: Vec<TelemetryKind>) -> Self {
        Self {
            name: name.into(),
            kinds,
        }
    }
}

impl Exporter for LoggingExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> &[TelemetryKind] {
        &self.kinds
    }

    fn export<'a>(
        &'a self,
        batch: &'a TelemetryBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>> {
        Box::pin(async move {
            let counts = self
                .kinds
                .iter()
                .map(|kind| format!("{}={}", kind, batch.count(*kind)))
                .collect::<Vec<_>>()
                .join(" ");
            info!("Exporting to {}: {}", self.name, counts);
            Ok(())
        })
    }
}

/// Posts each batch as JSON to a backend endpoint
pub struct HttpExporter {
    name: String,
    endpoint: String,
    kinds: Vec<TelemetryKind>,
    client: Client,
}

impl HttpExporter {
    /// Create an HTTP exporter
    ///
    /// # Errors
    ///
    /// Returns `ExportError::HttpError` if the HTTP client cannot be built
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        kinds: Vec<TelemetryKind>,
        timeout: Duration,
    ) -> Result<Self, ExportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            kinds,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Exporter for HttpExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> &[TelemetryKind] {
        &self.kinds
    }

    fn export<'a>(
        &'a self,
        batch: &'a TelemetryBatch,
    ) -> Pin<Box<dyn Future<Output = Result<(), ExportError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.client.post(&self.endpoint).json(batch).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ExportError::Rejected {
                    backend: self.name.clone(),
                    reason: format!("{}: {}", status, body),
                });
            }

            debug!(
                "Posted {} record(s) to {} at {}",
                batch.len(),
                self.name,
                self.endpoint
            );
            Ok(())
        })
    }
}
