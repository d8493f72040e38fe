use crate::alerts::AlertEvent;
use crate::error::AlertError;
use crate::telemetry::Severity;
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Trait for alert delivery targets
///
/// Handlers are invoked sequentially, in registration order, on the
/// evaluation task. A failing handler never prevents later handlers from
/// receiving the same event.
pub trait AlertHandler: Send + Sync {
    /// Short name used in log lines
    fn name(&self) -> &str;

    fn handle<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>>;
}

/// Logs every alert at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleHandler;

impl ConsoleHandler {
    pub fn new() -> Self {
        Self
    }

    /// Render an alert the way it appears in the log
    pub fn format(event: &AlertEvent) -> String {
        format!(
            "ALERT [{}] {} | {} | value={:.2} threshold={:.2} at {} | {}",
            event.rule.severity,
            event.rule.name,
            event.rule.description,
            event.value,
            event.rule.threshold,
            event.timestamp.to_rfc3339(),
            event.message
        )
    }
}

impl AlertHandler for ConsoleHandler {
    fn name(&self) -> &str {
        "console"
    }

    fn handle<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            warn!("{}", Self::format(event));
            Ok(())
        })
    }
}

/// JSON body posted by [`WebhookHandler`]
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    alert: &'a str,
    description: &'a str,
    metric: &'a str,
    severity: Severity,
    value: f64,
    threshold: f64,
    timestamp: String,
    message: &'a str,
}

impl<'a> From<&'a AlertEvent> for WebhookPayload<'a> {
    fn from(event: &'a AlertEvent) -> Self {
        Self {
            alert: &event.rule.name,
            description: &event.rule.description,
            metric: &event.rule.metric,
            severity: event.rule.severity,
            value: event.value,
            threshold: event.rule.threshold,
            timestamp: event.timestamp.to_rfc3339(),
            message: &event.message,
        }
    }
}

/// Posts every alert as JSON to a fixed URL
pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    /// Create a webhook handler
    ///
    /// # Arguments
    ///
    /// * `url` - Endpoint receiving the POST
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns `AlertError::HttpError` if the HTTP client cannot be built
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AlertError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl AlertHandler for WebhookHandler {
    fn name(&self) -> &str {
        "webhook"
    }

    fn handle<'a>(
        &'a self,
        event: &'a AlertEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), AlertError>> + Send + 'a>> {
        Box::pin(async move {
            let payload = WebhookPayload::from(event);
            let response = self.client.post(&self.url).json(&payload).send().await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AlertError::WebhookStatus {
                    status: status.as_u16(),
                    body,
                });
            }

            debug!("Delivered alert '{}' to {}", event.rule.name, self.url);
            Ok(())
        })
    }
}
