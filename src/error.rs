use thiserror::Error;

/// Errors that can occur when an exporter ships a telemetry batch
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Backend '{backend}' rejected batch: {reason}")]
    Rejected { backend: String, reason: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur when an alert handler delivers an alert event
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Webhook returned status {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_error_display_names_backend() {
        let err = ExportError::Rejected {
            backend: "jaeger".to_string(),
            reason: "503 Service Unavailable".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("jaeger"));
        assert!(text.contains("503"));
    }

    #[test]
    fn test_alert_error_webhook_status() {
        let err = AlertError::WebhookStatus {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Webhook returned status 500: boom");
    }

    #[test]
    fn test_config_error_from_toml() {
        let parse: Result<toml::Value, toml::de::Error> = toml::from_str("not = [valid");
        let err: ConfigError = parse.unwrap_err().into();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }
}
