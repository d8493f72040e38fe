/// Error types for the telemetry hub
pub mod error;

/// Telemetry record types shared by all components
pub mod telemetry;

/// Span handles used for trace correlation
pub mod trace_context;

/// Alert manager, rules and handlers
pub mod alerts;

/// Telemetry collector and exporters
pub mod collector;

/// Exception tracking and grouping
pub mod exceptions;

/// Configuration management
pub mod config;

/// Periodic task scheduling
pub mod ticker;

/// Simulated request workload
pub mod workload;

// Re-export commonly used types
pub use alerts::{AlertEvent, AlertHandler, AlertManager, AlertRule};
pub use collector::{Exporter, TelemetryCollector};
pub use error::{AlertError, ConfigError, ExportError};
pub use exceptions::{ExceptionTracker, RecordOptions};
pub use telemetry::{Severity, TelemetryBatch, TelemetryKind};
pub use trace_context::{RecordingSpan, TraceContext};
