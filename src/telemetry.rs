//! Core telemetry record types
//!
//! This module defines the four record kinds the collector buffers (spans, log
//! records, metrics and exception records), the batch handed to exporters, and
//! the severity scale shared by logs, alerts and exceptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Free-form string attributes attached to records
pub type Attributes = HashMap<String, String>;

/// Severity scale shared by log records, exceptions and alert rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic detail
    Debug,
    /// Informational, no action required
    Info,
    /// May require attention
    Warning,
    /// An operation failed
    Error,
    /// Requires immediate attention
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "debug",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distributed trace span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    /// Span kind as reported by the producer (server, client, internal, ...)
    pub kind: String,
    pub service_name: String,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub events: Vec<SpanEvent>,
    pub status: SpanStatus,
}

impl Span {
    /// Wall-clock duration between start and end, zero if the clock went backwards
    pub fn duration(&self) -> chrono::Duration {
        let duration = self.end_time - self.start_time;
        if duration < chrono::Duration::zero() {
            chrono::Duration::zero()
        } else {
            duration
        }
    }
}

/// An event recorded within a span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Final status of a span
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpanStatus {
    pub code: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    #[default]
    Unset,
    Ok,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub attributes: Attributes,
    pub service_name: String,
}

/// Kind of metric data point
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

/// A metric data point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Metric {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub attributes: Attributes,
    pub service_name: String,
}

/// An exception forwarded to the collector
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExceptionRecord {
    pub id: String,
    pub exception_type: String,
    pub message: String,
    pub severity: Severity,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Captured stack, one frame per line
    #[serde(default)]
    pub stack_trace: String,
    #[serde(default)]
    pub tags: Attributes,
    pub service_name: String,
}

/// The four record kinds a collector buffers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Spans,
    Logs,
    Metrics,
    Exceptions,
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TelemetryKind::Spans => "spans",
            TelemetryKind::Logs => "logs",
            TelemetryKind::Metrics => "metrics",
            TelemetryKind::Exceptions => "exceptions",
        };
        f.write_str(name)
    }
}

/// Complete contents of the collector buffers at one drain
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryBatch {
    pub spans: Vec<Span>,
    pub logs: Vec<LogRecord>,
    pub metrics: Vec<Metric>,
    pub exceptions: Vec<ExceptionRecord>,
}

impl TelemetryBatch {
    /// Total number of records across all kinds
    pub fn len(&self) -> usize {
        self.spans.len() + self.logs.len() + self.metrics.len() + self.exceptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records of a single kind
    pub fn count(&self, kind: TelemetryKind) -> usize {
        match kind {
            TelemetryKind::Spans => self.spans.len(),
            TelemetryKind::Logs => self.logs.len(),
            TelemetryKind::Metrics => self.metrics.len(),
            TelemetryKind::Exceptions => self.exceptions.len(),
        }
    }

    /// Copy of this batch keeping only the given kinds
    pub fn filtered(&self, kinds: &[TelemetryKind]) -> TelemetryBatch {
        let keep = |kind| kinds.contains(&kind);
        TelemetryBatch {
            spans: if keep(TelemetryKind::Spans) {
                self.spans.clone()
            } else {
                Vec::new()
            },
            logs: if keep(TelemetryKind::Logs) {
                self.logs.clone()
            } else {
                Vec::new()
            },
            metrics: if keep(TelemetryKind::Metrics) {
                self.metrics.clone()
            } else {
                Vec::new()
            },
            exceptions: if keep(TelemetryKind::Exceptions) {
                self.exceptions.clone()
            } else {
                Vec::new()
            },
        }
    }
}
