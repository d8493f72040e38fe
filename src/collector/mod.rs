/// Telemetry buffering, batch export and collector statistics
pub mod exporters;
pub mod stats;
pub mod telemetry_collector;

pub use exporters::{build_exporter, default_kinds, Exporter, HttpExporter, LoggingExporter};
pub use stats::{process_memory_usage, CollectorStats, ExportCounters};
pub use telemetry_collector::{ExportSummary, TelemetryCollector};
