use crate::collector::exporters::{build_exporter, Exporter};
use crate::collector::stats::{process_memory_usage, CollectorStats, ExportCounters};
use crate::config::CollectorConfig;
use crate::error::ExportError;
use crate::telemetry::{ExceptionRecord, LogRecord, Metric, Span, TelemetryBatch};
use crate::ticker::periodic;
use log::{debug, error, info};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Records drained by one export cycle and what happened to them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    pub spans: usize,
    pub logs: usize,
    pub metrics: usize,
    pub exceptions: usize,
    /// Exporters that received a non-empty batch
    pub exporters_called: usize,
    pub failures: usize,
}

impl ExportSummary {
    fn from_batch(batch: &TelemetryBatch) -> Self {
        Self {
            spans: batch.spans.len(),
            logs: batch.logs.len(),
            metrics: batch.metrics.len(),
            exceptions: batch.exceptions.len(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> usize {
        self.spans + self.logs + self.metrics + self.exceptions
    }
}

/// Buffers telemetry from concurrent producers and exports it in batches
///
/// All four buffers live behind one lock. A drain swaps them for empty ones
/// in a single critical section, so every record lands in exactly one batch.
/// Exporters run after the lock is released.
pub struct TelemetryCollector {
    buffers: RwLock<TelemetryBatch>,
    exporters: Vec<Box<dyn Exporter>>,
    counters: ExportCounters,
    started_at: Instant,
    flush_on_shutdown: bool,
}

impl fmt::Debug for TelemetryCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.exporters.iter().map(|e| e.name()).collect();
        f.debug_struct("TelemetryCollector")
            .field("exporters", &names)
            .field("flush_on_shutdown", &self.flush_on_shutdown)
            .finish()
    }
}

impl Default for TelemetryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryCollector {
    /// Create a collector with no exporters
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(TelemetryBatch::default()),
            exporters: Vec::new(),
            counters: ExportCounters::new(),
            started_at: Instant::now(),
            flush_on_shutdown: false,
        }
    }

    /// Create a collector with an exporter for every enabled backend
    ///
    /// # Errors
    ///
    /// Returns `ExportError` if an exporter cannot be constructed
    pub fn from_config(config: &CollectorConfig) -> Result<Self, ExportError> {
        let mut collector = Self::new().with_flush_on_shutdown(config.flush_on_shutdown);

        let mut names: Vec<&String> = config.exporters.keys().collect();
        names.sort();
        for name in names {
            let exporter_config = &config.exporters[name];
            if !exporter_config.enabled {
                info!("Exporter '{}' is disabled, skipping", name);
                continue;
            }
            collector.register_exporter(build_exporter(name, exporter_config)?);
        }

        Ok(collector)
    }

    pub fn with_flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }

    /// Add an exporter; exporters are called in registration order
    pub fn register_exporter(&mut self, exporter: Box<dyn Exporter>) {
        info!(
            "Registered exporter '{}' for {:?}",
            exporter.name(),
            exporter.kinds()
        );
        self.exporters.push(exporter);
    }

    pub fn exporter_names(&self) -> Vec<&str> {
        self.exporters.iter().map(|e| e.name()).collect()
    }

    fn read_buffers(&self) -> RwLockReadGuard<'_, TelemetryBatch> {
        self.buffers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_buffers(&self) -> RwLockWriteGuard<'_, TelemetryBatch> {
        self.buffers.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn receive_span(&self, span: Span) {
        debug!(
            "Span received: trace_id={} span_id={} name={}",
            span.trace_id, span.span_id, span.name
        );
        self.write_buffers().spans.push(span);
    }

    pub fn receive_log(&self, log: LogRecord) {
        debug!(
            "Log received: severity={} message={}",
            log.severity, log.message
        );
        self.write_buffers().logs.push(log);
    }

    pub fn receive_metric(&self, metric: Metric) {
        debug!("Metric received: name={} value={}", metric.name, metric.value);
        self.write_buffers().metrics.push(metric);
    }

    pub fn receive_exception(&self, exception: ExceptionRecord) {
        debug!(
            "Exception received: id={} type={} message={}",
            exception.id, exception.exception_type, exception.message
        );
        self.write_buffers().exceptions.push(exception);
    }

    /// Take everything buffered so far, leaving the buffers empty
    pub fn drain(&self) -> TelemetryBatch {
        std::mem::take(&mut *self.write_buffers())
    }

    /// Buffered record counts as (spans, logs, metrics, exceptions)
    pub fn buffered_counts(&self) -> (usize, usize, usize, usize) {
        let buffers = self.read_buffers();
        (
            buffers.spans.len(),
            buffers.logs.len(),
            buffers.metrics.len(),
            buffers.exceptions.len(),
        )
    }

    /// Drain the buffers and hand the batch to every exporter
    ///
    /// An empty batch is not exported. Each exporter receives only the kinds
    /// it accepts and is skipped when that leaves nothing. Failures are
    /// logged and counted, never retried.
    pub async fn run_export_cycle(&self) -> ExportSummary {
        let batch = self.drain();
        let mut summary = ExportSummary::from_batch(&batch);
        if batch.is_empty() {
            return summary;
        }

        for exporter in &self.exporters {
            let filtered = batch.filtered(exporter.kinds());
            if filtered.is_empty() {
                debug!("Nothing to export to '{}'", exporter.name());
                continue;
            }

            summary.exporters_called += 1;
            match exporter.export(&filtered).await {
                Ok(()) => debug!(
                    "Exported {} record(s) to '{}'",
                    filtered.len(),
                    exporter.name()
                ),
                Err(e) => {
                    summary.failures += 1;
                    self.counters.record_failure();
                    error!("Export to '{}' failed: {}", exporter.name(), e);
                }
            }
        }

        self.counters.record_batch(batch.len());
        info!(
            "Batch exported: spans={} logs={} metrics={} exceptions={}",
            summary.spans, summary.logs, summary.metrics, summary.exceptions
        );
        summary
    }

    pub fn stats(&self) -> CollectorStats {
        let (spans, logs, metrics, exceptions) = self.buffered_counts();
        CollectorStats {
            uptime: self.started_at.elapsed(),
            spans_buffered: spans,
            logs_buffered: logs,
            metrics_buffered: metrics,
            exceptions_buffered: exceptions,
            batches_exported: self.counters.batches(),
            records_exported: self.counters.records(),
            export_failures: self.counters.failures(),
            memory_usage_bytes: process_memory_usage(),
        }
    }

    /// Run the export and statistics loops until `cancel` fires
    ///
    /// Both loops tick on their own interval, first tick one interval after
    /// the call. When `flush_on_shutdown` is set, one final export cycle runs
    /// after cancellation.
    pub async fn start(
        &self,
        export_interval: Duration,
        stats_interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(
            "Collector started (export every {:?}, stats every {:?})",
            export_interval, stats_interval
        );

        tokio::join!(
            self.export_loop(export_interval, cancel.clone()),
            self.stats_loop(stats_interval, cancel.clone()),
        );

        if self.flush_on_shutdown {
            let summary = self.run_export_cycle().await;
            info!("Flushed {} record(s) on shutdown", summary.records());
        }
        info!("Collector stopped");
    }

    async fn export_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = periodic(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    self.run_export_cycle().await;
                }
            }
        }
    }

    async fn stats_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = periodic(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.stats().log(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::exporters::LoggingExporter;
    use crate::config::ExporterConfig;
    use crate::telemetry::{
        Attributes, MetricKind, Severity, SpanStatus, TelemetryKind,
    };
    use chrono::Utc;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    /// Exporter that records the batches it receives
    struct MockExporter {
        name: String,
        kinds: Vec<TelemetryKind>,
        batches: Arc<Mutex<Vec<TelemetryBatch>>>,
        fail: bool,
    }

    impl MockExporter {
        fn new(name: &str, kinds: Vec<TelemetryKind>) -> (Self, Arc<Mutex<Vec<TelemetryBatch>>>) {
            let batches = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    name: name.to_string(),
                    kinds,
                    batches: Arc::clone(&batches),
                    fail: false,
                },
                batches,
            )
        }

        fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    impl Exporter for MockExporter {
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
                self.batches.lock().unwrap().push(batch.clone());
                if self.fail {
                    Err(ExportError::Rejected {
                        backend: self.name.clone(),
                        reason: "simulated outage".to_string(),
                    })
                } else {
                    Ok(())
                }
            })
        }
    }

    fn create_test_span(name: &str) -> Span {
        let now = Utc::now();
        Span {
            trace_id: "4bf92f3577b34da6a3ce929d0e0e4736".to_string(),
            span_id: "00f067aa0ba902b7".to_string(),
            parent_id: None,
            name: name.to_string(),
            kind: "server".to_string(),
            service_name: "frontend".to_string(),
            start_time: now,
            end_time: now,
            attributes: Attributes::new(),
            events: vec![],
            status: SpanStatus::default(),
        }
    }

    fn create_test_log() -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            trace_id: None,
            span_id: None,
            severity: Severity::Info,
            message: "request handled".to_string(),
            attributes: Attributes::new(),
            service_name: "frontend".to_string(),
        }
    }

    fn create_test_metric() -> Metric {
        Metric {
            name: "request_count".to_string(),
            kind: MetricKind::Counter,
            value: 1.0,
            timestamp: Utc::now(),
            attributes: Attributes::new(),
            service_name: "frontend".to_string(),
        }
    }

    #[test]
    fn test_drain_returns_everything_once() {
        let collector = TelemetryCollector::new();
        for i in 0..5 {
            collector.receive_span(create_test_span(&format!("span-{}", i)));
        }
        collector.receive_log(create_test_log());

        let batch = collector.drain();
        assert_eq!(batch.spans.len(), 5);
        assert_eq!(batch.logs.len(), 1);
        assert_eq!(batch.spans[0].name, "span-0");

        assert!(collector.drain().is_empty());
        assert_eq!(collector.buffered_counts(), (0, 0, 0, 0));
    }

    #[test]
    fn test_concurrent_producers_lose_nothing() {
        let collector = Arc::new(TelemetryCollector::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        collector.receive_span(create_test_span(&format!("{}-{}", p, i)));
                    }
                })
            })
            .collect();

        // Drain concurrently with the producers
        let mut drained = 0;
        for _ in 0..10 {
            drained += collector.drain().spans.len();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drained += collector.drain().spans.len();

        assert_eq!(drained, 1000);
    }

    #[tokio::test]
    async fn test_empty_cycle_calls_no_exporter() {
        let mut collector = TelemetryCollector::new();
        let (exporter, batches) = MockExporter::new("jaeger", vec![TelemetryKind::Spans]);
        collector.register_exporter(Box::new(exporter));

        let summary = collector.run_export_cycle().await;

        assert_eq!(summary, ExportSummary::default());
        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(collector.stats().batches_exported, 0);
    }

    #[tokio::test]
    async fn test_exporters_receive_only_their_kinds() {
        let mut collector = TelemetryCollector::new();
        let (jaeger, jaeger_batches) = MockExporter::new("jaeger", vec![TelemetryKind::Spans]);
        let (prometheus, prometheus_batches) =
            MockExporter::new("prometheus", vec![TelemetryKind::Metrics]);
        let (elastic, elastic_batches) = MockExporter::new(
            "elasticsearch",
            vec![TelemetryKind::Logs, TelemetryKind::Exceptions],
        );
        collector.register_exporter(Box::new(jaeger));
        collector.register_exporter(Box::new(prometheus));
        collector.register_exporter(Box::new(elastic));

        collector.receive_span(create_test_span("GET /"));
        collector.receive_span(create_test_span("GET /cart"));
        collector.receive_log(create_test_log());

        let summary = collector.run_export_cycle().await;

        assert_eq!(summary.spans, 2);
        assert_eq!(summary.logs, 1);
        assert_eq!(summary.exporters_called, 2);
        assert_eq!(summary.failures, 0);

        let jaeger_batches = jaeger_batches.lock().unwrap();
        assert_eq!(jaeger_batches.len(), 1);
        assert_eq!(jaeger_batches[0].spans.len(), 2);
        assert!(jaeger_batches[0].logs.is_empty());

        // No metrics were buffered, so prometheus is not called
        assert!(prometheus_batches.lock().unwrap().is_empty());

        let elastic_batches = elastic_batches.lock().unwrap();
        assert_eq!(elastic_batches[0].logs.len(), 1);
        assert!(elastic_batches[0].spans.is_empty());
    }

    #[tokio::test]
    async fn test_export_failure_is_counted_and_others_continue() {
        let mut collector = TelemetryCollector::new();
        let (broken, _) = MockExporter::new("jaeger", vec![TelemetryKind::Spans]);
        let (healthy, healthy_batches) =
            MockExporter::new("archive", vec![TelemetryKind::Spans]);
        collector.register_exporter(Box::new(broken.failing()));
        collector.register_exporter(Box::new(healthy));

        collector.receive_span(create_test_span("GET /"));
        let summary = collector.run_export_cycle().await;

        assert_eq!(summary.exporters_called, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(healthy_batches.lock().unwrap().len(), 1);

        let stats = collector.stats();
        assert_eq!(stats.export_failures, 1);
        assert_eq!(stats.batches_exported, 1);
        assert_eq!(stats.records_exported, 1);

        // Failed records are not retried
        assert_eq!(collector.run_export_cycle().await.records(), 0);
    }

    #[test]
    fn test_stats_reports_buffered_counts() {
        let collector = TelemetryCollector::new();
        collector.receive_span(create_test_span("a"));
        collector.receive_metric(create_test_metric());
        collector.receive_metric(create_test_metric());

        let stats = collector.stats();
        assert_eq!(stats.spans_buffered, 1);
        assert_eq!(stats.metrics_buffered, 2);
        assert_eq!(stats.buffered_total(), 3);
    }

    #[test]
    fn test_from_config_skips_disabled_exporters() {
        let mut config = CollectorConfig::default();
        config.exporters.insert(
            "prometheus".to_string(),
            ExporterConfig {
                enabled: false,
                ..ExporterConfig::default()
            },
        );

        let collector = TelemetryCollector::from_config(&config).unwrap();
        assert_eq!(collector.exporter_names(), vec!["elasticsearch", "jaeger"]);
    }

    #[tokio::test]
    async fn test_start_flushes_on_shutdown_when_enabled() {
        let mut collector = TelemetryCollector::new().with_flush_on_shutdown(true);
        let (exporter, batches) = MockExporter::new("jaeger", vec![TelemetryKind::Spans]);
        collector.register_exporter(Box::new(exporter));
        let collector = Arc::new(collector);

        let cancel = CancellationToken::new();
        let task = {
            let collector = Arc::clone(&collector);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                collector
                    .start(Duration::from_secs(3600), Duration::from_secs(3600), cancel)
                    .await;
            })
        };

        collector.receive_span(create_test_span("late"));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("collector loops did not stop")
            .unwrap();

        assert_eq!(batches.lock().unwrap().len(), 1);
        assert_eq!(collector.buffered_counts(), (0, 0, 0, 0));
    }

    #[tokio::test]
    async fn test_start_exports_periodically() {
        let mut collector = TelemetryCollector::new();
        collector.register_exporter(Box::new(LoggingExporter::new(
            "jaeger",
            vec![TelemetryKind::Spans],
        )));
        let collector = Arc::new(collector);

        let cancel = CancellationToken::new();
        let task = {
            let collector = Arc::clone(&collector);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                collector
                    .start(Duration::from_millis(10), Duration::from_millis(10), cancel)
                    .await;
            })
        };

        collector.receive_span(create_test_span("tick"));
        tokio::time::sleep(Duration::from_millis(80)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(collector.buffered_counts().0, 0);
        assert_eq!(collector.stats().batches_exported, 1);
    }
}
