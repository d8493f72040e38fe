//! Simulated request traffic
//!
//! Each tick plays one request against a randomly chosen mock service: a
//! traced request with three child operations, log records, alerting metrics
//! and, with the configured probability, a database failure that is recorded
//! as an exception and forwarded to the collector.

use crate::alerts::AlertManager;
use crate::collector::TelemetryCollector;
use crate::config::WorkloadConfig;
use crate::exceptions::{ExceptionTracker, RecordOptions};
use crate::telemetry::{Attributes, LogRecord, Metric, MetricKind, Severity};
use crate::ticker::periodic;
use crate::trace_context::{RecordingSpan, TraceContext};
use chrono::Utc;
use log::{debug, info};
use rand::Rng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Error raised by a failing simulated request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseError {
    message: String,
}

impl DatabaseError {
    pub fn connection() -> Self {
        Self {
            message: "simulated database connection error".to_string(),
        }
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DatabaseError {}

/// What happened to one simulated request
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub service: String,
    pub request_number: u64,
    pub failed: bool,
    pub exception_id: Option<String>,
    pub latency_ms: f64,
}

/// Drives the alert manager, collector and exception tracker with fake traffic
pub struct SampleWorkload {
    config: WorkloadConfig,
    alerts: Arc<AlertManager>,
    collector: Arc<TelemetryCollector>,
    tracker: Arc<ExceptionTracker>,
    requests: AtomicU64,
    errors: AtomicU64,
}

impl SampleWorkload {
    pub fn new(
        config: WorkloadConfig,
        alerts: Arc<AlertManager>,
        collector: Arc<TelemetryCollector>,
        tracker: Arc<ExceptionTracker>,
    ) -> Self {
        Self {
            config,
            alerts,
            collector,
            tracker,
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Simulate a single request
    pub fn handle_request(&self) -> RequestOutcome {
        let mut rng = rand::thread_rng();
        let request_number = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let service = if self.config.services.is_empty() {
            "sample-app".to_string()
        } else {
            self.config.services[rng.gen_range(0..self.config.services.len())].clone()
        };

        let root = RecordingSpan::root("process_request", "server", service.as_str());
        root.set_attribute("request.id", &format!("req-{}", request_number));
        root.set_attribute("user.id", &format!("user-{}", rng.gen_range(0..100)));
        root.set_attribute("method", "GET");
        self.emit_log(&root, &service, Severity::Info, "Processing request");

        let mut latency_ms = 0.0;
        let mut children = Vec::with_capacity(3);

        let db = root.child("database_query", "client");
        db.set_attribute("db.system", "postgresql");
        db.set_attribute("db.operation", "SELECT");
        latency_ms += simulated_latency(&db, rng.gen_range(10..60));
        self.emit_log(&db, &service, Severity::Debug, "Database query executed");
        children.push(db);

        let api = root.child("external_api_call", "client");
        api.set_attribute("http.method", "GET");
        api.set_attribute("http.url", "https://api.example.com/data");
        latency_ms += simulated_latency(&api, rng.gen_range(20..100));
        self.emit_log(&api, &service, Severity::Debug, "External API called");
        children.push(api);

        let cache = root.child("cache_lookup", "internal");
        cache.set_attribute("cache.key", &format!("user-data-{}", request_number));
        cache.set_attribute("cache.hit", &(rng.gen::<f64>() > 0.3).to_string());
        latency_ms += simulated_latency(&cache, rng.gen_range(5..20));
        self.emit_log(&cache, &service, Severity::Debug, "Cache checked");
        children.push(cache);

        let failed = rng.gen_bool(self.config.error_probability.clamp(0.0, 1.0));
        let mut exception_id = None;
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
            let error = DatabaseError::connection();
            let options = RecordOptions::new()
                .with_severity(Severity::Error)
                .with_stack()
                .with_tag("component", "database")
                .with_tag("operation", "query");

            exception_id = self.tracker.record_exception(Some(&root), Some(&error), options);
            if let Some(exception) = exception_id
                .as_deref()
                .and_then(|id| self.tracker.get_exception(id))
            {
                self.collector.receive_exception(exception.to_record(&service));
            }
            self.emit_log(&root, &service, Severity::Error, "Request failed");
        } else {
            root.set_ok();
            self.emit_log(
                &root,
                &service,
                Severity::Info,
                "Request completed successfully",
            );
        }

        for child in &children {
            child.set_ok();
            self.collector.receive_span(child.finish());
        }
        root.set_attribute("simulated.latency_ms", &format!("{:.0}", latency_ms));
        self.collector.receive_span(root.finish());

        self.publish_metrics(&service, latency_ms);

        RequestOutcome {
            service,
            request_number,
            failed,
            exception_id,
            latency_ms,
        }
    }

    fn emit_log(&self, span: &RecordingSpan, service: &str, severity: Severity, message: &str) {
        self.collector.receive_log(LogRecord {
            timestamp: Utc::now(),
            trace_id: span.trace_id(),
            span_id: span.span_id(),
            severity,
            message: message.to_string(),
            attributes: Attributes::new(),
            service_name: service.to_string(),
        });
    }

    fn publish_metrics(&self, service: &str, latency_ms: f64) {
        let requests = self.request_count();
        let errors = self.error_count();
        let error_rate = if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64
        };

        self.alerts.update_metric("error_rate", error_rate);
        self.alerts.update_metric("request_count", requests as f64);
        self.alerts.update_metric("error_count", errors as f64);
        self.alerts.record_histogram("request_latency_ms", latency_ms);

        for (name, kind, value) in [
            ("request_count", MetricKind::Counter, requests as f64),
            ("error_count", MetricKind::Counter, errors as f64),
            ("error_rate", MetricKind::Gauge, error_rate),
            ("request_latency_ms", MetricKind::Histogram, latency_ms),
        ] {
            self.collector.receive_metric(Metric {
                name: name.to_string(),
                kind,
                value,
                timestamp: Utc::now(),
                attributes: Attributes::new(),
                service_name: service.to_string(),
            });
        }

        if requests % 10 == 0 {
            info!(
                "Metrics snapshot: total_requests={} total_errors={} error_rate={:.3}",
                requests, errors, error_rate
            );
        }
    }

    /// Simulate one request per interval until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let interval = self.config.interval();
        let mut ticker = periodic(interval);
        info!(
            "Sample workload started ({} services, error probability {:.2})",
            self.config.services.len(),
            self.config.error_probability
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(
                        "Sample workload stopped after {} requests ({} errors)",
                        self.request_count(),
                        self.error_count()
                    );
                    return;
                }
                _ = ticker.tick() => {
                    let outcome = self.handle_request();
                    debug!(
                        "Request {} to {} {}",
                        outcome.request_number,
                        outcome.service,
                        if outcome.failed { "failed" } else { "succeeded" }
                    );
                }
            }
        }
    }
}

/// Record a simulated duration on `span` and return it
fn simulated_latency(span: &RecordingSpan, millis: u32) -> f64 {
    span.set_attribute("simulated.latency_ms", &millis.to_string());
    f64::from(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::StatusCode;
    use std::time::Duration;

    fn create_workload(error_probability: f64) -> SampleWorkload {
        let tracker = ExceptionTracker::new();
        tracker.set_capture_stack(false);
        let config = WorkloadConfig {
            error_probability,
            services: vec!["cartservice".to_string()],
            ..WorkloadConfig::default()
        };
        SampleWorkload::new(
            config,
            Arc::new(AlertManager::default()),
            Arc::new(TelemetryCollector::new()),
            Arc::new(tracker),
        )
    }

    #[test]
    fn test_successful_request_emits_spans_logs_and_metrics() {
        let workload = create_workload(0.0);
        let outcome = workload.handle_request();

        assert!(!outcome.failed);
        assert_eq!(outcome.service, "cartservice");
        assert!(outcome.exception_id.is_none());

        let batch = workload.collector.drain();
        assert_eq!(batch.spans.len(), 4);
        let root = batch.spans.iter().find(|s| s.name == "process_request").unwrap();
        assert_eq!(root.status.code, StatusCode::Ok);
        for name in ["database_query", "external_api_call", "cache_lookup"] {
            let child = batch.spans.iter().find(|s| s.name == name).unwrap();
            assert_eq!(child.parent_id.as_deref(), Some(root.span_id.as_str()));
            assert_eq!(child.trace_id, root.trace_id);
        }
        assert!(batch.logs.iter().all(|l| l.trace_id.as_deref() == Some(root.trace_id.as_str())));
        assert_eq!(batch.metrics.len(), 4);
        assert!(batch.exceptions.is_empty());

        assert_eq!(workload.alerts.get_metric("request_count"), Some(1.0));
        assert_eq!(workload.alerts.get_metric("error_rate"), Some(0.0));
    }

    #[test]
    fn test_failed_request_records_exception() {
        let workload = create_workload(1.0);
        let outcome = workload.handle_request();

        assert!(outcome.failed);
        let id = outcome.exception_id.unwrap();

        let exception = workload.tracker.get_exception(&id).unwrap();
        assert_eq!(exception.message, "simulated database connection error");
        assert_eq!(exception.exception_type, "DatabaseError");
        assert_eq!(exception.tags["component"], "database");
        assert_eq!(exception.tags["operation"], "query");

        let batch = workload.collector.drain();
        assert_eq!(batch.exceptions.len(), 1);
        assert_eq!(batch.exceptions[0].id, id);
        assert_eq!(batch.exceptions[0].service_name, "cartservice");

        let root = batch.spans.iter().find(|s| s.name == "process_request").unwrap();
        assert_eq!(root.status.code, StatusCode::Error);
        assert_eq!(root.attributes["exception.id"], id);
        assert_eq!(exception.trace_id.as_deref(), Some(root.trace_id.as_str()));

        assert_eq!(workload.alerts.get_metric("error_rate"), Some(1.0));
        assert_eq!(workload.alerts.get_metric("error_count"), Some(1.0));
    }

    #[test]
    fn test_error_rate_tracks_counts() {
        let workload = create_workload(0.0);
        for _ in 0..4 {
            workload.handle_request();
        }
        assert_eq!(workload.request_count(), 4);
        assert_eq!(workload.error_count(), 0);
        assert_eq!(workload.alerts.get_metric("request_count"), Some(4.0));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let mut workload = create_workload(0.0);
        workload.config.interval_ms = 10;
        let workload = Arc::new(workload);

        let cancel = CancellationToken::new();
        let task = {
            let workload = Arc::clone(&workload);
            let cancel = cancel.clone();
            tokio::spawn(async move { workload.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("workload did not stop")
            .unwrap();

        assert!(workload.request_count() >= 1);
    }
}
