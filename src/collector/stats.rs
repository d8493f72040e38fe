//! Self-statistics for the telemetry collector
//!
//! Tracks how much the collector has exported and how often exports failed,
//! and samples the resident memory of the process for the periodic stats log.

use log::{info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Memory usage above which the stats log warns
const HIGH_MEMORY_BYTES: u64 = 500 * 1024 * 1024;

/// Point-in-time view of the collector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorStats {
    pub uptime: Duration,
    pub spans_buffered: usize,
    pub logs_buffered: usize,
    pub metrics_buffered: usize,
    pub exceptions_buffered: usize,
    /// Non-empty batches drained and handed to exporters
    pub batches_exported: u64,
    /// Records contained in those batches
    pub records_exported: u64,
    /// Individual exporter calls that returned an error
    pub export_failures: u64,
    /// Resident memory of the process in bytes, 0 when unavailable
    pub memory_usage_bytes: u64,
}

impl CollectorStats {
    pub fn buffered_total(&self) -> usize {
        self.spans_buffered + self.logs_buffered + self.metrics_buffered + self.exceptions_buffered
    }

    /// Emit the statistics at info level, warning on high memory
    pub fn log(&self) {
        info!(
            "Collector statistics: uptime={}s spans_buffered={} logs_buffered={} metrics_buffered={} exceptions_buffered={} batches_exported={} records_exported={} export_failures={} memory={}MB",
            self.uptime.as_secs(),
            self.spans_buffered,
            self.logs_buffered,
            self.metrics_buffered,
            self.exceptions_buffered,
            self.batches_exported,
            self.records_exported,
            self.export_failures,
            self.memory_usage_bytes / 1024 / 1024
        );

        if self.memory_usage_bytes > HIGH_MEMORY_BYTES {
            warn!(
                "High memory usage detected: {}MB",
                self.memory_usage_bytes / 1024 / 1024
            );
        }
    }
}

/// Lock-free export counters
#[derive(Debug, Default)]
pub struct ExportCounters {
    batches: AtomicU64,
    records: AtomicU64,
    failures: AtomicU64,
}

impl ExportCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, records: usize) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Current resident memory of this process in bytes
///
/// Reads `VmRSS` from `/proc/self/status` on Linux, asks `ps` on macOS and
/// falls back to the peak RSS reported by `getrusage`. Returns 0 if nothing
/// works.
pub fn process_memory_usage() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if let Some(bytes) = parse_vm_rss(&status) {
                return bytes;
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        use std::process::Command;

        if let Ok(output) = Command::new("ps")
            .args(["-o", "rss=", "-p", &std::process::id().to_string()])
            .output()
        {
            if let Ok(output_str) = String::from_utf8(output.stdout) {
                if let Ok(rss_kb) = output_str.trim().parse::<u64>() {
                    return rss_kb * 1024;
                }
            }
        }
    }

    #[cfg(unix)]
    {
        // Peak rather than current usage
        let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
        if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } == 0 {
            let max_rss = u64::try_from(usage.ru_maxrss).unwrap_or(0);
            // ru_maxrss is in KB on Linux, bytes on macOS
            #[cfg(target_os = "macos")]
            return max_rss;
            #[cfg(not(target_os = "macos"))]
            return max_rss * 1024;
        }
    }

    0
}

/// Extract the `VmRSS` line of `/proc/self/status` in bytes
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}
