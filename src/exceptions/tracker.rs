use crate::config::ExceptionsConfig;
use crate::exceptions::stack::{capture_stack_trace, StackFrame};
use crate::telemetry::{Attributes, ExceptionRecord, Severity, Timestamp};
use crate::trace_context::TraceContext;
use chrono::Utc;
use log::{debug, error};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const DEFAULT_MAX_STACK_DEPTH: usize = 50;

/// A captured application error
#[derive(Debug, Clone, Serialize)]
pub struct Exception {
    pub id: String,
    pub message: String,
    pub exception_type: String,
    pub severity: Severity,
    pub timestamp: Timestamp,
    pub stack_trace: Vec<StackFrame>,
    pub tags: Attributes,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    /// Free-form data supplied by the caller
    pub context: HashMap<String, serde_json::Value>,
}

impl Exception {
    /// Convert into the record shape the collector buffers
    pub fn to_record(&self, service_name: &str) -> ExceptionRecord {
        let stack_trace = self
            .stack_trace
            .iter()
            .map(StackFrame::to_string)
            .collect::<Vec<_>>()
            .join("\n");

        ExceptionRecord {
            id: self.id.clone(),
            exception_type: self.exception_type.clone(),
            message: self.message.clone(),
            severity: self.severity,
            timestamp: self.timestamp,
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            stack_trace,
            tags: self.tags.clone(),
            service_name: service_name.to_string(),
        }
    }
}

/// Per-call options for [`ExceptionTracker::record_exception`]
#[derive(Debug, Clone, Default)]
pub struct RecordOptions {
    /// Defaults to [`Severity::Error`]
    pub severity: Option<Severity>,
    pub tags: Attributes,
    /// Capture the stack even if the tracker policy disables it
    pub capture_stack: bool,
    /// Type tag; defaults to the short type name of the error value
    pub exception_type: Option<String>,
    pub context: HashMap<String, serde_json::Value>,
}

impl RecordOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_stack(mut self) -> Self {
        self.capture_stack = true;
        self
    }

    pub fn with_type(mut self, exception_type: impl Into<String>) -> Self {
        self.exception_type = Some(exception_type.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    exceptions: Vec<Exception>,
    groups: HashMap<String, usize>,
    ignore_patterns: Vec<String>,
}

/// Records application errors and groups them by fingerprint
///
/// Every recorded exception is appended to an in-memory list and counted in
/// its fingerprint group under the same lock, so the group totals always
/// match the list. Errors whose message contains an ignore pattern are
/// dropped without any side effect.
#[derive(Debug)]
pub struct ExceptionTracker {
    state: RwLock<TrackerState>,
    capture_stack: AtomicBool,
    max_stack_depth: AtomicUsize,
    group_by_message: AtomicBool,
    sequence: AtomicU64,
}

impl Default for ExceptionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExceptionTracker {
    /// Create a tracker that captures stacks up to 50 frames and groups by message
    pub fn new() -> Self {
        Self {
            state: RwLock::new(TrackerState::default()),
            capture_stack: AtomicBool::new(true),
            max_stack_depth: AtomicUsize::new(DEFAULT_MAX_STACK_DEPTH),
            group_by_message: AtomicBool::new(true),
            sequence: AtomicU64::new(0),
        }
    }

    /// Create a tracker from its configuration section
    pub fn from_config(config: &ExceptionsConfig) -> Self {
        let tracker = Self::new();
        tracker.set_capture_stack(config.capture_stack_trace);
        tracker.set_max_stack_depth(config.max_stack_depth);
        tracker.set_group_by_message(config.group_by_message);
        for pattern in &config.ignore_patterns {
            tracker.add_ignore_pattern(pattern);
        }
        tracker
    }

    fn read_state(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_capture_stack(&self, capture: bool) {
        self.capture_stack.store(capture, Ordering::Relaxed);
    }

    pub fn set_max_stack_depth(&self, depth: usize) {
        self.max_stack_depth.store(depth, Ordering::Relaxed);
    }

    /// Choose between `type:message` and `type:function:line` fingerprints
    pub fn set_group_by_message(&self, group_by_message: bool) {
        self.group_by_message.store(group_by_message, Ordering::Relaxed);
    }

    /// Ignore every error whose message contains `pattern` (case-sensitive)
    pub fn add_ignore_pattern(&self, pattern: impl Into<String>) {
        self.write_state().ignore_patterns.push(pattern.into());
    }

    fn should_ignore(&self, message: &str) -> bool {
        self.read_state()
            .ignore_patterns
            .iter()
            .any(|pattern| message.contains(pattern.as_str()))
    }

    fn next_id(&self) -> String {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("exc_{}_{}", nanos, sequence)
    }

    fn fingerprint(&self, exception: &Exception) -> String {
        if self.group_by_message.load(Ordering::Relaxed) {
            return format!("{}:{}", exception.exception_type, exception.message);
        }
        match exception.stack_trace.first() {
            Some(frame) => format!(
                "{}:{}:{}",
                exception.exception_type,
                frame.function,
                frame.line.unwrap_or_default()
            ),
            None => exception.exception_type.clone(),
        }
    }

    /// Record an error
    ///
    /// # Arguments
    ///
    /// * `ctx` - Active span used for correlation; its ids are copied onto the
    ///   exception and, while recording, it is marked as errored
    /// * `error` - The error; `None` is a no-op
    /// * `options` - Severity, tags, stack capture and type override
    ///
    /// # Returns
    ///
    /// The id of the recorded exception, or `None` if nothing was recorded
    pub fn record_exception<E>(
        &self,
        ctx: Option<&dyn TraceContext>,
        error: Option<&E>,
        options: RecordOptions,
    ) -> Option<String>
    where
        E: Error + ?Sized,
    {
        let error = error?;
        let message = error.to_string();

        if self.should_ignore(&message) {
            return None;
        }

        let trace_id = ctx.and_then(|c| c.trace_id());
        let span_id = ctx.and_then(|c| c.span_id());

        let stack_trace = if options.capture_stack || self.capture_stack.load(Ordering::Relaxed) {
            capture_stack_trace(self.max_stack_depth.load(Ordering::Relaxed))
        } else {
            Vec::new()
        };

        let exception = Exception {
            id: self.next_id(),
            message,
            exception_type: options
                .exception_type
                .unwrap_or_else(short_type_name::<E>),
            severity: options.severity.unwrap_or(Severity::Error),
            timestamp: Utc::now(),
            stack_trace,
            tags: options.tags,
            trace_id,
            span_id,
            context: options.context,
        };

        let fingerprint = self.fingerprint(&exception);
        {
            let mut state = self.write_state();
            state.exceptions.push(exception.clone());
            *state.groups.entry(fingerprint).or_insert(0) += 1;
        }

        error!(
            "Exception recorded: id={} type={} severity={} message=\"{}\" trace_id={} span_id={}",
            exception.id,
            exception.exception_type,
            exception.severity,
            exception.message,
            exception.trace_id.as_deref().unwrap_or(""),
            exception.span_id.as_deref().unwrap_or("")
        );

        if let Some(span) = ctx.filter(|c| c.is_recording()) {
            span.set_error(&exception.message);
            span.set_attribute("exception.id", &exception.id);
            span.set_attribute("exception.type", &exception.exception_type);
            span.set_attribute("exception.severity", exception.severity.as_str());
            for (key, value) in &exception.tags {
                span.set_attribute(&format!("exception.tag.{}", key), value);
            }
            debug!("Marked span as errored for exception {}", exception.id);
        }

        Some(exception.id)
    }

    /// Copy of every recorded exception, oldest first
    pub fn get_exceptions(&self) -> Vec<Exception> {
        self.read_state().exceptions.clone()
    }

    /// Copy of the fingerprint → occurrence count table
    pub fn get_exception_groups(&self) -> HashMap<String, usize> {
        self.read_state().groups.clone()
    }

    /// Look up a recorded exception by id
    pub fn get_exception(&self, id: &str) -> Option<Exception> {
        self.read_state()
            .exceptions
            .iter()
            .rev()
            .find(|exception| exception.id == id)
            .cloned()
    }

    pub fn exception_count(&self) -> usize {
        self.read_state().exceptions.len()
    }

    /// Forget every exception and group; ignore patterns are kept
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.exceptions.clear();
        state.groups.clear();
    }
}

/// Last path segment of a type name, generics and auto-trait bounds stripped
fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    let base = base.trim_start_matches("dyn ");
    let base = base.split(" + ").next().unwrap_or(base);
    base.rsplit("::").next().unwrap_or(base).to_string()
}
