//! Trace context used to correlate exceptions and logs with spans
//!
//! [`TraceContext`] is the small surface the exception tracker needs from an
//! active span. [`RecordingSpan`] is the in-process implementation used by the
//! workload: it generates W3C-style hex ids, collects attributes and events
//! while the span is open, and turns into a [`Span`] record when finished.

use crate::telemetry::{Attributes, Span, SpanEvent, SpanStatus, StatusCode, Timestamp};
use chrono::Utc;
use rand::Rng;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Access to the span active for the current operation
pub trait TraceContext: Send + Sync {
    /// Trace id, `None` when not part of a trace
    fn trace_id(&self) -> Option<String>;

    fn span_id(&self) -> Option<String>;

    /// Whether the span still accepts attributes and status changes
    fn is_recording(&self) -> bool;

    /// Mark the span as failed with `message`
    fn set_error(&self, message: &str);

    fn set_attribute(&self, key: &str, value: &str);
}

/// Generate a 32-character hex trace id
pub fn generate_trace_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    to_hex(&bytes)
}

/// Generate a 16-character hex span id
pub fn generate_span_id() -> String {
    let bytes: [u8; 8] = rand::thread_rng().gen();
    to_hex(&bytes)
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug)]
struct SpanState {
    attributes: Attributes,
    events: Vec<SpanEvent>,
    status: SpanStatus,
    end_time: Option<Timestamp>,
}

/// An open span that records attributes until finished
#[derive(Debug)]
pub struct RecordingSpan {
    trace_id: String,
    span_id: String,
    parent_id: Option<String>,
    name: String,
    kind: String,
    service_name: String,
    start_time: Timestamp,
    state: Mutex<SpanState>,
}

impl RecordingSpan {
    /// Start a new trace with this span as its root
    pub fn root(
        name: impl Into<String>,
        kind: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self::start(generate_trace_id(), None, name, kind, service_name)
    }

    /// Start a child span in the same trace
    pub fn child(&self, name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self::start(
            self.trace_id.clone(),
            Some(self.span_id.clone()),
            name,
            kind,
            self.service_name.clone(),
        )
    }

    fn start(
        trace_id: String,
        parent_id: Option<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            trace_id,
            span_id: generate_span_id(),
            parent_id,
            name: name.into(),
            kind: kind.into(),
            service_name: service_name.into(),
            start_time: Utc::now(),
            state: Mutex::new(SpanState {
                attributes: Attributes::new(),
                events: Vec::new(),
                status: SpanStatus::default(),
                end_time: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SpanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record a named event; ignored once the span is finished
    pub fn add_event(&self, name: impl Into<String>, attributes: Attributes) {
        let mut state = self.lock_state();
        if state.end_time.is_some() {
            return;
        }
        state.events.push(SpanEvent {
            name: name.into(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    /// Mark the span as successful unless it already failed
    pub fn set_ok(&self) {
        let mut state = self.lock_state();
        if state.end_time.is_none() && state.status.code != StatusCode::Error {
            state.status = SpanStatus {
                code: StatusCode::Ok,
                message: None,
            };
        }
    }

    /// Close the span and produce its record
    ///
    /// Finishing twice returns the same end time.
    pub fn finish(&self) -> Span {
        let mut state = self.lock_state();
        let end_time = *state.end_time.get_or_insert_with(Utc::now);
        Span {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            parent_id: self.parent_id.clone(),
            name: self.name.clone(),
            kind: self.kind.clone(),
            service_name: self.service_name.clone(),
            start_time: self.start_time,
            end_time,
            attributes: state.attributes.clone(),
            events: state.events.clone(),
            status: state.status.clone(),
        }
    }
}

impl TraceContext for RecordingSpan {
    fn trace_id(&self) -> Option<String> {
        Some(self.trace_id.clone())
    }

    fn span_id(&self) -> Option<String> {
        Some(self.span_id.clone())
    }

    fn is_recording(&self) -> bool {
        self.lock_state().end_time.is_none()
    }

    fn set_error(&self, message: &str) {
        let mut state = self.lock_state();
        if state.end_time.is_some() {
            return;
        }
        state.status = SpanStatus {
            code: StatusCode::Error,
            message: Some(message.to_string()),
        };
        let mut attributes = Attributes::new();
        attributes.insert("exception.message".to_string(), message.to_string());
        state.events.push(SpanEvent {
            name: "exception".to_string(),
            timestamp: Utc::now(),
            attributes,
        });
    }

    fn set_attribute(&self, key: &str, value: &str) {
        let mut state = self.lock_state();
        if state.end_time.is_none() {
            state.attributes.insert(key.to_string(), value.to_string());
        }
    }
}
