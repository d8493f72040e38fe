use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::fmt;

/// One frame of a captured call stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.function, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.function, file),
            _ => f.write_str(&self.function),
        }
    }
}

/// Frames belonging to the capture machinery itself
const INTERNAL_FRAME_MARKERS: &[&str] = &[
    "std::backtrace",
    "std::backtrace_rs",
    "exceptions::stack::capture_stack_trace",
    "ExceptionTracker",
];

/// Capture the caller's stack, at most `max_depth` frames deep
///
/// Leading frames from the backtrace machinery and the exception tracker are
/// skipped so the first frame is the code that reported the error. Function
/// names depend on debug info being available; without it frames read
/// `<unknown>`.
pub fn capture_stack_trace(max_depth: usize) -> Vec<StackFrame> {
    if max_depth == 0 {
        return Vec::new();
    }

    let rendered = Backtrace::force_capture().to_string();
    parse_backtrace(&rendered)
        .into_iter()
        .skip_while(|frame| {
            INTERNAL_FRAME_MARKERS
                .iter()
                .any(|marker| frame.function.contains(marker))
        })
        .take(max_depth)
        .collect()
}

/// Parse the display form of a [`Backtrace`] into frames
///
/// The expected shape is one `N: function` line per frame, optionally
/// followed by an `at file:line:column` line.
pub fn parse_backtrace(text: &str) -> Vec<StackFrame> {
    let mut frames: Vec<StackFrame> = Vec::new();

    for line in text.lines() {
        let line = line.trim();

        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                if frame.file.is_none() {
                    let (file, line_number) = parse_location(location);
                    frame.file = Some(file);
                    frame.line = line_number;
                }
            }
            continue;
        }

        if let Some((index, function)) = line.split_once(": ") {
            if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
                frames.push(StackFrame {
                    function: strip_symbol_hash(function.trim()).to_string(),
                    file: None,
                    line: None,
                });
            }
        }
    }

    frames
}

/// Split `file:line:column` into its file and line parts
fn parse_location(location: &str) -> (String, Option<u32>) {
    let mut parts = location.rsplitn(3, ':');
    let last = parts.next();
    let middle = parts.next();
    let rest = parts.next();

    match (rest, middle, last) {
        (Some(file), Some(line), Some(_column)) => match line.parse() {
            Ok(line) => (file.to_string(), Some(line)),
            Err(_) => (location.to_string(), None),
        },
        (None, Some(file), Some(line)) => match line.parse() {
            Ok(line) => (file.to_string(), Some(line)),
            Err(_) => (location.to_string(), None),
        },
        _ => (location.to_string(), None),
    }
}

/// Drop a trailing `::h0123456789abcdef` symbol hash
fn strip_symbol_hash(function: &str) -> &str {
    match function.rsplit_once("::h") {
        Some((head, hash))
            if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            head
        }
        _ => function,
    }
}
