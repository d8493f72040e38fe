/// Exception capture, grouping and ignore filtering
pub mod stack;
pub mod tracker;

pub use stack::StackFrame;
pub use tracker::{Exception, ExceptionTracker, RecordOptions, DEFAULT_MAX_STACK_DEPTH};
