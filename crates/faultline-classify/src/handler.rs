use faultline_core::{ExceptionRecord, RawError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Turns a raw error plus caller-supplied context into a classified record.
///
/// Classification never performs I/O, so the trait is synchronous.
/// Implementations must be thread-safe: the service may be driven from
/// multiple tasks at once.
pub trait ExceptionHandler: Send + Sync {
    /// Classify `error` into a new [`ExceptionRecord`].
    ///
    /// A fresh record id and timestamp are assigned on every call; the
    /// returned record owns copies of the error fields and context.
    fn classify(
        &self,
        error: &RawError,
        context: &HashMap<String, Value>,
    ) -> Result<ExceptionRecord>;
}
