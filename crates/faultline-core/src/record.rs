use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Value-typed snapshot of a captured error.
///
/// Holds copies of the error's fields, never a reference to the live error
/// object, so nothing captured by the error (closures, DOM handles in the
/// browser original) can outlive the pipeline call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl RawError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// Broad failure category assigned at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Network,
    Script,
    Runtime,
    Syntax,
    Unknown,
}

/// Estimated impact on the end user, assigned at classification time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserImpact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub category: ErrorCategory,
    pub user_impact: UserImpact,
}

/// The unit of work flowing through the pipeline: one classified exception.
///
/// Immutable once classified. The filter's sanitize step produces a new
/// record rather than mutating in place, so retry attempts always operate
/// on the already-sanitized copy. The `id` never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionRecord {
    pub id: Uuid,
    pub error: RawError,
    #[serde(default)]
    pub context: HashMap<String, Value>,
    pub classification: Classification,
    pub timestamp: DateTime<Utc>,
}

impl ExceptionRecord {
    /// The `url` context field, when the caller supplied one as a string.
    pub fn context_url(&self) -> Option<&str> {
        self.context.get("url").and_then(Value::as_str)
    }
}

/// Terminal outcome of one `report_exception` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Delivered to the collection endpoint on the first attempt.
    Sent,
    /// Suppressed: an identical exception was seen inside the dedup window.
    Duplicate,
    /// Suppressed by a filter rule (drop or throttle miss).
    Filtered,
    /// Rejected without a network attempt (session cap reached).
    Dropped,
    /// First attempt failed; the record is on the retry queue.
    QueuedForRetry,
    /// Classification failed; nothing was reported.
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportOutcome {
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ReportOutcome {
    pub fn new(status: ReportStatus, record_id: Uuid) -> Self {
        Self {
            status,
            record_id: Some(record_id),
            reason: None,
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Error,
            record_id: None,
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> ExceptionRecord {
        ExceptionRecord {
            id: Uuid::new_v4(),
            error: RawError::new("TypeError", "x is not a function")
                .with_stack("TypeError: x is not a function\n    at main.js:1:1"),
            context: HashMap::from([(
                "url".to_string(),
                Value::String("https://app.example.com/checkout".to_string()),
            )]),
            classification: Classification {
                category: ErrorCategory::Runtime,
                user_impact: UserImpact::High,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = sample_record();
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("classification").is_some());
        assert!(json["classification"].get("userImpact").is_some());
        assert_eq!(json["error"]["name"], "TypeError");
    }

    #[test]
    fn test_context_url_extraction() {
        let record = sample_record();
        assert_eq!(
            record.context_url(),
            Some("https://app.example.com/checkout")
        );

        let mut no_url = record.clone();
        no_url.context.remove("url");
        assert_eq!(no_url.context_url(), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = serde_json::to_value(ReportStatus::QueuedForRetry).unwrap();
        assert_eq!(status, "queued_for_retry");
    }

    #[test]
    fn test_missing_stack_omitted_from_wire_body() {
        let error = RawError::new("Error", "boom");
        let json = serde_json::to_value(&error).unwrap();
        assert!(json.get("stack").is_none());
    }
}
