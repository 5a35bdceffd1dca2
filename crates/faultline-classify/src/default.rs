use crate::handler::ExceptionHandler;
use chrono::Utc;
use faultline_core::{
    Classification, ErrorCategory, ExceptionRecord, FaultlineError, RawError, Result, UserImpact,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// The generic message browsers substitute for errors raised by
/// cross-origin scripts. Carries no diagnostic value.
pub const CROSS_ORIGIN_PLACEHOLDER: &str = "Script error.";

/// Error names produced by ordinary runtime failures in script code.
const RUNTIME_ERROR_NAMES: &[&str] = &[
    "TypeError",
    "ReferenceError",
    "RangeError",
    "EvalError",
    "URIError",
];

/// Message fragments that indicate a failed network operation rather than a
/// defect in script code. Matched case-insensitively.
const NETWORK_MESSAGE_FRAGMENTS: &[&str] = &[
    "failed to fetch",
    "networkerror",
    "network error",
    "load failed",
    "err_network",
    "err_internet_disconnected",
    "net::",
    "xmlhttprequest",
    "timeout",
    "socket",
];

/// Heuristic classification policy.
///
/// Category comes from the error name and message; user impact comes from a
/// caller-supplied `severity` tag when present, otherwise from the category.
/// The policy is deliberately replaceable: hosts with better signal (release
/// stage, route criticality) should implement [`ExceptionHandler`] themselves.
#[derive(Debug, Default, Clone)]
pub struct DefaultHandler;

impl DefaultHandler {
    pub fn new() -> Self {
        Self
    }

    fn categorize(&self, error: &RawError) -> ErrorCategory {
        if error.message == CROSS_ORIGIN_PLACEHOLDER {
            return ErrorCategory::Script;
        }

        let message = error.message.to_lowercase();
        let name = error.name.to_lowercase();
        if name.contains("network")
            || NETWORK_MESSAGE_FRAGMENTS
                .iter()
                .any(|fragment| message.contains(fragment))
        {
            return ErrorCategory::Network;
        }

        if error.name == "SyntaxError" {
            return ErrorCategory::Syntax;
        }

        if RUNTIME_ERROR_NAMES.contains(&error.name.as_str()) {
            return ErrorCategory::Runtime;
        }

        ErrorCategory::Unknown
    }

    fn assess_impact(
        &self,
        category: ErrorCategory,
        error: &RawError,
        context: &HashMap<String, Value>,
    ) -> UserImpact {
        // An explicit severity tag from the caller wins over the heuristic.
        if let Some(severity) = context.get("severity").and_then(Value::as_str) {
            match severity.to_lowercase().as_str() {
                "critical" | "high" => return UserImpact::High,
                "medium" => return UserImpact::Medium,
                "low" => return UserImpact::Low,
                other => debug!("Ignoring unrecognized severity tag: {}", other),
            }
        }

        match category {
            ErrorCategory::Runtime | ErrorCategory::Syntax => UserImpact::High,
            ErrorCategory::Network => UserImpact::Medium,
            ErrorCategory::Script => UserImpact::Low,
            // Without a recognizable name a stack trace is the only hint
            // that script execution actually broke somewhere.
            ErrorCategory::Unknown => {
                if error.stack.is_some() {
                    UserImpact::Medium
                } else {
                    UserImpact::Low
                }
            }
        }
    }
}

impl ExceptionHandler for DefaultHandler {
    fn classify(
        &self,
        error: &RawError,
        context: &HashMap<String, Value>,
    ) -> Result<ExceptionRecord> {
        if error.name.is_empty() && error.message.is_empty() {
            return Err(FaultlineError::Classification {
                message: "error has neither a name nor a message".to_string(),
            });
        }

        let mut error = error.clone();
        if error.name.is_empty() {
            error.name = "Error".to_string();
        }

        let category = self.categorize(&error);
        let user_impact = self.assess_impact(category, &error, context);

        let record = ExceptionRecord {
            id: Uuid::new_v4(),
            error,
            context: context.clone(),
            classification: Classification {
                category,
                user_impact,
            },
            timestamp: Utc::now(),
        };

        debug!(
            record_id = %record.id,
            category = ?category,
            user_impact = ?user_impact,
            "Classified exception"
        );

        Ok(record)
    }
}
