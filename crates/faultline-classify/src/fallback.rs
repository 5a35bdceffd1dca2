use crate::handler::ExceptionHandler;
use chrono::Utc;
use faultline_core::{
    Classification, ErrorCategory, ExceptionRecord, RawError, Result, UserImpact,
};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Handler that stamps every error with one fixed classification.
/// Useful in tests and in hosts that do their own triage upstream and only
/// need the pipeline's dedup/filter/delivery machinery.
#[derive(Debug, Clone)]
pub struct StaticHandler {
    classification: Classification,
}

impl StaticHandler {
    pub fn new(category: ErrorCategory, user_impact: UserImpact) -> Self {
        Self {
            classification: Classification {
                category,
                user_impact,
            },
        }
    }
}

impl Default for StaticHandler {
    fn default() -> Self {
        Self::new(ErrorCategory::Unknown, UserImpact::Medium)
    }
}

impl ExceptionHandler for StaticHandler {
    fn classify(
        &self,
        error: &RawError,
        context: &HashMap<String, Value>,
    ) -> Result<ExceptionRecord> {
        Ok(ExceptionRecord {
            id: Uuid::new_v4(),
            error: error.clone(),
            context: context.clone(),
            classification: self.classification,
            timestamp: Utc::now(),
        })
    }
}
