//! # Faultline Core
//!
//! Shared data model and configuration for the faultline exception
//! reporting pipeline: the [`ExceptionRecord`] that flows through the
//! pipeline, the [`ReporterConfig`] surface, and the workspace error type.

pub mod config;
pub mod error;
pub mod record;

pub use config::{ConfigPatch, ReporterConfig};
pub use error::{FaultlineError, Result};
pub use record::{
    Classification, ErrorCategory, ExceptionRecord, RawError, ReportOutcome, ReportStatus,
    UserImpact,
};
