//! # Faultline Pipeline
//!
//! The exception reporting pipeline: capture -> classify -> dedup ->
//! filter/sanitize -> deliver.
//!
//! A [`ReporterService`] composes the four stages and exposes
//! [`ReporterService::report_exception`] as the single public entry point.
//! Every failure mode resolves into a [`faultline_core::ReportStatus`];
//! nothing in the pipeline propagates an error back to the reporting
//! call site.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faultline_core::{RawError, ReporterConfig};
//! use faultline_pipeline::ReporterService;
//! use std::collections::HashMap;
//!
//! #[tokio::main]
//! async fn main() -> faultline_core::Result<()> {
//!     let config = ReporterConfig {
//!         endpoint: "https://errors.example.com/v1".to_string(),
//!         ..Default::default()
//!     };
//!     let service = ReporterService::with_default_handler(config)?;
//!
//!     let error = RawError::new("TypeError", "x is not a function");
//!     let outcome = service.report_exception(error, HashMap::new()).await;
//!     println!("reported: {:?}", outcome.status);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod dedup;
pub mod filter;
pub mod service;
pub mod transport;

pub use dedup::{DedupStats, Deduplicator};
pub use filter::{ExceptionFilter, FilterAction, FilterRule, TRUNCATION_MARKER};
pub use service::{HostLogger, PipelineStats, ReporterService, ServiceStats};
pub use transport::{SendStatus, Transport, TransportError, TransportStats};
