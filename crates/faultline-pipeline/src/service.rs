//! Pipeline orchestration: the single public entry point for reporting.

use crate::dedup::{DedupStats, Deduplicator};
use crate::filter::ExceptionFilter;
use crate::transport::{SendStatus, Transport, TransportStats};
use faultline_classify::{DefaultHandler, ExceptionHandler};
use faultline_core::{
    ConfigPatch, ExceptionRecord, RawError, ReportOutcome, ReportStatus, ReporterConfig, Result,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

/// Optional host logging facility the service mirrors records into.
///
/// Strictly best-effort: a returned error is logged and swallowed, and can
/// never affect the reporting result.
pub trait HostLogger: Send + Sync {
    fn error(&self, message: &str, payload: &Value) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_processed: u64,
    pub total_reported: u64,
    pub total_filtered: u64,
    pub total_duplicated: u64,
    pub average_processing_time_ms: f64,
}

/// Aggregated snapshot across the service and its components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub service: ServiceStats,
    pub dedup: DedupStats,
    pub transport: TransportStats,
}

#[derive(Default)]
struct StatsState {
    stats: ServiceStats,
    timing_samples: u64,
}

/// Orchestrates Handler -> Deduplicator -> Filter -> Transport and exposes
/// `report_exception` as the single public entry point.
///
/// Each service owns its components outright, so independent pipelines
/// (one per test, one per logical frame) never share dedup or retry state.
pub struct ReporterService {
    handler: Arc<dyn ExceptionHandler>,
    dedup: Deduplicator,
    filter: ExceptionFilter,
    transport: Transport,
    config: Mutex<ReporterConfig>,
    stats: Mutex<StatsState>,
    host_logger: Option<Arc<dyn HostLogger>>,
}

impl ReporterService {
    /// Build a service around an injected classification policy.
    pub fn new(config: ReporterConfig, handler: Arc<dyn ExceptionHandler>) -> Result<Self> {
        config.validate()?;

        let dedup = Deduplicator::new(config.deduplication_window());
        let filter = ExceptionFilter::new(config.enable_filtering, config.max_stack_length);
        let transport = Transport::new(&config)?;

        Ok(Self {
            handler,
            dedup,
            filter,
            transport,
            config: Mutex::new(config),
            stats: Mutex::new(StatsState::default()),
            host_logger: None,
        })
    }

    /// Build a service with the built-in heuristic classifier.
    pub fn with_default_handler(config: ReporterConfig) -> Result<Self> {
        Self::new(config, Arc::new(DefaultHandler::new()))
    }

    /// Attach a best-effort host logging facility.
    pub fn with_host_logger(mut self, logger: Arc<dyn HostLogger>) -> Self {
        self.host_logger = Some(logger);
        self
    }

    /// Report one captured error. Every failure mode resolves into a
    /// [`ReportStatus`]; this never returns an `Err` and never panics back
    /// into the caller.
    #[instrument(skip_all, fields(error_name = %error.name))]
    pub async fn report_exception(
        &self,
        error: RawError,
        additional_context: HashMap<String, Value>,
    ) -> ReportOutcome {
        let started = self.performance_tracking_enabled().then(Instant::now);

        let record = match self.handler.classify(&error, &additional_context) {
            Ok(record) => record,
            Err(err) => {
                error!("Exception classification failed: {}", err);
                self.finish(None, started);
                return ReportOutcome::error(err.to_string());
            }
        };

        self.mirror_to_host_logger(&record);

        if self.dedup.is_duplicate(&record) {
            let outcome = ReportOutcome::new(ReportStatus::Duplicate, record.id);
            self.finish(Some(ReportStatus::Duplicate), started);
            return outcome;
        }

        if !self.filter.should_keep(&record) {
            let outcome = ReportOutcome::new(ReportStatus::Filtered, record.id);
            self.finish(Some(ReportStatus::Filtered), started);
            return outcome;
        }

        let sanitized = self.filter.sanitize(&record);
        let status = match self.transport.send(sanitized).await {
            SendStatus::Sent => ReportStatus::Sent,
            SendStatus::QueuedForRetry => ReportStatus::QueuedForRetry,
            SendStatus::Dropped => ReportStatus::Dropped,
        };

        let mut outcome = ReportOutcome::new(status, record.id);
        if status == ReportStatus::Dropped {
            outcome = outcome.with_reason("session error limit reached");
        }
        self.finish(Some(status), started);
        outcome
    }

    /// Aggregate statistics from the service and both stateful components.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            service: self.stats.lock().unwrap().stats,
            dedup: self.dedup.stats(),
            transport: self.transport.stats(),
        }
    }

    /// Wait for in-flight retries to settle; intended for shutdown or
    /// navigation-away handling.
    pub async fn flush(&self) {
        self.transport.flush().await;
    }

    /// Merge a partial configuration and cascade the relevant subset to
    /// each component. Safe to call at any time; the pipeline keeps
    /// running throughout.
    pub fn update_config(&self, patch: ConfigPatch) -> Result<()> {
        let mut config = self.config.lock().unwrap();
        let mut updated = config.clone();
        patch.apply(&mut updated);
        updated.validate()?;

        self.dedup.set_window(updated.deduplication_window());
        self.filter.set_enabled(updated.enable_filtering);
        self.filter.set_max_stack_length(updated.max_stack_length);
        self.transport.update(&updated);

        *config = updated;
        debug!("Reporter configuration updated");
        Ok(())
    }

    /// Tear down background work: wait out pending retries, then stop the
    /// dedup sweep.
    pub async fn shutdown(&self) {
        self.flush().await;
        self.dedup.destroy();
    }

    fn performance_tracking_enabled(&self) -> bool {
        self.config.lock().unwrap().enable_performance_tracking
    }

    fn mirror_to_host_logger(&self, record: &ExceptionRecord) {
        let Some(logger) = &self.host_logger else {
            return;
        };

        let message = format!("{}: {}", record.error.name, record.error.message);
        let payload = serde_json::to_value(record).unwrap_or(Value::Null);
        if let Err(err) = logger.error(&message, &payload) {
            warn!("Host logger rejected mirrored exception: {}", err);
        }
    }

    fn finish(&self, status: Option<ReportStatus>, started: Option<Instant>) {
        let mut state = self.stats.lock().unwrap();
        state.stats.total_processed += 1;

        match status {
            Some(ReportStatus::Sent) | Some(ReportStatus::QueuedForRetry) => {
                state.stats.total_reported += 1;
            }
            Some(ReportStatus::Filtered) => state.stats.total_filtered += 1,
            Some(ReportStatus::Duplicate) => state.stats.total_duplicated += 1,
            _ => {}
        }

        if let Some(started) = started {
            let elapsed_ms = started.elapsed().as_secs_f64() * 1_000.0;
            state.timing_samples += 1;
            let n = state.timing_samples as f64;
            // Running mean over measured calls.
            state.stats.average_processing_time_ms +=
                (elapsed_ms - state.stats.average_processing_time_ms) / n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_classify::StaticHandler;
    use faultline_core::{ErrorCategory, UserImpact};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn offline_config() -> ReporterConfig {
        ReporterConfig {
            // Closed port: any delivery attempt fails fast and queues.
            endpoint: "http://127.0.0.1:1/errors".to_string(),
            retry_delays_ms: vec![10],
            max_retries: 0,
            request_timeout_ms: 500,
            ..Default::default()
        }
    }

    struct RecordingLogger {
        calls: AtomicUsize,
        fail: bool,
    }

    impl HostLogger for RecordingLogger {
        fn error(&self, _message: &str, _payload: &Value) -> std::result::Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("host logger unavailable".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_classification_failure_resolves_to_error_status() {
        let service = ReporterService::with_default_handler(offline_config()).unwrap();

        let outcome = service
            .report_exception(RawError::new("", ""), HashMap::new())
            .await;

        assert_eq!(outcome.status, ReportStatus::Error);
        assert!(outcome.record_id.is_none());
        assert_eq!(service.stats().service.total_processed, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_short_circuits_before_transport() {
        let service = ReporterService::with_default_handler(offline_config()).unwrap();
        let error = RawError::new("TypeError", "x is not a function");

        let first = service.report_exception(error.clone(), HashMap::new()).await;
        let second = service.report_exception(error, HashMap::new()).await;

        assert_eq!(first.status, ReportStatus::QueuedForRetry);
        assert_eq!(second.status, ReportStatus::Duplicate);

        let stats = service.stats();
        assert_eq!(stats.service.total_duplicated, 1);
        // The duplicate consumed no session slot.
        assert_eq!(stats.transport.session_count, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_script_error_is_filtered() {
        let service = ReporterService::with_default_handler(offline_config()).unwrap();

        let outcome = service
            .report_exception(RawError::new("Error", "Script error."), HashMap::new())
            .await;

        assert_eq!(outcome.status, ReportStatus::Filtered);
        assert_eq!(service.stats().service.total_filtered, 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_cap_surfaces_as_dropped_with_reason() {
        let mut config = offline_config();
        config.max_errors_per_session = 0;
        let service = ReporterService::with_default_handler(config).unwrap();

        let outcome = service
            .report_exception(
                RawError::new("TypeError", "x is not a function"),
                HashMap::new(),
            )
            .await;

        assert_eq!(outcome.status, ReportStatus::Dropped);
        assert_eq!(outcome.reason.as_deref(), Some("session error limit reached"));
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_host_logger_never_affects_outcome() {
        let logger = Arc::new(RecordingLogger {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let service = ReporterService::with_default_handler(offline_config())
            .unwrap()
            .with_host_logger(logger.clone());

        let outcome = service
            .report_exception(
                RawError::new("TypeError", "x is not a function"),
                HashMap::new(),
            )
            .await;

        assert_eq!(outcome.status, ReportStatus::QueuedForRetry);
        assert_eq!(logger.calls.load(Ordering::SeqCst), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_host_logger_sees_duplicates_too() {
        let logger = Arc::new(RecordingLogger {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let service = ReporterService::with_default_handler(offline_config())
            .unwrap()
            .with_host_logger(logger.clone());
        let error = RawError::new("TypeError", "x is not a function");

        service.report_exception(error.clone(), HashMap::new()).await;
        service.report_exception(error, HashMap::new()).await;

        // Mirroring happens before dedup, so both calls hit the logger.
        assert_eq!(logger.calls.load(Ordering::SeqCst), 2);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_config_cascades_to_components() {
        let service = ReporterService::with_default_handler(offline_config()).unwrap();

        service
            .update_config(ConfigPatch {
                deduplication_window_ms: Some(25_000),
                enable_filtering: Some(false),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(service.stats().dedup.window_ms, 25_000);

        // Filtering disabled: the placeholder message now reaches transport.
        let outcome = service
            .report_exception(RawError::new("Error", "Script error."), HashMap::new())
            .await;
        assert_eq!(outcome.status, ReportStatus::QueuedForRetry);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_update_config_rejects_invalid_patch() {
        let service = ReporterService::with_default_handler(offline_config()).unwrap();

        let result = service.update_config(ConfigPatch {
            endpoint: Some(String::new()),
            ..Default::default()
        });

        assert!(result.is_err());
        // The running configuration is untouched.
        assert_eq!(service.stats().dedup.window_ms, 10_000);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_injected_handler_policy_is_used() {
        let handler = Arc::new(StaticHandler::new(ErrorCategory::Network, UserImpact::High));
        let mut config = offline_config();
        config.enable_filtering = false;
        let service = ReporterService::new(config, handler).unwrap();

        let outcome = service
            .report_exception(RawError::new("Whatever", "anything"), HashMap::new())
            .await;

        // Network-classified and unfiltered, so it went to transport.
        assert_eq!(outcome.status, ReportStatus::QueuedForRetry);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_average_processing_time_tracked_when_enabled() {
        let mut config = offline_config();
        config.enable_performance_tracking = true;
        let service = ReporterService::with_default_handler(config).unwrap();

        service
            .report_exception(
                RawError::new("TypeError", "x is not a function"),
                HashMap::new(),
            )
            .await;

        assert!(service.stats().service.average_processing_time_ms > 0.0);
        service.shutdown().await;
    }
}
