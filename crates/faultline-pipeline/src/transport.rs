//! Delivery of sanitized records to the collection endpoint, with bounded
//! retries, exponential-style backoff, and a per-session delivery cap.

use chrono::Utc;
use faultline_core::{ExceptionRecord, FaultlineError, ReporterConfig, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace, warn};

const USER_AGENT: &str = concat!("faultline/", env!("CARGO_PKG_VERSION"));

/// How often `flush` re-checks the retry queue.
const FLUSH_POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Endpoint returned status {status}")]
    Status { status: u16 },
}

/// Outcome of handing one record to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Delivered on the first attempt.
    Sent,
    /// First attempt failed; the record is on the retry queue.
    QueuedForRetry,
    /// Rejected by the session cap without a network attempt.
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_retries: u64,
    pub queue_size: usize,
    pub session_count: u32,
}

/// Wire body POSTed to the collection endpoint.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportEnvelope<'a> {
    exception: &'a ExceptionRecord,
    timestamp: String,
    user_agent: &'a str,
}

struct RetryEntry {
    record: ExceptionRecord,
    retry_count: u32,
    last_error: String,
}

struct DeliveryConfig {
    endpoint: String,
    max_retries: u32,
    retry_delays: Vec<Duration>,
    request_timeout: Duration,
}

struct TransportInner {
    client: reqwest::Client,
    config: Mutex<DeliveryConfig>,
    queue: Mutex<Vec<RetryEntry>>,
    session_count: AtomicU32,
    max_errors_per_session: AtomicU32,
    total_sent: AtomicU64,
    total_failed: AtomicU64,
    total_retries: AtomicU64,
    // Retry tasks currently sleeping or in flight; `flush` waits on this
    // together with the queue.
    in_flight: AtomicUsize,
}

/// Delivers records over HTTP. Cheap to clone; clones share the retry
/// queue, session counter, and statistics.
///
/// The per-attempt deadline is enforced with `tokio::time::timeout` rather
/// than a client-level timeout so it can be reconfigured without rebuilding
/// the client. A timed-out attempt is treated identically to a network
/// failure and enters the retry path.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(config: &ReporterConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FaultlineError::Transport {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                client,
                config: Mutex::new(DeliveryConfig {
                    endpoint: config.endpoint.clone(),
                    max_retries: config.max_retries,
                    retry_delays: config.retry_delays(),
                    request_timeout: config.request_timeout(),
                }),
                queue: Mutex::new(Vec::new()),
                session_count: AtomicU32::new(0),
                max_errors_per_session: AtomicU32::new(config.max_errors_per_session),
                total_sent: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
                total_retries: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Attempt to deliver `record`. Never blocks on retries: a failed first
    /// attempt queues the record and schedules retry processing in the
    /// background.
    #[instrument(skip(self, record), fields(record_id = %record.id))]
    pub async fn send(&self, record: ExceptionRecord) -> SendStatus {
        if !self.try_claim_session_slot() {
            debug!("Session error cap reached, dropping report");
            return SendStatus::Dropped;
        }

        match self.attempt_delivery(&record).await {
            Ok(()) => {
                self.inner.total_sent.fetch_add(1, Ordering::SeqCst);
                trace!("Report delivered on first attempt");
                SendStatus::Sent
            }
            Err(err) => {
                debug!("Delivery failed, queueing for retry: {}", err);
                self.inner.queue.lock().unwrap().push(RetryEntry {
                    record,
                    retry_count: 0,
                    last_error: err.to_string(),
                });
                self.schedule_retry_processing();
                SendStatus::QueuedForRetry
            }
        }
    }

    /// Claim one slot under the session cap. Compare-and-swap so concurrent
    /// senders cannot push the counter past the cap.
    fn try_claim_session_slot(&self) -> bool {
        let cap = self.inner.max_errors_per_session.load(Ordering::SeqCst);
        let mut current = self.inner.session_count.load(Ordering::SeqCst);
        loop {
            if current >= cap {
                return false;
            }
            match self.inner.session_count.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    async fn attempt_delivery(&self, record: &ExceptionRecord) -> std::result::Result<(), TransportError> {
        let (endpoint, request_timeout) = {
            let config = self.inner.config.lock().unwrap();
            (config.endpoint.clone(), config.request_timeout)
        };

        let envelope = ReportEnvelope {
            exception: record,
            timestamp: Utc::now().to_rfc3339(),
            user_agent: USER_AGENT,
        };

        let response = timeout(
            request_timeout,
            self.inner.client.post(&endpoint).json(&envelope).send(),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            timeout_ms: request_timeout.as_millis() as u64,
        })??;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
            })
        }
    }

    fn schedule_retry_processing(&self) {
        let transport = self.clone();
        tokio::spawn(async move {
            transport.process_retries().await;
        });
    }

    /// Drain the current retry queue and work each entry in its own task.
    /// Entries retry independently and concurrently; there is no ordering
    /// guarantee between them.
    async fn process_retries(&self) {
        let entries: Vec<RetryEntry> = {
            let mut queue = self.inner.queue.lock().unwrap();
            // Claim in-flight slots while still holding the queue lock so
            // flush never observes an empty queue with work pending.
            self.inner.in_flight.fetch_add(queue.len(), Ordering::SeqCst);
            queue.drain(..).collect()
        };

        for entry in entries {
            let transport = self.clone();
            tokio::spawn(async move {
                transport.work_retry_entry(entry).await;
                transport.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }

    async fn work_retry_entry(&self, mut entry: RetryEntry) {
        let (max_retries, delay) = {
            let config = self.inner.config.lock().unwrap();
            // Clamp to the last configured delay when the retry count runs
            // past the schedule.
            let index = (entry.retry_count as usize).min(config.retry_delays.len().saturating_sub(1));
            let delay = config.retry_delays.get(index).copied().unwrap_or_default();
            (config.max_retries, delay)
        };

        if entry.retry_count >= max_retries {
            self.inner.total_failed.fetch_add(1, Ordering::SeqCst);
            warn!(
                record_id = %entry.record.id,
                retries = entry.retry_count,
                last_error = %entry.last_error,
                "Abandoning report after exhausting retries"
            );
            return;
        }

        sleep(delay).await;
        self.inner.total_retries.fetch_add(1, Ordering::SeqCst);

        match self.attempt_delivery(&entry.record).await {
            Ok(()) => {
                self.inner.total_sent.fetch_add(1, Ordering::SeqCst);
                debug!(
                    record_id = %entry.record.id,
                    attempt = entry.retry_count + 1,
                    "Report delivered on retry"
                );
            }
            Err(err) => {
                entry.retry_count += 1;
                entry.last_error = err.to_string();
                // Re-enqueue before this task's in-flight slot is released
                // so flush keeps waiting.
                self.inner.queue.lock().unwrap().push(entry);
                self.schedule_retry_processing();
            }
        }
    }

    /// Wait until every queued retry has resolved (delivered or abandoned).
    /// Does not force extra attempts; it only waits for scheduled ones.
    pub async fn flush(&self) {
        loop {
            let queue_empty = self.inner.queue.lock().unwrap().is_empty();
            if queue_empty && self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            sleep(FLUSH_POLL_INTERVAL).await;
        }
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            total_sent: self.inner.total_sent.load(Ordering::SeqCst),
            total_failed: self.inner.total_failed.load(Ordering::SeqCst),
            total_retries: self.inner.total_retries.load(Ordering::SeqCst),
            queue_size: self.inner.queue.lock().unwrap().len(),
            session_count: self.inner.session_count.load(Ordering::SeqCst),
        }
    }

    /// Reset the per-session delivery cap, e.g. at the start of a new
    /// logical session after login.
    pub fn reset_session_count(&self) {
        self.inner.session_count.store(0, Ordering::SeqCst);
        debug!("Session error counter reset");
    }

    /// Apply the delivery-related subset of a new configuration. Safe to
    /// call while retries are in flight; queued entries pick up the new
    /// endpoint and schedule on their next attempt.
    pub fn update(&self, config: &ReporterConfig) {
        let mut delivery = self.inner.config.lock().unwrap();
        delivery.endpoint = config.endpoint.clone();
        delivery.max_retries = config.max_retries;
        delivery.retry_delays = config.retry_delays();
        delivery.request_timeout = config.request_timeout();
        drop(delivery);

        self.inner
            .max_errors_per_session
            .store(config.max_errors_per_session, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn queue_record_ids(&self) -> Vec<uuid::Uuid> {
        self.inner
            .queue
            .lock()
            .unwrap()
            .iter()
            .map(|entry| entry.record.id)
            .collect()
    }
}
