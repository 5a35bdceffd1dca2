//! Sliding-window suppression of repeated exceptions.

use faultline_core::ExceptionRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// ASCII unit separator. Cannot appear in an error name, message, URL, or
/// stack line that survived JSON string transport, so joined key parts
/// never collide.
const KEY_SEPARATOR: char = '\u{1F}';

/// Stands in for the context `url` field when the caller supplied none.
const NO_URL_SENTINEL: &str = "<no-url>";

/// Leading stack lines included in the dedup key. Deep frames churn between
/// otherwise identical errors; the top of the stack is what identifies them.
const STACK_LINES_IN_KEY: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    pub tracked_keys: usize,
    pub window_ms: u64,
}

/// Suppresses reports of effectively-the-same exception inside a sliding
/// time window.
///
/// The cache maps a derived key to the last time that key was seen. A
/// background task sweeps expired entries on a period equal to the window,
/// bounding memory to keys seen within roughly the last window duration.
///
/// Must be constructed inside a tokio runtime (the sweep task is spawned
/// from `new`).
pub struct Deduplicator {
    cache: Arc<Mutex<HashMap<String, Instant>>>,
    window: Mutex<Duration>,
    sweep_token: Mutex<CancellationToken>,
}

impl Deduplicator {
    pub fn new(window: Duration) -> Self {
        let cache = Arc::new(Mutex::new(HashMap::new()));
        let sweep_token = Self::spawn_sweep(Arc::clone(&cache), window);

        Self {
            cache,
            window: Mutex::new(window),
            sweep_token: Mutex::new(sweep_token),
        }
    }

    /// Whether `record` matches an exception already seen inside the window.
    ///
    /// A hit refreshes the entry's timestamp (the window slides); a miss
    /// registers the key. Both paths are a single locked map write, so
    /// concurrent callers cannot both observe a miss for the same key.
    pub fn is_duplicate(&self, record: &ExceptionRecord) -> bool {
        let key = dedup_key(record);
        let window = *self.window.lock().unwrap();
        let now = Instant::now();

        let mut cache = self.cache.lock().unwrap();
        match cache.get_mut(&key) {
            Some(last_seen) if now.duration_since(*last_seen) < window => {
                *last_seen = now;
                trace!(record_id = %record.id, "Suppressing duplicate exception");
                true
            }
            _ => {
                cache.insert(key, now);
                false
            }
        }
    }

    pub fn stats(&self) -> DedupStats {
        DedupStats {
            tracked_keys: self.cache.lock().unwrap().len(),
            window_ms: self.window.lock().unwrap().as_millis() as u64,
        }
    }

    /// Change the dedup window at runtime. Restarts the sweep so its period
    /// keeps matching the window size.
    pub fn set_window(&self, window: Duration) {
        *self.window.lock().unwrap() = window;

        let mut token = self.sweep_token.lock().unwrap();
        token.cancel();
        *token = Self::spawn_sweep(Arc::clone(&self.cache), window);
        debug!(window_ms = window.as_millis() as u64, "Dedup window updated");
    }

    /// Stop the sweep task and drop all tracked keys. Idempotent; safe to
    /// call during test teardown or host shutdown.
    pub fn destroy(&self) {
        self.sweep_token.lock().unwrap().cancel();
        self.cache.lock().unwrap().clear();
    }

    fn spawn_sweep(
        cache: Arc<Mutex<HashMap<String, Instant>>>,
        window: Duration,
    ) -> CancellationToken {
        let token = CancellationToken::new();
        let task_token = token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(window);
            // The first tick fires immediately; skip it so the first sweep
            // happens one full window after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        let mut cache = cache.lock().unwrap();
                        let before = cache.len();
                        cache.retain(|_, last_seen| now.duration_since(*last_seen) < window);
                        let purged = before - cache.len();
                        if purged > 0 {
                            trace!(purged, remaining = cache.len(), "Swept expired dedup keys");
                        }
                    }
                }
            }
        });

        token
    }
}

impl Drop for Deduplicator {
    fn drop(&mut self) {
        self.sweep_token.lock().unwrap().cancel();
    }
}

/// Derive the dedup key: error name, message, context url (or a sentinel),
/// and the first three stack lines, joined by a separator that cannot occur
/// in any of those values.
fn dedup_key(record: &ExceptionRecord) -> String {
    let mut key = String::new();
    key.push_str(&record.error.name);
    key.push(KEY_SEPARATOR);
    key.push_str(&record.error.message);
    key.push(KEY_SEPARATOR);
    key.push_str(record.context_url().unwrap_or(NO_URL_SENTINEL));

    if let Some(stack) = &record.error.stack {
        for line in stack.lines().take(STACK_LINES_IN_KEY) {
            key.push(KEY_SEPARATOR);
            key.push_str(line);
        }
    }

    key
}
