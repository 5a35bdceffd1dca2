use crate::{FaultlineError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Configuration surface for the whole reporting pipeline.
///
/// Every field has a default, so a bare `ReporterConfig::default()` with an
/// endpoint set is a working configuration. Durations are stored as
/// milliseconds to match the wire-facing configuration the host application
/// supplies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Collection endpoint receiving POSTed exception payloads.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Sliding window within which structurally identical exceptions are
    /// suppressed as duplicates.
    #[serde(default = "default_deduplication_window_ms")]
    pub deduplication_window_ms: u64,

    /// When false, every record passes the filter untouched by the rules.
    #[serde(default = "default_enable_filtering")]
    pub enable_filtering: bool,

    /// Stack traces longer than this many characters are truncated.
    #[serde(default = "default_max_stack_length")]
    pub max_stack_length: usize,

    /// Retry attempts per failed delivery before the record is abandoned.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff schedule between retry attempts; clamped to the last entry
    /// when the retry count exceeds the schedule length.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,

    /// Deadline for a single delivery attempt.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Hard cap on records accepted for delivery per session.
    #[serde(default = "default_max_errors_per_session")]
    pub max_errors_per_session: u32,

    /// When true, the service tracks average processing time per report.
    #[serde(default)]
    pub enable_performance_tracking: bool,
}

fn default_endpoint() -> String {
    "https://localhost/api/errors".to_string()
}

fn default_deduplication_window_ms() -> u64 {
    10_000
}

fn default_enable_filtering() -> bool {
    true
}

fn default_max_stack_length() -> usize {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000]
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_errors_per_session() -> u32 {
    100
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            deduplication_window_ms: default_deduplication_window_ms(),
            enable_filtering: default_enable_filtering(),
            max_stack_length: default_max_stack_length(),
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_errors_per_session: default_max_errors_per_session(),
            enable_performance_tracking: false,
        }
    }
}

impl ReporterConfig {
    pub fn deduplication_window(&self) -> Duration {
        Duration::from_millis(self.deduplication_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() {
            return Err(FaultlineError::Config {
                message: "endpoint must not be empty".to_string(),
            });
        }
        if self.deduplication_window_ms == 0 {
            return Err(FaultlineError::Config {
                message: "deduplication_window_ms must be positive".to_string(),
            });
        }
        if self.retry_delays_ms.is_empty() {
            return Err(FaultlineError::Config {
                message: "retry_delays_ms must contain at least one delay".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(FaultlineError::Config {
                message: "request_timeout_ms must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub async fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if config_file.exists() {
            info!("Loading reporter config from: {}", config_file.display());
            let content = tokio::fs::read_to_string(&config_file).await?;
            let mut config: ReporterConfig =
                toml::from_str(&content).map_err(|e| FaultlineError::Config {
                    message: format!("Failed to parse {}: {}", config_file.display(), e),
                })?;
            config.load_env_overrides();
            config.validate()?;
            Ok(config)
        } else {
            info!("No reporter config file found, using defaults");
            let mut config = Self::default();
            config.load_env_overrides();
            Ok(config)
        }
    }

    pub async fn save(&self, config_path: Option<&Path>) -> Result<()> {
        let config_file = match config_path {
            Some(path) => path.to_path_buf(),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| FaultlineError::Config {
            message: format!("Failed to serialize config: {}", e),
        })?;
        tokio::fs::write(&config_file, content).await?;
        Ok(())
    }

    fn default_config_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("rs", "faultline", "faultline").ok_or_else(|| {
                FaultlineError::Config {
                    message: "Could not determine config directory".to_string(),
                }
            })?;

        Ok(project_dirs.config_dir().join("config.toml"))
    }

    fn load_env_overrides(&mut self) {
        if let Ok(endpoint) = std::env::var("FAULTLINE_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Ok(cap) = std::env::var("FAULTLINE_MAX_ERRORS_PER_SESSION") {
            if let Ok(cap) = cap.parse() {
                self.max_errors_per_session = cap;
            }
        }
    }
}

/// Partial configuration for runtime updates.
///
/// Only the fields that are `Some` are merged; everything else keeps its
/// current value, so callers can adjust one knob without restating the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub endpoint: Option<String>,
    pub deduplication_window_ms: Option<u64>,
    pub enable_filtering: Option<bool>,
    pub max_stack_length: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delays_ms: Option<Vec<u64>>,
    pub request_timeout_ms: Option<u64>,
    pub max_errors_per_session: Option<u32>,
    pub enable_performance_tracking: Option<bool>,
}

impl ConfigPatch {
    pub fn apply(&self, config: &mut ReporterConfig) {
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(window) = self.deduplication_window_ms {
            config.deduplication_window_ms = window;
        }
        if let Some(enabled) = self.enable_filtering {
            config.enable_filtering = enabled;
        }
        if let Some(max_stack) = self.max_stack_length {
            config.max_stack_length = max_stack;
        }
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(delays) = &self.retry_delays_ms {
            config.retry_delays_ms = delays.clone();
        }
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout_ms = timeout;
        }
        if let Some(cap) = self.max_errors_per_session {
            config.max_errors_per_session = cap;
        }
        if let Some(tracking) = self.enable_performance_tracking {
            config.enable_performance_tracking = tracking;
        }
    }
}
