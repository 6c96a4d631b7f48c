//! Recovery configuration.
//!
//! `RecoveryConfig` is replaced as a whole: callers describe a change with a
//! `RecoveryConfigUpdate`, the engine merges it into a fresh copy, validates
//! the copy and only then swaps it in.

use crate::error::{ResyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Built-in defaults.
pub struct RecoveryDefaults;

impl RecoveryDefaults {
    pub const MAX_RETRIES: u32 = 5;
    pub const INITIAL_DELAY_MS: u64 = 1_000;
    pub const MAX_DELAY_MS: u64 = 30_000;
    pub const BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const QUEUE_MAX_SIZE: usize = 100;
    pub const REQUEST_TIMEOUT_MS: u64 = 30_000;
    pub const REQUEST_EXPIRY_MS: u64 = 300_000; // 5 minutes
    pub const SYNC_INTERVAL_MS: u64 = 5_000;
    pub const QUALITY_CHECK_INTERVAL_MS: u64 = 30_000;
    pub const DEGRADED_THRESHOLD: u8 = 50;
    pub const QUALITY_SAMPLES: usize = 3;
    pub const PROBE_URL: &'static str = "https://www.gstatic.com/generate_204";
    pub const PROBE_TIMEOUT_MS: u64 = 5_000;
}

/// How the delay between reconnection attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `initial * multiplier^attempt`.
    #[default]
    Exponential,
    /// No delay at all.
    Immediate,
    /// `initial * (attempt + 1)`.
    Linear,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Master switch; a disabled engine turns every operation into a no-op.
    pub enabled: bool,
    pub strategy: BackoffStrategy,
    /// Retry budget per queued request, and the reconnect attempt count after
    /// which an outage is counted as a failed recovery.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub queue_max_size: usize,
    /// Per-send timeout during a drain.
    pub request_timeout_ms: u64,
    /// Lifetime of a queued request; `None` keeps requests until sent.
    pub request_expiry_ms: Option<u64>,
    pub auto_sync: bool,
    pub sync_interval_ms: u64,
    pub quality_check_interval_ms: u64,
    /// Quality scores below this mark the link as degraded.
    pub degraded_threshold: u8,
    /// Randomize reconnect delays by a factor in [0.5, 1.5).
    pub jitter: bool,
    /// Probes issued per quality tick.
    pub quality_samples: usize,
    pub probe_url: String,
    pub probe_timeout_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: BackoffStrategy::Exponential,
            max_retries: RecoveryDefaults::MAX_RETRIES,
            initial_delay_ms: RecoveryDefaults::INITIAL_DELAY_MS,
            max_delay_ms: RecoveryDefaults::MAX_DELAY_MS,
            backoff_multiplier: RecoveryDefaults::BACKOFF_MULTIPLIER,
            queue_max_size: RecoveryDefaults::QUEUE_MAX_SIZE,
            request_timeout_ms: RecoveryDefaults::REQUEST_TIMEOUT_MS,
            request_expiry_ms: Some(RecoveryDefaults::REQUEST_EXPIRY_MS),
            auto_sync: true,
            sync_interval_ms: RecoveryDefaults::SYNC_INTERVAL_MS,
            quality_check_interval_ms: RecoveryDefaults::QUALITY_CHECK_INTERVAL_MS,
            degraded_threshold: RecoveryDefaults::DEGRADED_THRESHOLD,
            jitter: false,
            quality_samples: RecoveryDefaults::QUALITY_SAMPLES,
            probe_url: RecoveryDefaults::PROBE_URL.to_string(),
            probe_timeout_ms: RecoveryDefaults::PROBE_TIMEOUT_MS,
        }
    }
}

impl RecoveryConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data =
            std::fs::read_to_string(path).map_err(|e| ResyncError::io_with_path(e, path))?;
        let config: RecoveryConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the backoff strategy.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial and maximum backoff delays.
    pub fn with_delays(mut self, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.initial_delay_ms = initial_delay_ms;
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set the queue bound.
    pub fn with_queue_max_size(mut self, size: usize) -> Self {
        self.queue_max_size = size;
        self
    }

    /// Set request expiry (`None` disables expiry).
    pub fn with_request_expiry_ms(mut self, expiry: Option<u64>) -> Self {
        self.request_expiry_ms = expiry;
        self
    }

    /// Enable or disable automatic draining.
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Enable or disable reconnect jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_expiry(&self) -> Option<Duration> {
        self.request_expiry_ms.map(Duration::from_millis)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn quality_check_interval(&self) -> Duration {
        Duration::from_millis(self.quality_check_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ResyncError::config(format!(
                "backoff_multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ResyncError::config(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({})",
                self.max_delay_ms, self.initial_delay_ms
            )));
        }
        if self.queue_max_size == 0 {
            return Err(ResyncError::config("queue_max_size must be at least 1"));
        }
        if self.request_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ResyncError::config("timeouts must be non-zero"));
        }
        if self.sync_interval_ms == 0 || self.quality_check_interval_ms == 0 {
            return Err(ResyncError::config("intervals must be non-zero"));
        }
        if self.degraded_threshold > 100 {
            return Err(ResyncError::config(format!(
                "degraded_threshold must be within 0..=100, got {}",
                self.degraded_threshold
            )));
        }
        if self.quality_samples == 0 {
            return Err(ResyncError::config("quality_samples must be at least 1"));
        }
        Ok(())
    }

    /// Apply an update to a copy of this config and validate the result.
    pub fn merged(&self, update: &RecoveryConfigUpdate) -> Result<Self> {
        let mut next = self.clone();
        update.apply_to(&mut next);
        next.validate()?;
        Ok(next)
    }
}

/// A partial configuration change; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfigUpdate {
    pub enabled: Option<bool>,
    pub strategy: Option<BackoffStrategy>,
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub queue_max_size: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    /// `Some(None)` turns expiry off.
    pub request_expiry_ms: Option<Option<u64>>,
    pub auto_sync: Option<bool>,
    pub sync_interval_ms: Option<u64>,
    pub quality_check_interval_ms: Option<u64>,
    pub degraded_threshold: Option<u8>,
    pub jitter: Option<bool>,
    pub quality_samples: Option<usize>,
    pub probe_url: Option<String>,
    pub probe_timeout_ms: Option<u64>,
}

impl RecoveryConfigUpdate {
    fn apply_to(&self, config: &mut RecoveryConfig) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(
                    if let Some(value) = &self.$field {
                        config.$field = value.clone();
                    }
                )*
            };
        }

        merge!(
            enabled,
            strategy,
            max_retries,
            initial_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            queue_max_size,
            request_timeout_ms,
            request_expiry_ms,
            auto_sync,
            sync_interval_ms,
            quality_check_interval_ms,
            degraded_threshold,
            jitter,
            quality_samples,
            probe_url,
            probe_timeout_ms,
        );
    }
}
