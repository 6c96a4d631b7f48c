//! Link quality scoring.
//!
//! The monitor keeps a rolling window of probe latencies. Each evaluation
//! turns the window's mean latency, its spread (jitter) and the host's
//! bandwidth hint into a 0-100 score. Every factor only ever subtracts, so
//! making any one of them worse never raises the score.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Number of latency samples kept for jitter.
const WINDOW: usize = 10;

/// Assumed downlink when the host gives no hint.
pub const DEFAULT_BANDWIDTH_MBPS: f64 = 10.0;

const HIGH_LATENCY_MS: f64 = 200.0;
const MODERATE_LATENCY_MS: f64 = 100.0;
const HIGH_JITTER_MS: f64 = 50.0;
const LOW_BANDWIDTH_MBPS: f64 = 1.0;
const MODERATE_BANDWIDTH_MBPS: f64 = 5.0;

const LARGE_PENALTY: u8 = 40;
const MODERATE_PENALTY: u8 = 20;
const JITTER_PENALTY: u8 = 20;

/// Result of one quality evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QualityMetrics {
    /// 0 (unusable) to 100 (perfect).
    pub score: u8,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub bandwidth_mbps: f64,
}

impl QualityMetrics {
    /// Whether this score marks the link as degraded.
    pub fn is_degraded(&self, threshold: u8) -> bool {
        self.score < threshold
    }
}

/// Score a link. Starts at 100 and subtracts fixed penalties.
pub fn quality_score(latency_ms: f64, jitter_ms: f64, bandwidth_mbps: f64) -> u8 {
    let mut penalty: u8 = 0;

    if latency_ms > HIGH_LATENCY_MS {
        penalty += LARGE_PENALTY;
    } else if latency_ms >= MODERATE_LATENCY_MS {
        penalty += MODERATE_PENALTY;
    }

    if jitter_ms > HIGH_JITTER_MS {
        penalty += JITTER_PENALTY;
    }

    if bandwidth_mbps < LOW_BANDWIDTH_MBPS {
        penalty += LARGE_PENALTY;
    } else if bandwidth_mbps < MODERATE_BANDWIDTH_MBPS {
        penalty += MODERATE_PENALTY;
    }

    100u8.saturating_sub(penalty)
}

/// Rolling-window quality monitor.
#[derive(Debug, Default)]
pub struct QualityMonitor {
    /// Most recent probe round-trips, oldest first.
    samples: VecDeque<Duration>,
    last: Option<QualityMetrics>,
}

impl QualityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful probe.
    pub fn record_sample(&mut self, latency: Duration) {
        if self.samples.len() == WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(latency);
    }

    /// Score the current window.
    ///
    /// `bandwidth_mbps` is the host's downlink hint, if it has one.
    pub fn evaluate(&mut self, bandwidth_mbps: Option<f64>) -> QualityMetrics {
        let bandwidth = bandwidth_mbps
            .filter(|b| b.is_finite() && *b >= 0.0)
            .unwrap_or(DEFAULT_BANDWIDTH_MBPS);
        let latency = self.mean_latency_ms();
        let jitter = self.jitter_ms();

        let metrics = QualityMetrics {
            score: quality_score(latency, jitter, bandwidth),
            latency_ms: latency,
            jitter_ms: jitter,
            bandwidth_mbps: bandwidth,
        };
        self.last = Some(metrics);
        metrics
    }

    /// A probe failed: the link is unusable until proven otherwise.
    ///
    /// The window is cleared so stale fast samples don't mask the outage on
    /// the next evaluation.
    pub fn record_failure(&mut self, bandwidth_mbps: Option<f64>) -> QualityMetrics {
        self.samples.clear();
        let metrics = QualityMetrics {
            score: 0,
            latency_ms: f64::INFINITY,
            jitter_ms: 0.0,
            bandwidth_mbps: bandwidth_mbps.unwrap_or(0.0),
        };
        self.last = Some(metrics);
        metrics
    }

    /// Most recent evaluation.
    pub fn last(&self) -> Option<QualityMetrics> {
        self.last
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Forget everything (used when the link drops).
    pub fn reset(&mut self) {
        self.samples.clear();
        self.last = None;
    }

    fn mean_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let total: f64 = self.samples.iter().map(latency_ms).sum();
        total / self.samples.len() as f64
    }

    /// Population standard deviation of the window.
    fn jitter_ms(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let mean = self.mean_latency_ms();
        let variance = self
            .samples
            .iter()
            .map(|s| (latency_ms(s) - mean).powi(2))
            .sum::<f64>()
            / self.samples.len() as f64;
        variance.sqrt()
    }
}

fn latency_ms(sample: &Duration) -> f64 {
    sample.as_secs_f64() * 1000.0
}
