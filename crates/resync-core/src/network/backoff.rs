//! Reconnect backoff.
//!
//! `backoff_delay` is a pure function of the attempt number and the config so
//! it can be tested exactly. Randomization is layered on top by the caller
//! through [`with_jitter`].

use crate::config::{BackoffStrategy, RecoveryConfig};
use rand::Rng;
use std::time::Duration;

/// Delay before reconnect attempt `attempt` (0-indexed).
///
/// The result is always within `[0, max_delay_ms]`.
pub fn backoff_delay(attempt: u32, config: &RecoveryConfig) -> Duration {
    let initial = config.initial_delay_ms as f64;
    let raw_ms = match config.strategy {
        BackoffStrategy::Immediate => 0.0,
        // multiplier^0 == 1, so attempt 0 yields the initial delay as is
        BackoffStrategy::Exponential => initial * config.backoff_multiplier.powi(exponent(attempt)),
        BackoffStrategy::Linear => initial * (f64::from(attempt) + 1.0),
    };
    Duration::from_millis(clamp_ms(raw_ms, config.max_delay_ms))
}

/// Delay the reconnect loop waits after failed attempt `attempt`.
///
/// Follows [`backoff_delay`] while the attempt is within `max_retries`;
/// attempts past the budget wait `max_delay_ms`.
pub fn reconnect_delay(attempt: u32, config: &RecoveryConfig) -> Duration {
    if attempt > config.max_retries {
        config.max_delay()
    } else {
        backoff_delay(attempt, config)
    }
}

/// The reconnect delays for attempts `0..attempts`.
pub fn reconnect_schedule(attempts: u32, config: &RecoveryConfig) -> Vec<Duration> {
    (0..attempts)
        .map(|attempt| reconnect_delay(attempt, config))
        .collect()
}

/// Randomize a delay by a factor in `[0.5, 1.5)`, capped at `max_delay`.
///
/// The average delay stays the same while clients that lost connectivity
/// together spread their reconnects out.
pub fn with_jitter(delay: Duration, max_delay: Duration) -> Duration {
    let factor = rand::rng().random_range(0.5..1.5);
    delay.mul_f64(factor).min(max_delay)
}

fn exponent(attempt: u32) -> i32 {
    i32::try_from(attempt).unwrap_or(i32::MAX)
}

fn clamp_ms(raw_ms: f64, max_ms: u64) -> u64 {
    if raw_ms.is_nan() || raw_ms <= 0.0 {
        return 0;
    }
    let max = max_ms as f64;
    if raw_ms >= max {
        max_ms
    } else {
        raw_ms.round() as u64
    }
}
