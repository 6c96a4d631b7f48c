//! Connectivity state machine.
//!
//! ```text
//!            went offline              reconnect attempt
//!   Online ───────────────► Offline ───────────────────► Reconnecting
//!    ▲  │                      │                              │
//!    │  │ score < threshold    └──────── probe ok / online ───┤
//!    │  ▼                                                     │
//!   Degraded ◄──────────────────────────────────── back to Online
//! ```
//!
//! The tracker is pure: every method takes the current time and the metrics
//! it may touch, and reports the transition it made, if any. Scheduling the
//! next attempt and notifying listeners is the engine's job.

use crate::config::RecoveryConfig;
use crate::events::RecoveryMetrics;
use crate::network::backoff::reconnect_delay;
use crate::network::transport::ConnectionInfo;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Process-wide connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    Online,
    Offline,
    Reconnecting,
    /// Connected, but below the quality threshold.
    Degraded,
}

impl ConnectivityState {
    /// Online or degraded: the link is nominally up.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectivityState::Online | ConnectivityState::Degraded)
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityState::Online => write!(f, "online"),
            ConnectivityState::Offline => write!(f, "offline"),
            ConnectivityState::Reconnecting => write!(f, "reconnecting"),
            ConnectivityState::Degraded => write!(f, "degraded"),
        }
    }
}

/// A state change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: ConnectivityState,
    pub to: ConnectivityState,
    /// Set when this transition ended an outage.
    pub offline_duration: Option<Duration>,
}

/// Owns the current state and the bookkeeping around outages.
#[derive(Debug)]
pub struct ConnectivityTracker {
    state: ConnectivityState,
    last_transition: Instant,
    /// When the link was last known to be up; the start of the current outage.
    last_online_time: Instant,
    reconnect_attempts: u32,
    /// Whether this outage has already been counted as a failed recovery.
    recovery_failed: bool,
    connection: ConnectionInfo,
}

impl ConnectivityTracker {
    /// Start in `online` (or `offline` if the host reports no connectivity).
    pub fn new(host_online: bool, now: Instant) -> Self {
        Self {
            state: if host_online {
                ConnectivityState::Online
            } else {
                ConnectivityState::Offline
            },
            last_transition: now,
            last_online_time: now,
            reconnect_attempts: 0,
            recovery_failed: false,
            connection: ConnectionInfo::default(),
        }
    }

    /// Seed the link description without counting it as a transition.
    pub fn with_connection(mut self, info: ConnectionInfo) -> Self {
        self.connection = info;
        self
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn last_transition(&self) -> Instant {
        self.last_transition
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    /// `online`/`degraded` → `offline`.
    pub fn went_offline(
        &mut self,
        now: Instant,
        metrics: &mut RecoveryMetrics,
    ) -> Option<Transition> {
        if !self.state.is_connected() {
            return None;
        }
        self.last_online_time = now;
        self.reconnect_attempts = 0;
        self.recovery_failed = false;
        metrics.total_disconnections += 1;
        warn!("Network connectivity lost");
        Some(self.move_to(ConnectivityState::Offline, now, None))
    }

    /// `offline` → `reconnecting`, when an attempt starts.
    pub fn begin_reconnect(&mut self, now: Instant) -> Option<Transition> {
        if self.state != ConnectivityState::Offline {
            return None;
        }
        Some(self.move_to(ConnectivityState::Reconnecting, now, None))
    }

    /// `offline`/`reconnecting` → `online`.
    pub fn came_online(
        &mut self,
        now: Instant,
        metrics: &mut RecoveryMetrics,
    ) -> Option<Transition> {
        if self.state.is_connected() {
            return None;
        }
        let offline = now.saturating_duration_since(self.last_online_time);
        metrics.record_recovery(offline);
        info!(
            "Network connectivity restored after {:?} ({} reconnect attempts)",
            offline, self.reconnect_attempts
        );
        self.reconnect_attempts = 0;
        self.recovery_failed = false;
        self.last_online_time = now;
        Some(self.move_to(ConnectivityState::Online, now, Some(offline)))
    }

    /// Record a failed reconnect attempt and return the delay before the next.
    ///
    /// The delay is [`reconnect_delay`] for the attempt that just failed, so
    /// attempts past `max_retries` continue at `max_delay_ms`.
    ///
    /// `failed_recoveries` is counted once per outage, when the attempt count
    /// first exceeds `max_retries`, not once per failed attempt after that.
    pub fn reconnect_failed(
        &mut self,
        config: &RecoveryConfig,
        metrics: &mut RecoveryMetrics,
    ) -> Duration {
        let delay = reconnect_delay(self.reconnect_attempts, config);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);

        if self.reconnect_attempts > config.max_retries && !self.recovery_failed {
            self.recovery_failed = true;
            metrics.failed_recoveries += 1;
            warn!(
                "Reconnect budget of {} attempts exhausted; retrying every {:?}",
                config.max_retries,
                config.max_delay()
            );
        }
        delay
    }

    /// Delay before the next attempt, without recording anything.
    pub fn next_delay(&self, config: &RecoveryConfig) -> Duration {
        reconnect_delay(self.reconnect_attempts, config)
    }

    pub fn reset_attempts(&mut self) {
        self.reconnect_attempts = 0;
    }

    /// `online` ⇄ `degraded` from a quality score.
    pub fn apply_quality(&mut self, score: u8, threshold: u8, now: Instant) -> Option<Transition> {
        match self.state {
            ConnectivityState::Online if score < threshold => {
                warn!("Link quality {} below threshold {}", score, threshold);
                Some(self.move_to(ConnectivityState::Degraded, now, None))
            }
            ConnectivityState::Degraded if score >= threshold => {
                info!("Link quality recovered to {}", score);
                Some(self.move_to(ConnectivityState::Online, now, None))
            }
            _ => None,
        }
    }

    /// Record new link info. Returns true if the connection type changed.
    pub fn connection_changed(
        &mut self,
        info: ConnectionInfo,
        metrics: &mut RecoveryMetrics,
    ) -> bool {
        let changed = info.connection_type != self.connection.connection_type;
        if changed {
            info!(
                "Connection type changed: {} -> {}",
                self.connection.connection_type, info.connection_type
            );
            metrics.network_transitions += 1;
        }
        self.connection = info;
        changed
    }

    fn move_to(
        &mut self,
        to: ConnectivityState,
        now: Instant,
        offline_duration: Option<Duration>,
    ) -> Transition {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        Transition {
            from,
            to,
            offline_duration,
        }
    }
}
