//! The drain pass.
//!
//! One pass takes a fresh drain order from the queue and sends each entry in
//! turn. Before every send the pass re-checks the engine: if the link has
//! dropped, sync was paused or the engine was disposed, it stops and leaves
//! the rest queued. Entries cancelled since the order was taken are skipped,
//! and a send whose entry was cancelled while in flight has its result
//! discarded.

use crate::engine::Shared;
use crate::sync::FailureOutcome;
use crate::ResyncError;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Why a drain pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainSkip {
    Disposed,
    Disabled,
    Paused,
    NotConnected,
    InProgress,
    Empty,
}

impl std::fmt::Display for DrainSkip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainSkip::Disposed => write!(f, "engine disposed"),
            DrainSkip::Disabled => write!(f, "recovery disabled"),
            DrainSkip::Paused => write!(f, "sync paused"),
            DrainSkip::NotConnected => write!(f, "not connected"),
            DrainSkip::InProgress => write!(f, "drain already in progress"),
            DrainSkip::Empty => write!(f, "queue empty"),
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Sends issued.
    pub attempted: usize,
    /// Sends that succeeded and were removed from the queue.
    pub replayed: usize,
    /// Sends that failed (whether or not the entry stays queued).
    pub failed: usize,
    /// Entries removed without success: expired or out of retries.
    pub dropped: usize,
    /// The pass stopped before reaching the end of the drain order.
    pub stopped_early: bool,
    /// Set when the pass did not run at all.
    pub skipped: Option<DrainSkip>,
}

impl DrainReport {
    fn skipped(reason: DrainSkip) -> Self {
        Self {
            skipped: Some(reason),
            ..Default::default()
        }
    }

    pub fn ran(&self) -> bool {
        self.skipped.is_none()
    }
}

/// Clears the in-progress flag however the pass ends.
struct InProgress<'a> {
    shared: &'a Shared,
}

impl Drop for InProgress<'_> {
    fn drop(&mut self) {
        self.shared.core().sync_in_progress = false;
    }
}

impl Shared {
    pub(crate) async fn drain(&self) -> DrainReport {
        let (order, timeout) = {
            let mut core = self.core();
            let blocker = if self.is_disposed() {
                Some(DrainSkip::Disposed)
            } else if !core.config.enabled {
                Some(DrainSkip::Disabled)
            } else if core.paused {
                Some(DrainSkip::Paused)
            } else if !core.tracker.state().is_connected() {
                Some(DrainSkip::NotConnected)
            } else if core.sync_in_progress {
                Some(DrainSkip::InProgress)
            } else if core.queue.is_empty() {
                Some(DrainSkip::Empty)
            } else {
                None
            };
            if let Some(reason) = blocker {
                debug!("Skipping drain: {}", reason);
                return DrainReport::skipped(reason);
            }
            core.sync_in_progress = true;
            (core.queue.drain_order(), core.config.request_timeout())
        };
        let in_progress = InProgress { shared: self };

        info!("Draining {} queued requests", order.len());
        let mut report = DrainReport::default();
        for entry in order {
            {
                let mut guard = self.core();
                let core = &mut *guard;
                if self.is_disposed() || !core.can_sync() {
                    report.stopped_early = true;
                    break;
                }
                if !core.queue.contains(&entry.id) {
                    continue;
                }
                if entry.is_expired(Instant::now()) {
                    core.queue.remove(&entry.id);
                    core.metrics.requests_dropped += 1;
                    report.dropped += 1;
                    warn!(
                        "Dropping expired request {} ({} {})",
                        entry.id, entry.request.method, entry.request.url
                    );
                    continue;
                }
            }

            report.attempted += 1;
            let send = self.transport.send(&entry.request, timeout);
            let result = match tokio::time::timeout(timeout, send).await {
                Ok(result) => result,
                Err(_) => Err(ResyncError::Timeout(timeout)),
            };

            let mut guard = self.core();
            let core = &mut *guard;
            match result {
                Ok(()) => {
                    if core.queue.remove(&entry.id).is_some() {
                        core.metrics.requests_replayed += 1;
                        report.replayed += 1;
                        debug!("Replayed {}", entry.id);
                    } else {
                        debug!("Discarding result for cancelled request {}", entry.id);
                    }
                }
                Err(e) => match core.queue.mark_failed(&entry.id) {
                    FailureOutcome::Retained { retries } => {
                        report.failed += 1;
                        debug!(
                            "Replay of {} failed (attempt {}/{}): {}",
                            entry.id, retries, entry.max_retries, e
                        );
                    }
                    FailureOutcome::Dropped => {
                        core.metrics.requests_dropped += 1;
                        report.failed += 1;
                        report.dropped += 1;
                        warn!(
                            "Giving up on request {} after {} retries: {}",
                            entry.id, entry.max_retries, e
                        );
                    }
                    FailureOutcome::Missing => {
                        debug!(
                            "Discarding failure for cancelled request {}: {}",
                            entry.id, e
                        );
                    }
                },
            }
        }

        let queue_empty = self.core().queue.is_empty();
        drop(in_progress);

        if report.stopped_early {
            info!(
                "Drain interrupted after {} sends ({} replayed); rest stays queued",
                report.attempted, report.replayed
            );
        } else {
            info!(
                "Drain finished: {} replayed, {} failed, {} dropped",
                report.replayed, report.failed, report.dropped
            );
        }
        if queue_empty && !self.is_disposed() {
            self.notifier.emit_drained();
        }
        report
    }
}
