//! RecoveryEngine - connectivity recovery and request replay.
//!
//! Provides:
//! - The connectivity state machine driven by host signals, probes and link quality
//! - A bounded request queue replayed in priority order once the link is back
//! - Reconnect scheduling with backoff, torn down deterministically on dispose
//! - Metrics and state-change listeners
//!
//! The engine is passive until [`RecoveryEngine::start`] is called: every
//! entry point (`handle_*`, `attempt_reconnect`, `quality_tick`, `drain`)
//! can be driven by hand, which is how the tests exercise it. Starting adds
//! the scheduled tasks and the automatic triggers on top.

use crate::cancel::CancellationToken;
use crate::config::{RecoveryConfig, RecoveryConfigUpdate};
use crate::events::{ListenerId, Notifier, RecoveryMetrics};
use crate::network::{
    with_jitter, ConnectionInfo, ConnectivitySignal, ConnectivityState, ConnectivityTracker,
    DynConnectionInfo, DynTransport, OutboundRequest, QualityMetrics, QualityMonitor, Transition,
};
use crate::scheduler::{self, TaskSet};
use crate::sync::{DrainReport, QueueOptions, QueuedRequest, RequestId, RequestQueue};
use crate::Result;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of a single reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// The probe succeeded and the engine is online again.
    Recovered,
    /// The probe failed; the next attempt is due after `next_delay`.
    Failed { next_delay: Duration },
    /// Nothing to do: already connected, disabled, or disposed.
    Skipped,
}

/// Point-in-time summary of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub state: ConnectivityState,
    /// Time spent in the current state.
    pub in_state_for: Duration,
    pub metrics: RecoveryMetrics,
    pub quality: Option<QualityMetrics>,
    pub connection: ConnectionInfo,
    pub queue_len: usize,
    pub reconnect_attempts: u32,
    pub reconnect_scheduled: bool,
    pub sync_paused: bool,
    pub sync_in_progress: bool,
    pub started: bool,
    pub disposed: bool,
}

/// State guarded by the engine lock. Never held across an await.
#[derive(Debug)]
pub(crate) struct Core {
    pub(crate) config: RecoveryConfig,
    pub(crate) tracker: ConnectivityTracker,
    pub(crate) queue: RequestQueue,
    pub(crate) quality: QualityMonitor,
    pub(crate) metrics: RecoveryMetrics,
    pub(crate) paused: bool,
    pub(crate) sync_in_progress: bool,
    pub(crate) started: bool,
}

impl Core {
    pub(crate) fn can_sync(&self) -> bool {
        self.config.enabled && !self.paused && self.tracker.state().is_connected()
    }

    /// Delay before the next reconnect attempt, jittered if configured.
    fn reconnect_delay(&self) -> Duration {
        self.jittered(self.tracker.next_delay(&self.config))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter {
            with_jitter(delay, self.config.max_delay())
        } else {
            delay
        }
    }
}

/// Engine state shared between the handle and its background tasks.
pub(crate) struct Shared {
    core: Mutex<Core>,
    pub(crate) notifier: Notifier,
    pub(crate) transport: DynTransport,
    connection_info: Option<DynConnectionInfo>,
    tasks: Mutex<TaskSet>,
    pub(crate) shutdown: CancellationToken,
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Shared {
    pub(crate) fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, TaskSet> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Notify listeners. Must be called without the core lock held.
    fn emit(&self, transitions: impl IntoIterator<Item = Transition>) {
        for transition in transitions {
            debug!("Connectivity {} -> {}", transition.from, transition.to);
            if !self.is_disposed() {
                self.notifier.emit_state(transition.to);
            }
        }
    }

    pub(crate) fn handle_signal(self: &Arc<Self>, signal: ConnectivitySignal) {
        match signal {
            ConnectivitySignal::WentOnline => self.handle_online(),
            ConnectivitySignal::WentOffline => self.handle_offline(),
            ConnectivitySignal::ConnectionChanged(info) => self.handle_connection_change(info),
        }
    }

    fn handle_offline(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let (transition, reconnect_in) = {
            let mut guard = self.core();
            let core = &mut *guard;
            if !core.config.enabled {
                return;
            }
            let transition = core.tracker.went_offline(Instant::now(), &mut core.metrics);
            if transition.is_some() {
                core.quality.reset();
            }
            let reconnect_in = transition
                .filter(|_| core.started)
                .map(|_| core.reconnect_delay());
            (transition, reconnect_in)
        };

        self.emit(transition);
        if let Some(delay) = reconnect_in {
            self.schedule_reconnect(delay);
        }
    }

    fn handle_online(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let (transition, drain) = {
            let mut guard = self.core();
            let core = &mut *guard;
            if !core.config.enabled {
                return;
            }
            let transition = core.tracker.came_online(Instant::now(), &mut core.metrics);
            let drain = transition.is_some()
                && core.started
                && core.config.auto_sync
                && !core.paused
                && !core.queue.is_empty();
            (transition, drain)
        };
        if transition.is_none() {
            return;
        }

        self.tasks().stop_reconnect();
        self.emit(transition);
        if drain {
            info!("Connectivity restored, replaying queued requests");
            self.schedule_drain();
        }
    }

    fn handle_connection_change(&self, info: ConnectionInfo) {
        if self.is_disposed() {
            return;
        }
        let mut guard = self.core();
        let core = &mut *guard;
        core.tracker.connection_changed(info, &mut core.metrics);
    }

    pub(crate) async fn reconnect_once(self: &Arc<Self>) -> ReconnectOutcome {
        if self.is_disposed() {
            return ReconnectOutcome::Skipped;
        }
        let (transition, attempt) = {
            let mut core = self.core();
            if !core.config.enabled || core.tracker.state().is_connected() {
                return ReconnectOutcome::Skipped;
            }
            let transition = core.tracker.begin_reconnect(Instant::now());
            (transition, core.tracker.reconnect_attempts() + 1)
        };
        self.emit(transition);

        debug!("Reconnect attempt {}", attempt);
        let probe = self.probe().await;
        if self.is_disposed() {
            return ReconnectOutcome::Skipped;
        }
        if probe.is_some() {
            self.handle_online();
            return ReconnectOutcome::Recovered;
        }

        let mut guard = self.core();
        let core = &mut *guard;
        if core.tracker.state().is_connected() {
            // a signal brought the link back while the probe was out
            return ReconnectOutcome::Skipped;
        }
        let delay = core.tracker.reconnect_failed(&core.config, &mut core.metrics);
        ReconnectOutcome::Failed {
            next_delay: core.jittered(delay),
        }
    }

    pub(crate) async fn check_connection(self: &Arc<Self>) -> bool {
        if self.is_disposed() || !self.core().config.enabled {
            return false;
        }
        let probe = self.probe().await;
        if self.is_disposed() {
            return false;
        }
        match probe {
            Some(rtt) => {
                self.core().quality.record_sample(rtt);
                self.handle_online();
                true
            }
            None => {
                self.handle_offline();
                false
            }
        }
    }

    pub(crate) async fn quality_tick(&self) -> Option<QualityMetrics> {
        if self.is_disposed() {
            return None;
        }
        let samples = {
            let core = self.core();
            if !core.config.enabled || !core.tracker.state().is_connected() {
                return None;
            }
            core.config.quality_samples.max(1)
        };
        if let Some(provider) = &self.connection_info {
            self.handle_connection_change(provider.connection_info());
        }

        let mut failed = false;
        for _ in 0..samples {
            match self.probe().await {
                Some(rtt) => {
                    self.core().quality.record_sample(rtt);
                }
                None => {
                    failed = true;
                    break;
                }
            }
        }
        if self.is_disposed() {
            return None;
        }

        let (metrics, transition) = {
            let mut guard = self.core();
            let core = &mut *guard;
            if !core.tracker.state().is_connected() {
                // went offline while probing
                return None;
            }
            let bandwidth = core.tracker.connection().downlink_mbps;
            let metrics = if failed {
                core.quality.record_failure(bandwidth)
            } else {
                core.quality.evaluate(bandwidth)
            };
            let transition = core.tracker.apply_quality(
                metrics.score,
                core.config.degraded_threshold,
                Instant::now(),
            );
            (metrics, transition)
        };
        debug!(
            "Link quality {} (latency {:.0}ms, jitter {:.0}ms, {:.1} Mbps)",
            metrics.score, metrics.latency_ms, metrics.jitter_ms, metrics.bandwidth_mbps
        );
        self.emit(transition);
        Some(metrics)
    }

    /// Send the configured probe. Returns the round-trip time on success.
    async fn probe(&self) -> Option<Duration> {
        let (request, timeout) = {
            let core = self.core();
            (
                OutboundRequest::probe(core.config.probe_url.clone()),
                core.config.probe_timeout(),
            )
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, self.transport.send(&request, timeout)).await {
            Ok(Ok(())) => {
                let rtt = started.elapsed();
                debug!("Probe {} answered in {:?}", request.url, rtt);
                Some(rtt)
            }
            Ok(Err(e)) => {
                debug!("Probe {} failed: {}", request.url, e);
                None
            }
            Err(_) => {
                debug!("Probe {} timed out after {:?}", request.url, timeout);
                None
            }
        }
    }

    pub(crate) fn wants_periodic_sync(&self) -> bool {
        let core = self.core();
        core.started
            && core.config.auto_sync
            && !core.sync_in_progress
            && !core.queue.is_empty()
            && core.can_sync()
    }

    fn schedule_reconnect(self: &Arc<Self>, delay: Duration) {
        if let Some(handle) = scheduler::spawn_reconnect_loop(self, delay) {
            self.tasks().set_reconnect(handle);
        }
    }

    fn schedule_drain(self: &Arc<Self>) {
        if let Some(handle) = scheduler::spawn_drain(self) {
            self.tasks().add_background(handle);
        }
    }

    fn start_intervals(self: &Arc<Self>) {
        let (quality_period, sync_period) = {
            let core = self.core();
            (
                core.config.quality_check_interval(),
                core.config.sync_interval(),
            )
        };
        let quality = scheduler::spawn_quality_loop(self, quality_period);
        let sync = scheduler::spawn_sync_loop(self, sync_period);
        self.tasks().set_intervals(quality, sync);
    }
}

/// Builder for [`RecoveryEngine`].
pub struct RecoveryEngineBuilder {
    config: RecoveryConfig,
    transport: DynTransport,
    connection_info: Option<DynConnectionInfo>,
    initially_online: bool,
}

impl RecoveryEngineBuilder {
    pub fn config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Source of link hints (type and downlink), polled on every quality tick.
    pub fn connection_info(mut self, provider: DynConnectionInfo) -> Self {
        self.connection_info = Some(provider);
        self
    }

    /// Whether the host reports connectivity at startup. Defaults to true.
    pub fn initially_online(mut self, online: bool) -> Self {
        self.initially_online = online;
        self
    }

    pub fn build(self) -> Result<RecoveryEngine> {
        self.config.validate()?;

        let now = Instant::now();
        let mut tracker = ConnectivityTracker::new(self.initially_online, now);
        if let Some(provider) = &self.connection_info {
            tracker = tracker.with_connection(provider.connection_info());
        }
        let queue = RequestQueue::new(
            self.config.queue_max_size,
            self.config.request_expiry(),
            self.config.max_retries,
        );

        let core = Core {
            config: self.config,
            tracker,
            queue,
            quality: QualityMonitor::new(),
            metrics: RecoveryMetrics::default(),
            paused: false,
            sync_in_progress: false,
            started: false,
        };

        Ok(RecoveryEngine {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                notifier: Notifier::new(),
                transport: self.transport,
                connection_info: self.connection_info,
                tasks: Mutex::new(TaskSet::default()),
                shutdown: CancellationToken::new(),
            }),
        })
    }
}

/// Network recovery and request resync engine.
///
/// Cheap to clone; clones share the same engine. Dropping the last clone
/// stops every background task.
#[derive(Clone)]
pub struct RecoveryEngine {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RecoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryEngine")
            .field("state", &self.state())
            .field("queue_len", &self.queue_len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl RecoveryEngine {
    /// Create an engine with `config` that sends through `transport`.
    pub fn new(config: RecoveryConfig, transport: DynTransport) -> Result<Self> {
        Self::builder(transport).config(config).build()
    }

    pub fn builder(transport: DynTransport) -> RecoveryEngineBuilder {
        RecoveryEngineBuilder {
            config: RecoveryConfig::default(),
            transport,
            connection_info: None,
            initially_online: true,
        }
    }

    // === Lifecycle ===

    /// Spawn the scheduled tasks and enable automatic triggers.
    ///
    /// Must be called from within a tokio runtime. Returns false if the
    /// engine was already started or has been disposed.
    pub fn start(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let reconnect_in = {
            let mut core = self.shared.core();
            if core.started {
                return false;
            }
            core.started = true;
            let offline = core.config.enabled && !core.tracker.state().is_connected();
            offline.then(|| core.reconnect_delay())
        };

        self.shared.start_intervals();
        if let Some(delay) = reconnect_in {
            self.shared.schedule_reconnect(delay);
        }
        info!("Recovery engine started");
        true
    }

    /// Stop every task and drop every listener. Afterwards all operations are
    /// no-ops.
    pub fn dispose(&self) {
        if self.is_disposed() {
            return;
        }
        self.shared.shutdown.cancel();
        self.shared.tasks().abort_all();
        self.shared.notifier.clear();
        info!("Recovery engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.is_disposed()
    }

    pub fn is_started(&self) -> bool {
        self.shared.core().started
    }

    /// Subscribe to a host signal source. The subscription ends when the
    /// sender is dropped or the engine is disposed.
    pub fn attach_signals(&self, signals: mpsc::Receiver<ConnectivitySignal>) -> bool {
        if self.is_disposed() {
            return false;
        }
        match scheduler::spawn_signal_listener(&self.shared, signals) {
            Some(handle) => {
                self.shared.tasks().add_signals(handle);
                true
            }
            None => false,
        }
    }

    // === Connectivity ===

    pub fn handle_signal(&self, signal: ConnectivitySignal) {
        self.shared.handle_signal(signal);
    }

    /// The host reports the network is gone.
    pub fn handle_offline(&self) {
        self.shared.handle_offline();
    }

    /// The host reports the network is back.
    pub fn handle_online(&self) {
        self.shared.handle_online();
    }

    /// The host reports new link information.
    pub fn handle_connection_change(&self, info: ConnectionInfo) {
        self.shared.handle_connection_change(info);
    }

    /// Make one reconnect attempt now.
    pub async fn attempt_reconnect(&self) -> ReconnectOutcome {
        self.shared.reconnect_once().await
    }

    /// Reset the attempt counter and probe immediately, whatever the state.
    ///
    /// While connected a failed probe takes the link down; while disconnected
    /// the retry loop restarts from the first backoff step.
    pub fn force_reconnect(&self) {
        if self.is_disposed() {
            return;
        }
        let connected = {
            let mut core = self.shared.core();
            if !core.config.enabled {
                return;
            }
            core.tracker.reset_attempts();
            core.tracker.state().is_connected()
        };

        info!("Forcing reconnect");
        if connected {
            if let Some(handle) = scheduler::spawn_check(&self.shared) {
                self.shared.tasks().add_background(handle);
            }
        } else {
            self.shared.schedule_reconnect(Duration::ZERO);
        }
    }

    /// Probe the connection and update the state from the result.
    pub async fn check_connection(&self) -> bool {
        self.shared.check_connection().await
    }

    /// Probe the link and re-score its quality.
    ///
    /// Returns `None` when there is nothing to measure (offline, disabled or
    /// disposed).
    pub async fn quality_tick(&self) -> Option<QualityMetrics> {
        self.shared.quality_tick().await
    }

    // === Queue ===

    /// Queue a request for replay. Returns `None` if the engine is disabled
    /// or disposed.
    pub fn queue_request(&self, request: OutboundRequest, options: QueueOptions) -> Option<RequestId> {
        if self.is_disposed() {
            return None;
        }
        let mut guard = self.shared.core();
        let core = &mut *guard;
        if !core.config.enabled {
            debug!("Recovery disabled, not queueing {} {}", request.method, request.url);
            return None;
        }
        let (id, evicted) = core.queue.enqueue(request, options, Instant::now());
        core.metrics.requests_queued += 1;
        if evicted.is_some() {
            core.metrics.requests_dropped += 1;
        }
        Some(id)
    }

    /// Remove a queued request. Returns false if it was not queued.
    pub fn cancel_request(&self, id: &RequestId) -> bool {
        if self.is_disposed() {
            return false;
        }
        self.shared.core().queue.cancel(id)
    }

    /// Remove every queued request, returning how many were removed.
    pub fn clear_queue(&self) -> usize {
        if self.is_disposed() {
            return 0;
        }
        let cleared = self.shared.core().queue.clear();
        if cleared > 0 {
            info!("Cleared {} queued requests", cleared);
        }
        cleared
    }

    /// Run one drain pass now.
    pub async fn drain(&self) -> DrainReport {
        self.shared.drain().await
    }

    /// Give requests that have failed before a fresh retry budget and start a
    /// drain. Returns how many requests were reset.
    pub fn retry_failed(&self) -> usize {
        if self.is_disposed() {
            return 0;
        }
        let (reset, drain) = {
            let mut core = self.shared.core();
            if !core.config.enabled {
                return 0;
            }
            let reset = core.queue.reset_failed_retries();
            (reset, reset > 0 && core.can_sync())
        };
        if reset > 0 {
            info!("Retrying {} previously failed requests", reset);
        }
        if drain {
            self.shared.schedule_drain();
        }
        reset
    }

    /// Stop all drains without touching the queue.
    pub fn pause_sync(&self) {
        if self.is_disposed() {
            return;
        }
        self.shared.core().paused = true;
        info!("Sync paused");
    }

    pub fn resume_sync(&self) {
        if self.is_disposed() {
            return;
        }
        let drain = {
            let mut core = self.shared.core();
            core.paused = false;
            core.started && core.config.auto_sync && core.can_sync() && !core.queue.is_empty()
        };
        info!("Sync resumed");
        if drain {
            self.shared.schedule_drain();
        }
    }

    // === Configuration ===

    /// Merge `update` into the current configuration.
    ///
    /// The merged configuration is validated first; on error nothing changes.
    /// Lowering `queue_max_size` evicts the oldest requests.
    pub fn update_config(&self, update: RecoveryConfigUpdate) -> Result<()> {
        self.shared.shutdown.check()?;
        let (restart_intervals, resume_reconnect) = {
            let mut guard = self.shared.core();
            let core = &mut *guard;
            let next = core.config.merged(&update)?;

            let evicted = core.queue.set_limits(
                next.queue_max_size,
                next.request_expiry(),
                next.max_retries,
            );
            core.metrics.requests_dropped += evicted.len() as u64;

            let intervals_changed = next.sync_interval_ms != core.config.sync_interval_ms
                || next.quality_check_interval_ms != core.config.quality_check_interval_ms;
            let re_enabled = next.enabled && !core.config.enabled;
            if !next.enabled && core.config.enabled {
                warn!("Recovery disabled by configuration update");
            }
            core.config = next;

            let resume_reconnect = (core.started
                && re_enabled
                && !core.tracker.state().is_connected())
            .then(|| core.reconnect_delay());
            (core.started && intervals_changed, resume_reconnect)
        };

        info!("Recovery configuration updated");
        if restart_intervals {
            self.shared.start_intervals();
        }
        if let Some(delay) = resume_reconnect {
            self.shared.schedule_reconnect(delay);
        }
        Ok(())
    }

    pub fn config(&self) -> RecoveryConfig {
        self.shared.core().config.clone()
    }

    // === Listeners ===

    /// Call `listener` with the new state on every transition.
    pub fn on_network_change(
        &self,
        listener: impl Fn(ConnectivityState) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.notifier.on_network_change(listener)
    }

    /// Call `listener` when a drain pass empties a queue that had work in it.
    pub fn on_queue_drained(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        self.shared.notifier.on_queue_drained(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.notifier.remove(id)
    }

    // === Accessors ===

    pub fn state(&self) -> ConnectivityState {
        self.shared.core().tracker.state()
    }

    /// Online or degraded.
    pub fn is_online(&self) -> bool {
        self.state().is_connected()
    }

    /// Whether a drain would run right now.
    pub fn can_sync(&self) -> bool {
        !self.is_disposed() && self.shared.core().can_sync()
    }

    pub fn metrics(&self) -> RecoveryMetrics {
        self.shared.core().metrics.clone()
    }

    /// Most recent quality evaluation.
    pub fn quality(&self) -> Option<QualityMetrics> {
        self.shared.core().quality.last()
    }

    pub fn queue_len(&self) -> usize {
        self.shared.core().queue.len()
    }

    /// Queued requests in arrival order.
    pub fn pending_requests(&self) -> Vec<QueuedRequest> {
        self.shared.core().queue.pending()
    }

    pub fn status(&self) -> EngineStatus {
        let reconnect_scheduled = self.shared.tasks().reconnect_running();
        let core = self.shared.core();
        EngineStatus {
            state: core.tracker.state(),
            in_state_for: core.tracker.last_transition().elapsed(),
            metrics: core.metrics.clone(),
            quality: core.quality.last(),
            connection: core.tracker.connection().clone(),
            queue_len: core.queue.len(),
            reconnect_attempts: core.tracker.reconnect_attempts(),
            reconnect_scheduled,
            sync_paused: core.paused,
            sync_in_progress: core.sync_in_progress,
            started: core.started,
            disposed: self.is_disposed(),
        }
    }
}
