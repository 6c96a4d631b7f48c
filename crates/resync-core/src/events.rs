//! Recovery metrics and state-change fan-out.

use crate::network::ConnectivityState;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Monotonic counters describing the engine's history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryMetrics {
    pub total_disconnections: u64,
    pub successful_recoveries: u64,
    pub failed_recoveries: u64,
    pub requests_queued: u64,
    pub requests_replayed: u64,
    /// Evicted, expired, or out of retries.
    pub requests_dropped: u64,
    pub network_transitions: u64,
    /// Incremental mean over completed offline episodes.
    pub average_offline_duration_ms: f64,
}

impl RecoveryMetrics {
    /// Count a completed outage and fold its length into the running mean.
    pub(crate) fn record_recovery(&mut self, offline: Duration) {
        self.successful_recoveries += 1;
        let sample = offline.as_secs_f64() * 1000.0;
        let n = self.successful_recoveries as f64;
        self.average_offline_duration_ms += (sample - self.average_offline_duration_ms) / n;
    }

    pub fn average_offline_duration(&self) -> Duration {
        Duration::from_secs_f64(self.average_offline_duration_ms / 1000.0)
    }
}

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type StateListener = Arc<dyn Fn(ConnectivityState) + Send + Sync>;
type DrainListener = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    state: Vec<(ListenerId, StateListener)>,
    drained: Vec<(ListenerId, DrainListener)>,
}

impl Registry {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Listener registry.
///
/// Listeners are invoked outside the registry lock, so a callback may call
/// back into the engine (including registering or removing listeners).
#[derive(Default)]
pub struct Notifier {
    registry: Mutex<Registry>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Call `listener` with the new state on every transition.
    pub fn on_network_change(
        &self,
        listener: impl Fn(ConnectivityState) + Send + Sync + 'static,
    ) -> ListenerId {
        let mut registry = self.registry();
        let id = registry.next_id();
        registry.state.push((id, Arc::new(listener)));
        id
    }

    /// Call `listener` whenever a drain pass empties a non-empty queue.
    pub fn on_queue_drained(&self, listener: impl Fn() + Send + Sync + 'static) -> ListenerId {
        let mut registry = self.registry();
        let id = registry.next_id();
        registry.drained.push((id, Arc::new(listener)));
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.state.len() + registry.drained.len();
        registry.state.retain(|(lid, _)| *lid != id);
        registry.drained.retain(|(lid, _)| *lid != id);
        before != registry.state.len() + registry.drained.len()
    }

    pub fn clear(&self) {
        let mut registry = self.registry();
        registry.state.clear();
        registry.drained.clear();
    }

    pub fn listener_count(&self) -> usize {
        let registry = self.registry();
        registry.state.len() + registry.drained.len()
    }

    pub(crate) fn emit_state(&self, state: ConnectivityState) {
        let listeners: Vec<StateListener> = self
            .registry()
            .state
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(state);
        }
    }

    pub(crate) fn emit_drained(&self) {
        let listeners: Vec<DrainListener> = self
            .registry()
            .drained
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener();
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry();
        f.debug_struct("Notifier")
            .field("state_listeners", &registry.state.len())
            .field("drain_listeners", &registry.drained.len())
            .finish()
    }
}
