//! Background tasks owned by the engine.
//!
//! Every task holds only a [`Weak`](std::sync::Weak) reference to the engine
//! state and selects on the shutdown token, so a disposed or dropped engine
//! never has a timer fire afterwards. Handles are kept in a [`TaskSet`] which
//! aborts whatever is left when it is dropped.

use crate::cancel::CancellationToken;
use crate::engine::{ReconnectOutcome, Shared};
use crate::network::ConnectivitySignal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Handles of the engine's running tasks.
#[derive(Debug, Default)]
pub(crate) struct TaskSet {
    reconnect: Option<JoinHandle<()>>,
    quality: Option<JoinHandle<()>>,
    sync: Option<JoinHandle<()>>,
    signals: Vec<JoinHandle<()>>,
    /// One-shot work: drains and connection checks.
    background: Vec<JoinHandle<()>>,
}

impl TaskSet {
    pub(crate) fn set_reconnect(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.reconnect.replace(handle) {
            old.abort();
        }
    }

    pub(crate) fn stop_reconnect(&mut self) {
        if let Some(handle) = self.reconnect.take() {
            handle.abort();
        }
    }

    pub(crate) fn reconnect_running(&self) -> bool {
        self.reconnect.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) fn set_intervals(
        &mut self,
        quality: Option<JoinHandle<()>>,
        sync: Option<JoinHandle<()>>,
    ) {
        let previous = [
            std::mem::replace(&mut self.quality, quality),
            std::mem::replace(&mut self.sync, sync),
        ];
        for old in previous.into_iter().flatten() {
            old.abort();
        }
    }

    pub(crate) fn add_signals(&mut self, handle: JoinHandle<()>) {
        self.signals.retain(|h| !h.is_finished());
        self.signals.push(handle);
    }

    pub(crate) fn add_background(&mut self, handle: JoinHandle<()>) {
        self.background.retain(|h| !h.is_finished());
        self.background.push(handle);
    }

    pub(crate) fn abort_all(&mut self) {
        let handles = self
            .reconnect
            .take()
            .into_iter()
            .chain(self.quality.take())
            .chain(self.sync.take())
            .chain(self.signals.drain(..))
            .chain(self.background.drain(..));
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// Spawn on the current runtime, if there is one.
pub(crate) fn spawn<F>(future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!("No tokio runtime available; background task not started");
            None
        }
    }
}

/// Retry the connection until it comes back, sleeping `first_delay` before
/// the first attempt.
pub(crate) fn spawn_reconnect_loop(
    shared: &Arc<Shared>,
    first_delay: Duration,
) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    spawn(async move {
        let mut delay = first_delay;
        loop {
            debug!("Next reconnect attempt in {:?}", delay);
            if !sleep_or_shutdown(&shutdown, delay).await {
                return;
            }
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match shared.reconnect_once().await {
                ReconnectOutcome::Failed { next_delay } => delay = next_delay,
                ReconnectOutcome::Recovered | ReconnectOutcome::Skipped => return,
            }
        }
    })
}

/// Run a quality tick every `period`.
pub(crate) fn spawn_quality_loop(shared: &Arc<Shared>, period: Duration) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    spawn(every(period, shutdown, move || {
        let weak = weak.clone();
        async move {
            if let Some(shared) = weak.upgrade() {
                shared.quality_tick().await;
            }
        }
    }))
}

/// Drain the queue every `period` while auto-sync is on and work is pending.
pub(crate) fn spawn_sync_loop(shared: &Arc<Shared>, period: Duration) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    spawn(every(period, shutdown, move || {
        let weak = weak.clone();
        async move {
            if let Some(shared) = weak.upgrade() {
                if shared.wants_periodic_sync() {
                    shared.drain().await;
                }
            }
        }
    }))
}

/// Run one drain pass in the background.
pub(crate) fn spawn_drain(shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    spawn(async move {
        if let Some(shared) = weak.upgrade() {
            shared.drain().await;
        }
    })
}

/// Probe the connection once in the background.
pub(crate) fn spawn_check(shared: &Arc<Shared>) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    spawn(async move {
        if let Some(shared) = weak.upgrade() {
            shared.check_connection().await;
        }
    })
}

/// Forward host connectivity signals into the engine until the sender goes
/// away or the engine is disposed.
pub(crate) fn spawn_signal_listener(
    shared: &Arc<Shared>,
    mut signals: mpsc::Receiver<ConnectivitySignal>,
) -> Option<JoinHandle<()>> {
    let weak = Arc::downgrade(shared);
    let shutdown = shared.shutdown.clone();
    spawn(async move {
        info!("Subscribed to connectivity signals");
        loop {
            let signal = tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = signals.recv() => signal,
            };
            let (Some(signal), Some(shared)) = (signal, weak.upgrade()) else {
                break;
            };
            shared.handle_signal(signal);
        }
        info!("Connectivity signal subscription ended");
    })
}

/// Call `tick` every `period`, starting one period from now.
async fn every<F, Fut>(period: Duration, shutdown: CancellationToken, mut tick: F)
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = interval.tick() => {}
        }
        if shutdown.is_cancelled() {
            return;
        }
        tick().await;
    }
}

/// Returns false if shutdown won the race.
async fn sleep_or_shutdown(shutdown: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(delay) => !shutdown.is_cancelled(),
    }
}
