//! Integration tests for the RecoveryEngine public surface.
//!
//! The engine talks to a scripted in-memory transport and runs on tokio's
//! paused clock, so backoff delays, expiry and offline durations are exact.

use async_trait::async_trait;
use resync_core::{
    ConnectionInfo, ConnectionType, ConnectivitySignal, ConnectivityState, DrainSkip,
    OutboundRequest, QueueOptions, ReconnectOutcome, RecoveryConfig, RecoveryConfigUpdate,
    RecoveryEngine, ResyncError, Result, StaticConnectionInfo, Transport,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

type Hook = Box<dyn Fn(&OutboundRequest) + Send + Sync>;

/// In-memory transport. Probes are HEAD requests; everything else is a replay.
struct ScriptedTransport {
    probe_ok: AtomicBool,
    latency_ms: AtomicU64,
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<String>>,
    probes: AtomicUsize,
    hook: Mutex<Option<Hook>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            probe_ok: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            failing: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            hook: Mutex::new(None),
        })
    }

    fn set_probe_ok(&self, ok: bool) {
        self.probe_ok.store(ok, Ordering::SeqCst);
    }

    fn set_latency(&self, latency: Duration) {
        self.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    fn heal(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    fn on_send(&self, hook: impl Fn(&OutboundRequest) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn clear_hook(&self) {
        self.hook.lock().unwrap().take();
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest, _timeout: Duration) -> Result<()> {
        let latency = Duration::from_millis(self.latency_ms.load(Ordering::SeqCst));
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if request.method == "HEAD" {
            self.probes.fetch_add(1, Ordering::SeqCst);
            return if self.probe_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ResyncError::Network {
                    message: "probe unreachable".into(),
                    cause: None,
                })
            };
        }

        self.sent.lock().unwrap().push(request.url.clone());
        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(request);
        }
        if self.failing.lock().unwrap().contains(&request.url) {
            Err(ResyncError::Http { status: 503 })
        } else {
            Ok(())
        }
    }
}

fn url(name: &str) -> String {
    format!("https://api.example.com/{name}")
}

fn post(name: &str) -> OutboundRequest {
    OutboundRequest::post(url(name)).with_body(format!(r#"{{"item":"{name}"}}"#))
}

fn priority(p: i32) -> QueueOptions {
    QueueOptions::default().with_priority(p)
}

fn engine_with(config: RecoveryConfig) -> (RecoveryEngine, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    let engine = RecoveryEngine::new(config, transport.clone()).unwrap();
    (engine, transport)
}

fn engine() -> (RecoveryEngine, Arc<ScriptedTransport>) {
    engine_with(RecoveryConfig::default())
}

fn record_states(engine: &RecoveryEngine) -> Arc<Mutex<Vec<ConnectivityState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    engine.on_network_change(move |state| sink.lock().unwrap().push(state));
    states
}

// === Drain ordering and retry budgets ===

#[tokio::test(start_paused = true)]
async fn test_drain_sends_in_priority_order() {
    let (engine, transport) = engine();
    engine.queue_request(post("low"), priority(1)).unwrap();
    engine.queue_request(post("high"), priority(10)).unwrap();
    engine.queue_request(post("mid"), priority(5)).unwrap();

    let report = engine.drain().await;

    assert_eq!(transport.sent(), vec![url("high"), url("mid"), url("low")]);
    assert_eq!(report.replayed, 3);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.metrics().requests_replayed, 3);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_budget_drops_after_one_failure() {
    let (engine, transport) = engine_with(RecoveryConfig::new().with_max_retries(0));
    transport.fail(&url("a"));
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    let report = engine.drain().await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.dropped, 1);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.metrics().requests_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_request_retried_until_budget_exhausted() {
    let (engine, transport) = engine_with(RecoveryConfig::new().with_max_retries(2));
    transport.fail(&url("flaky"));
    let id = engine
        .queue_request(post("flaky"), QueueOptions::default())
        .unwrap();

    engine.drain().await;
    engine.drain().await;
    assert_eq!(engine.pending_requests()[0].id, id);
    assert_eq!(engine.pending_requests()[0].retries, 2);

    engine.drain().await;
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(transport.sent().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_per_request_retry_budget_overrides_config() {
    let (engine, transport) = engine();
    transport.fail(&url("once"));
    engine
        .queue_request(post("once"), QueueOptions::default().with_max_retries(0))
        .unwrap();

    engine.drain().await;
    assert_eq!(engine.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_requests_are_never_sent() {
    let (engine, transport) =
        engine_with(RecoveryConfig::new().with_request_expiry_ms(Some(1_000)));
    engine.queue_request(post("stale"), priority(5)).unwrap();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    engine.queue_request(post("fresh"), priority(1)).unwrap();

    let report = engine.drain().await;

    assert_eq!(transport.sent(), vec![url("fresh")]);
    assert_eq!(report.dropped, 1);
    assert_eq!(report.replayed, 1);
    assert_eq!(engine.metrics().requests_dropped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drain_stops_when_link_drops_mid_pass() {
    let (engine, transport) = engine();
    engine.queue_request(post("a"), priority(10)).unwrap();
    engine.queue_request(post("b"), priority(5)).unwrap();
    engine.queue_request(post("c"), priority(1)).unwrap();

    let handle = engine.clone();
    let b = url("b");
    transport.on_send(move |request| {
        if request.url == b {
            handle.handle_offline();
        }
    });

    let report = engine.drain().await;
    transport.clear_hook();

    assert!(report.stopped_early);
    assert_eq!(transport.sent(), vec![url("a"), url("b")]);
    assert_eq!(engine.state(), ConnectivityState::Offline);
    let remaining: Vec<String> = engine
        .pending_requests()
        .into_iter()
        .map(|r| r.request.url)
        .collect();
    assert_eq!(remaining, vec![url("c")]);
}

#[tokio::test(start_paused = true)]
async fn test_drain_refused_while_offline_or_paused() {
    let (engine, _transport) = engine();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    engine.pause_sync();
    assert_eq!(engine.drain().await.skipped, Some(DrainSkip::Paused));
    engine.resume_sync();

    engine.handle_offline();
    assert_eq!(engine.drain().await.skipped, Some(DrainSkip::NotConnected));
    assert_eq!(engine.queue_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_empty_queue_drain_is_noop() {
    let (engine, transport) = engine();
    let report = engine.drain().await;
    assert_eq!(report.skipped, Some(DrainSkip::Empty));
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_drain_is_refused() {
    let (engine, transport) = engine();
    transport.set_latency(Duration::from_millis(100));
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    let first = tokio::spawn({
        let engine = engine.clone();
        async move { engine.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = engine.drain().await;
    assert_eq!(second.skipped, Some(DrainSkip::InProgress));

    let first = first.await.unwrap();
    assert_eq!(first.replayed, 1);
    assert_eq!(transport.sent(), vec![url("a")]);
    assert!(!engine.status().sync_in_progress);
}

#[tokio::test(start_paused = true)]
async fn test_result_of_cancelled_inflight_send_is_discarded() {
    let (engine, transport) = engine();
    transport.set_latency(Duration::from_millis(100));
    let first = engine.queue_request(post("a"), priority(10)).unwrap();
    engine.queue_request(post("b"), priority(1)).unwrap();

    let pass = tokio::spawn({
        let engine = engine.clone();
        async move { engine.drain().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(engine.cancel_request(&first));

    let report = pass.await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.replayed, 1);
    assert_eq!(engine.metrics().requests_replayed, 1);
    assert_eq!(engine.queue_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_send_is_skipped() {
    let (engine, transport) = engine();
    let id = engine.queue_request(post("a"), QueueOptions::default()).unwrap();
    assert!(engine.cancel_request(&id));
    assert!(!engine.cancel_request(&id));

    engine.drain().await;
    assert!(transport.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_request_timeout_counts_as_failure() {
    let config = RecoveryConfig {
        request_timeout_ms: 50,
        max_retries: 0,
        ..Default::default()
    };
    let (engine, transport) = engine_with(config);
    transport.set_latency(Duration::from_millis(500));
    engine.queue_request(post("slow"), QueueOptions::default()).unwrap();

    let report = engine.drain().await;
    assert_eq!(report.failed, 1);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.metrics().requests_replayed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_queue_drained_fires_only_when_emptied() {
    let (engine, transport) = engine();
    let drained = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drained);
    engine.on_queue_drained(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    transport.fail(&url("stuck"));
    engine.queue_request(post("ok"), QueueOptions::default()).unwrap();
    engine.queue_request(post("stuck"), QueueOptions::default()).unwrap();
    engine.drain().await;
    assert_eq!(drained.load(Ordering::SeqCst), 0);

    transport.heal(&url("stuck"));
    engine.drain().await;
    assert_eq!(drained.load(Ordering::SeqCst), 1);

    engine.drain().await;
    assert_eq!(drained.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_failed_resets_budgets_and_drains() {
    let (engine, transport) = engine();
    transport.fail(&url("a"));
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();
    engine.queue_request(post("b"), QueueOptions::default()).unwrap();
    transport.fail(&url("b"));
    engine.drain().await;
    assert_eq!(engine.queue_len(), 2);

    transport.heal(&url("a"));
    transport.heal(&url("b"));
    assert_eq!(engine.retry_failed(), 2);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.metrics().requests_replayed, 2);
}

// === Queue bounds ===

#[tokio::test(start_paused = true)]
async fn test_eviction_keeps_queue_at_bound() {
    let (engine, _transport) = engine_with(RecoveryConfig::new().with_queue_max_size(3));
    let ids: Vec<_> = (0..5)
        .map(|i| {
            engine
                .queue_request(post(&i.to_string()), QueueOptions::default())
                .unwrap()
        })
        .collect();

    assert_eq!(engine.queue_len(), 3);
    let remaining: Vec<_> = engine.pending_requests().into_iter().map(|r| r.id).collect();
    assert_eq!(remaining, ids[2..].to_vec());

    let metrics = engine.metrics();
    assert_eq!(metrics.requests_queued, 5);
    assert_eq!(metrics.requests_dropped, 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_queue() {
    let (engine, transport) = engine();
    for name in ["a", "b", "c"] {
        engine.queue_request(post(name), QueueOptions::default());
    }
    assert_eq!(engine.clear_queue(), 3);
    assert_eq!(engine.queue_len(), 0);
    engine.drain().await;
    assert!(transport.sent().is_empty());
}

// === Connectivity state machine ===

#[tokio::test(start_paused = true)]
async fn test_offline_duration_is_recorded() {
    let (engine, _transport) = engine();
    let states = record_states(&engine);

    engine.handle_offline();
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    engine.handle_online();

    let metrics = engine.metrics();
    assert_eq!(metrics.total_disconnections, 1);
    assert_eq!(metrics.successful_recoveries, 1);
    assert!(metrics.average_offline_duration_ms >= 5_000.0);
    assert!(metrics.average_offline_duration_ms < 5_010.0);
    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectivityState::Offline, ConnectivityState::Online]
    );
}

#[tokio::test(start_paused = true)]
async fn test_recovery_counted_once_despite_failed_attempts() {
    let (engine, transport) = engine();
    let states = record_states(&engine);
    transport.set_probe_ok(false);
    engine.handle_offline();

    let mut delays = Vec::new();
    for _ in 0..3 {
        match engine.attempt_reconnect().await {
            ReconnectOutcome::Failed { next_delay } => delays.push(next_delay.as_millis()),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    assert_eq!(delays, vec![1_000, 2_000, 4_000]);
    assert_eq!(engine.state(), ConnectivityState::Reconnecting);
    assert_eq!(engine.status().reconnect_attempts, 3);

    transport.set_probe_ok(true);
    assert_eq!(engine.attempt_reconnect().await, ReconnectOutcome::Recovered);
    assert_eq!(engine.attempt_reconnect().await, ReconnectOutcome::Skipped);

    let metrics = engine.metrics();
    assert_eq!(metrics.successful_recoveries, 1);
    assert_eq!(metrics.failed_recoveries, 0);
    assert_eq!(engine.status().reconnect_attempts, 0);
    assert_eq!(
        *states.lock().unwrap(),
        vec![
            ConnectivityState::Offline,
            ConnectivityState::Reconnecting,
            ConnectivityState::Online,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnect_budget_keeps_retrying_at_cap() {
    let (engine, transport) = engine_with(RecoveryConfig::new().with_max_retries(3));
    transport.set_probe_ok(false);
    engine.handle_offline();

    let mut delays = Vec::new();
    for _ in 0..6 {
        if let ReconnectOutcome::Failed { next_delay } = engine.attempt_reconnect().await {
            delays.push(next_delay.as_millis());
        }
    }

    // attempt 3 is the last one within the budget
    assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 30_000, 30_000]);
    assert_eq!(engine.metrics().failed_recoveries, 1);
    assert_eq!(engine.state(), ConnectivityState::Reconnecting);
}

#[tokio::test(start_paused = true)]
async fn test_check_connection_drives_state() {
    let (engine, transport) = engine();

    assert!(engine.check_connection().await);
    assert_eq!(engine.state(), ConnectivityState::Online);

    transport.set_probe_ok(false);
    assert!(!engine.check_connection().await);
    assert_eq!(engine.state(), ConnectivityState::Offline);
    assert_eq!(engine.metrics().total_disconnections, 1);

    transport.set_probe_ok(true);
    assert!(engine.check_connection().await);
    assert_eq!(engine.state(), ConnectivityState::Online);
    assert_eq!(engine.metrics().successful_recoveries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_type_change_is_not_a_transition() {
    let (engine, _transport) = engine();
    let states = record_states(&engine);

    engine.handle_connection_change(ConnectionInfo {
        connection_type: ConnectionType::Cellular,
        effective_type: Some("3g".into()),
        downlink_mbps: Some(1.5),
    });

    assert_eq!(engine.metrics().network_transitions, 1);
    assert_eq!(engine.state(), ConnectivityState::Online);
    assert!(states.lock().unwrap().is_empty());
}

// === Quality monitor ===

fn with_link(
    config: RecoveryConfig,
    downlink: Option<f64>,
) -> (RecoveryEngine, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new();
    let provider = StaticConnectionInfo(ConnectionInfo {
        connection_type: ConnectionType::Wifi,
        effective_type: None,
        downlink_mbps: downlink,
    });
    let engine = RecoveryEngine::builder(transport.clone())
        .config(config)
        .connection_info(Arc::new(provider))
        .build()
        .unwrap();
    (engine, transport)
}

#[tokio::test(start_paused = true)]
async fn test_quality_drives_degraded_and_back() {
    let config = RecoveryConfig {
        quality_samples: 10,
        ..Default::default()
    };
    let (engine, transport) = with_link(config, Some(2.0));
    let states = record_states(&engine);

    transport.set_latency(Duration::from_millis(250));
    let quality = engine.quality_tick().await.unwrap();
    // high latency + moderate bandwidth
    assert_eq!(quality.score, 40);
    assert_eq!(engine.state(), ConnectivityState::Degraded);
    assert!(engine.is_online());
    assert!(engine.can_sync());

    transport.set_latency(Duration::from_millis(20));
    let quality = engine.quality_tick().await.unwrap();
    assert_eq!(quality.score, 80);
    assert_eq!(engine.state(), ConnectivityState::Online);

    assert_eq!(
        *states.lock().unwrap(),
        vec![ConnectivityState::Degraded, ConnectivityState::Online]
    );
    // seeded from the provider, not counted as a change
    assert_eq!(engine.metrics().network_transitions, 0);
    assert_eq!(engine.metrics().total_disconnections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_quality_probe_failure_degrades_without_going_offline() {
    let (engine, transport) = with_link(RecoveryConfig::default(), None);
    transport.set_probe_ok(false);

    let quality = engine.quality_tick().await.unwrap();
    assert_eq!(quality.score, 0);
    assert_eq!(engine.state(), ConnectivityState::Degraded);
    assert_eq!(engine.metrics().total_disconnections, 0);
}

#[tokio::test(start_paused = true)]
async fn test_quality_tick_skipped_while_offline() {
    let (engine, transport) = engine();
    engine.handle_offline();
    assert!(engine.quality_tick().await.is_none());
    assert_eq!(transport.probes(), 0);
}

// === Started engine: scheduled tasks ===

#[tokio::test(start_paused = true)]
async fn test_auto_sync_after_recovery() {
    let (engine, transport) = engine();
    let drained = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&drained);
    engine.on_queue_drained(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    transport.set_probe_ok(false);
    assert!(engine.start());

    engine.handle_offline();
    engine.queue_request(post("a"), priority(1)).unwrap();
    engine.queue_request(post("b"), priority(2)).unwrap();

    engine.handle_online();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(transport.sent(), vec![url("b"), url("a")]);
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(engine.metrics().requests_replayed, 2);
    assert_eq!(drained.load(Ordering::SeqCst), 1);
    assert!(!engine.status().reconnect_scheduled);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_loop_recovers_and_replays() {
    let (engine, transport) = engine();
    transport.set_probe_ok(false);
    engine.start();

    engine.handle_offline();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    // first attempt at 1s fails, next one is due 1s later
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(engine.state(), ConnectivityState::Reconnecting);
    assert_eq!(transport.probes(), 1);

    transport.set_probe_ok(true);
    tokio::time::sleep(Duration::from_millis(1_000)).await;

    assert_eq!(engine.state(), ConnectivityState::Online);
    assert_eq!(engine.queue_len(), 0);
    let metrics = engine.metrics();
    assert_eq!(metrics.successful_recoveries, 1);
    assert_eq!(metrics.requests_replayed, 1);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sync_drains_new_work() {
    let (engine, transport) = engine();
    engine.start();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_millis(4_000)).await;
    assert_eq!(engine.queue_len(), 1);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(transport.sent(), vec![url("a")]);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_paused_sync_holds_queue_until_resumed() {
    let (engine, transport) = engine();
    engine.start();
    engine.pause_sync();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(engine.queue_len(), 1);
    assert!(!engine.can_sync());

    engine.resume_sync();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(transport.sent(), vec![url("a")]);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_resets_attempts() {
    let (engine, transport) = engine();
    transport.set_probe_ok(false);
    engine.start();
    engine.handle_offline();

    // attempts at 1s, 2s, 4s
    tokio::time::sleep(Duration::from_millis(7_500)).await;
    assert_eq!(engine.status().reconnect_attempts, 3);

    engine.force_reconnect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.status().reconnect_attempts, 1);
    assert_eq!(transport.probes(), 4);

    transport.set_probe_ok(true);
    engine.force_reconnect();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.state(), ConnectivityState::Online);
    engine.dispose();
}

#[tokio::test(start_paused = true)]
async fn test_force_reconnect_while_online_detects_outage() {
    let (engine, transport) = engine();
    transport.set_probe_ok(false);

    engine.force_reconnect();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.state(), ConnectivityState::Offline);
    assert_eq!(engine.metrics().total_disconnections, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_cancels_every_timer() {
    let (engine, transport) = engine();
    let states = record_states(&engine);
    transport.set_probe_ok(false);
    engine.start();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();
    engine.handle_offline();
    assert_eq!(states.lock().unwrap().len(), 1);

    engine.dispose();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.probes(), 0);
    assert!(transport.sent().is_empty());
    assert_eq!(states.lock().unwrap().len(), 1);
    assert!(!engine.status().reconnect_scheduled);

    engine.handle_online();
    assert_eq!(engine.state(), ConnectivityState::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_engine_stops_tasks() {
    let (engine, transport) = engine();
    transport.set_probe_ok(false);
    engine.start();
    engine.handle_offline();
    drop(engine);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.probes(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_signal_subscription() {
    let (engine, _transport) = engine();
    let (tx, rx) = mpsc::channel(8);
    assert!(engine.attach_signals(rx));

    tx.send(ConnectivitySignal::WentOffline).await.unwrap();
    tx.send(ConnectivitySignal::ConnectionChanged(ConnectionInfo {
        connection_type: ConnectionType::Ethernet,
        ..Default::default()
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(engine.state(), ConnectivityState::Offline);
    assert_eq!(engine.metrics().network_transitions, 1);

    engine.dispose();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(tx.send(ConnectivitySignal::WentOnline).await.is_err());
    assert_eq!(engine.state(), ConnectivityState::Offline);
}

#[tokio::test(start_paused = true)]
async fn test_update_config_restarts_intervals() {
    let (engine, transport) = engine();
    engine.start();
    engine
        .update_config(RecoveryConfigUpdate {
            sync_interval_ms: Some(60_000),
            ..Default::default()
        })
        .unwrap();
    engine.queue_request(post("a"), QueueOptions::default()).unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(engine.queue_len(), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(engine.queue_len(), 0);
    assert_eq!(transport.sent(), vec![url("a")]);
    engine.dispose();
}
