//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use resync_core::{
    reconnect_schedule, BackoffStrategy, HttpTransport, OutboundRequest, QueueOptions, RecoveryConfig,
    RecoveryConfigUpdate, RecoveryEngine,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Command-line overrides for the `backoff` subcommand.
#[derive(Debug, Default)]
pub struct BackoffOverrides {
    pub strategy: Option<BackoffStrategy>,
    pub max_retries: Option<u32>,
    pub initial_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub multiplier: Option<f64>,
}

/// Load the configuration file, or fall back to defaults.
pub fn load_config(path: Option<&Path>) -> Result<RecoveryConfig> {
    match path {
        Some(path) => RecoveryConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => Ok(RecoveryConfig::default()),
    }
}

/// Parse a `"METHOD URL"` request description.
pub fn parse_request(line: &str) -> Result<OutboundRequest> {
    let Some((method, url)) = line.trim().split_once(char::is_whitespace) else {
        bail!("Request must be written as \"METHOD URL\", got {:?}", line);
    };
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("Request URL must be http(s), got {:?}", url);
    }
    Ok(OutboundRequest::new(method.to_ascii_uppercase(), url))
}

/// Reconnect schedule rows: `(attempt, delay_ms)`.
///
/// Attempts past `max_retries` wait `max_delay_ms`, as the reconnect loop does.
pub fn schedule_rows(
    config: &RecoveryConfig,
    overrides: &BackoffOverrides,
    attempts: u32,
) -> Result<Vec<(u32, u64)>> {
    let config = config.merged(&RecoveryConfigUpdate {
        strategy: overrides.strategy,
        max_retries: overrides.max_retries,
        initial_delay_ms: overrides.initial_ms,
        max_delay_ms: overrides.max_ms,
        backoff_multiplier: overrides.multiplier,
        ..Default::default()
    })?;

    Ok(reconnect_schedule(attempts, &config)
        .into_iter()
        .zip(0..)
        .map(|(delay, attempt)| (attempt, delay.as_millis() as u64))
        .collect())
}

pub fn backoff(config: &RecoveryConfig, overrides: &BackoffOverrides, attempts: u32) -> Result<()> {
    let rows = schedule_rows(config, overrides, attempts)?;
    let cap = overrides.max_ms.unwrap_or(config.max_delay_ms);

    println!("{:>7}  {:>10}", "attempt", "delay_ms");
    for (attempt, delay_ms) in rows {
        let note = if delay_ms == cap { "  (capped)" } else { "" };
        println!("{:>7}  {:>10}{}", attempt, delay_ms, note);
    }
    Ok(())
}

pub fn show_config(config: &RecoveryConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Run the engine until Ctrl-C, then print the final metrics.
pub async fn watch(
    mut config: RecoveryConfig,
    probe_url: Option<String>,
    requests: &[String],
    status_every: u64,
) -> Result<()> {
    if let Some(url) = probe_url {
        config.probe_url = url;
    }
    let queued = requests
        .iter()
        .map(|line| parse_request(line))
        .collect::<Result<Vec<_>>>()?;

    info!("Starting recovery engine (probe: {})", config.probe_url);
    let transport = Arc::new(HttpTransport::new()?);
    let engine = RecoveryEngine::new(config, transport)?;

    engine.on_network_change(|state| info!("Network state: {}", state));
    engine.on_queue_drained(|| info!("Request queue drained"));

    let online = engine.check_connection().await;
    if online {
        info!("Initial connectivity check passed");
    } else {
        warn!("Initial connectivity check failed, starting offline");
    }

    for request in queued {
        let label = format!("{} {}", request.method, request.url);
        match engine.queue_request(request, QueueOptions::default()) {
            Some(id) => info!("Queued {} as {}", label, id),
            None => warn!("Engine refused to queue {}", label),
        }
    }

    engine.start();

    let mut ticker = tokio::time::interval(Duration::from_secs(status_every.max(1)));
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticker.tick(), if status_every > 0 => {
                println!("{}", serde_json::to_string(&engine.status())?);
            }
        }
    }

    info!("Shutdown signal received, disposing engine");
    engine.dispose();
    println!("{}", serde_json::to_string_pretty(&engine.metrics())?);
    Ok(())
}
