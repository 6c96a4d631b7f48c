//! Resync Core - network recovery and request replay engine.
//!
//! This crate keeps client work alive across connectivity loss. It tracks the
//! connection state, buffers failed outbound requests, replays them in
//! priority order once the link returns, and scores link quality so callers
//! can back off before a full outage. It has no UI coupling; anything that
//! wants to react subscribes through the engine's listeners.
//!
//! # Example
//!
//! ```rust,no_run
//! use resync_core::{HttpTransport, OutboundRequest, QueueOptions, RecoveryConfig, RecoveryEngine};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> resync_core::Result<()> {
//!     let transport = Arc::new(HttpTransport::new()?);
//!     let engine = RecoveryEngine::new(RecoveryConfig::default(), transport)?;
//!
//!     engine.on_network_change(|state| println!("network is now {state}"));
//!     engine.start();
//!
//!     // Buffer a write while the link is down; it is replayed on recovery.
//!     engine.handle_offline();
//!     engine.queue_request(
//!         OutboundRequest::post("https://api.example.com/notes").with_body("{}"),
//!         QueueOptions::default().with_priority(10),
//!     );
//!
//!     engine.handle_online();
//!     engine.dispose();
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod sync;

mod scheduler;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{BackoffStrategy, RecoveryConfig, RecoveryConfigUpdate, RecoveryDefaults};
pub use engine::{EngineStatus, ReconnectOutcome, RecoveryEngine, RecoveryEngineBuilder};
pub use error::{ResyncError, Result};
pub use events::{ListenerId, RecoveryMetrics};
pub use network::{
    backoff_delay, quality_score, reconnect_delay, reconnect_schedule, ConnectionInfo, ConnectionInfoProvider, ConnectionType,
    ConnectivitySignal, ConnectivityState, HttpTransport, OutboundRequest, QualityMetrics,
    StaticConnectionInfo, Transport,
};
pub use sync::{DrainReport, DrainSkip, QueueOptions, QueuedRequest, RequestId};
