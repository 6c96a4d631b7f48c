//! Connectivity tracking, link quality, and the transports the engine talks
//! through.
//!
//! This module provides:
//! - Reconnect backoff delays (exponential, linear, immediate)
//! - Rolling-window link quality scoring
//! - The online/offline/reconnecting/degraded state machine
//! - The transport seam plus a reqwest implementation

mod backoff;
mod http;
mod quality;
mod state;
mod transport;

pub use backoff::{backoff_delay, reconnect_delay, reconnect_schedule, with_jitter};
pub use http::HttpTransport;
pub use quality::{quality_score, QualityMetrics, QualityMonitor, DEFAULT_BANDWIDTH_MBPS};
pub use state::{ConnectivityState, ConnectivityTracker, Transition};
pub use transport::{
    ConnectionInfo, ConnectionInfoProvider, ConnectionType, ConnectivitySignal, DynConnectionInfo,
    DynTransport, OutboundRequest, StaticConnectionInfo, Transport,
};
