//! External collaborators of the engine.
//!
//! The engine never talks to the network itself. It sends requests and probes
//! through a [`Transport`], reads link hints from a [`ConnectionInfoProvider`]
//! and listens for [`ConnectivitySignal`]s from the host platform.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// An outbound HTTP-like request. The engine never interprets the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
    pub body: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
}

impl OutboundRequest {
    /// Create a request with the given method and URL.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            body: None,
            headers: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// A lightweight connectivity probe.
    pub fn probe(url: impl Into<String>) -> Self {
        Self::new("HEAD", url)
    }

    /// Attach a body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }
}

/// Sends requests on behalf of the engine.
///
/// Used both to replay queued requests and to probe connectivity; the engine
/// only looks at success versus failure and at elapsed time.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`, giving up after `timeout`.
    async fn send(&self, request: &OutboundRequest, timeout: Duration) -> Result<()>;
}

/// Shared handle to a transport.
pub type DynTransport = Arc<dyn Transport>;

/// Coarse connection type reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Wifi,
    Cellular,
    Ethernet,
    None,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionType::Wifi => write!(f, "wifi"),
            ConnectionType::Cellular => write!(f, "cellular"),
            ConnectionType::Ethernet => write!(f, "ethernet"),
            ConnectionType::None => write!(f, "none"),
            ConnectionType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Link description from the host's network-info API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_type: ConnectionType,
    /// e.g. "4g", "3g", "slow-2g".
    pub effective_type: Option<String>,
    /// Estimated downlink in megabits per second.
    pub downlink_mbps: Option<f64>,
}

/// Polled for link hints on every quality tick and on change events.
pub trait ConnectionInfoProvider: Send + Sync {
    fn connection_info(&self) -> ConnectionInfo;
}

/// Shared handle to a connection info provider.
pub type DynConnectionInfo = Arc<dyn ConnectionInfoProvider>;

/// A provider that always reports the same link.
#[derive(Debug, Clone, Default)]
pub struct StaticConnectionInfo(pub ConnectionInfo);

impl ConnectionInfoProvider for StaticConnectionInfo {
    fn connection_info(&self) -> ConnectionInfo {
        self.0.clone()
    }
}

/// Events emitted by the host's connectivity signal source.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectivitySignal {
    WentOnline,
    WentOffline,
    ConnectionChanged(ConnectionInfo),
}
