//! reqwest-backed [`Transport`].
//!
//! Any 2xx or 3xx answer counts as delivered. Everything else, including
//! connection errors and timeouts, is reported as a failure and left to the
//! engine's retry policy.

use crate::network::transport::{OutboundRequest, Transport};
use crate::{ResyncError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("resync/", env!("CARGO_PKG_VERSION"));

/// HTTP transport for replaying queued requests and probing connectivity.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with a fresh reqwest client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ResyncError::Network {
                message: format!("Failed to create HTTP client: {}", e),
                cause: None,
            })?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Whether a status means the request was delivered.
    pub fn is_delivered(status: StatusCode) -> bool {
        status.is_success() || status.is_redirection()
    }

    fn build(&self, request: &OutboundRequest, timeout: Duration) -> Result<reqwest::RequestBuilder> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|_| {
            ResyncError::InvalidRequest {
                message: format!("unsupported method {:?}", request.method),
            }
        })?;

        let mut builder = self.client.request(method, &request.url).timeout(timeout);
        if let Some(headers) = &request.headers {
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &OutboundRequest, timeout: Duration) -> Result<()> {
        let response = self.build(request, timeout)?.send().await.map_err(|e| {
            if e.is_timeout() {
                ResyncError::Timeout(timeout)
            } else {
                ResyncError::from(e)
            }
        })?;

        let status = response.status();
        debug!("{} {} -> {}", request.method, request.url, status);
        if Self::is_delivered(status) {
            Ok(())
        } else {
            Err(ResyncError::Http {
                status: status.as_u16(),
            })
        }
    }
}
