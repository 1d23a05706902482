//! Upstream request forwarding.

use std::time::{Duration, Instant};

use bytes::Bytes;
use cometgate_types::{GateError, TransportKind};

/// User agent sent on every forwarded request.
const PROXY_USER_AGENT: &str = concat!("cometgate/", env!("CARGO_PKG_VERSION"));

/// A client request ready to be forwarded upstream.
#[derive(Debug, Clone)]
pub enum ProxyRequest {
    /// POST the client's JSON body to the upstream base URL, byte-for-byte.
    Post {
        /// The inbound request body, forwarded verbatim.
        body: Bytes,
    },
    /// GET the RPC path (with query string) appended to the upstream URL.
    Get {
        /// Path and query as parsed from the inbound URL, e.g. `/status?x=1`.
        request_path: String,
    },
}

/// A successful upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// Response body, verbatim.
    pub body: Bytes,
    /// Upstream HTTP status (2xx–3xx).
    pub status: u16,
    /// Measured forward time in milliseconds.
    pub response_time_ms: u64,
}

/// Forwards requests to upstream endpoints over a shared HTTP client.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    /// Create a forwarder over the chain's shared client.
    #[must_use]
    pub const fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Forward one request to `url` and return the upstream body verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::UpstreamTransport`] for connection-level
    /// failures (classified by kind) and [`GateError::UpstreamHttp`] for
    /// HTTP statuses ≥ 400, preserving the status and body.
    pub async fn forward(
        &self,
        url: &str,
        request: &ProxyRequest,
    ) -> Result<UpstreamResponse, GateError> {
        let builder = match request {
            ProxyRequest::Post { body } => self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone()),
            ProxyRequest::Get { request_path } => {
                self.client.get(format!("{url}{request_path}"))
            }
        };

        let start = Instant::now();
        let response = builder
            .header(reqwest::header::USER_AGENT, PROXY_USER_AGENT)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GateError::UpstreamTransport {
                url: url.to_string(),
                kind: classify_transport(&e),
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| GateError::UpstreamTransport {
            url: url.to_string(),
            kind: classify_transport(&e),
        })?;
        let response_time_ms = start.elapsed().as_millis() as u64;

        if status.as_u16() >= 400 {
            return Err(GateError::UpstreamHttp { url: url.to_string(), status: status.as_u16(), body });
        }

        Ok(UpstreamResponse { body, status: status.as_u16(), response_time_ms })
    }
}

/// Map a reqwest error onto the transport taxonomy.
fn classify_transport(error: &reqwest::Error) -> TransportKind {
    if error.is_timeout() {
        return TransportKind::Timeout;
    }

    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return TransportKind::ConnectRefused;
            }
        }
        let text = cause.to_string();
        if text.contains("dns error") || text.contains("failed to lookup") {
            return TransportKind::DnsFailure;
        }
        if text.contains("certificate") || text.contains("tls") {
            return TransportKind::Tls;
        }
        source = cause.source();
    }

    if error.is_connect() {
        return TransportKind::ConnectRefused;
    }
    TransportKind::Other
}
