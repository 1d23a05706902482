//! Error types for the cometgate proxy.

use bytes::Bytes;
use derive_more::{Debug, Display, Error};

/// Which upstream pool a request targets.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// The regular healthy pool.
    #[display("regular")]
    Regular,
    /// The archive sub-pool.
    #[display("archive")]
    Archive,
}

/// Classification of a transport-level upstream failure.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// TCP connection was refused.
    #[display("connection refused")]
    ConnectRefused,
    /// Hostname could not be resolved.
    #[display("name resolution failed")]
    DnsFailure,
    /// The request exceeded its deadline.
    #[display("timeout")]
    Timeout,
    /// TLS handshake or certificate failure.
    #[display("tls failure")]
    Tls,
    /// Any other transport failure.
    #[display("connection error")]
    Other,
}

/// Error type for the cometgate proxy.
#[derive(Debug, Display, Error)]
#[error(ignore)]
pub enum GateError {
    /// Registry could not be fetched or parsed.
    #[display("registry fetch failed for chain {chain}: {reason}")]
    RegistryFetch {
        /// Chain whose registry failed.
        chain: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// The target pool had no members at selection time.
    #[display("no upstreams available in {pool} pool")]
    NoUpstreamsAvailable {
        /// Pool that was empty.
        pool: PoolKind,
    },

    /// Transport-level failure talking to an upstream.
    #[display("upstream {url} unreachable: {kind}")]
    UpstreamTransport {
        /// Upstream base URL.
        url: String,
        /// Failure classification.
        kind: TransportKind,
    },

    /// Upstream answered with a non-success HTTP status.
    #[display("upstream {url} returned HTTP {status}")]
    UpstreamHttp {
        /// Upstream base URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Upstream response body, preserved verbatim.
        #[debug("{} bytes", body.len())]
        body: Bytes,
    },

    /// Every retry attempt failed; wraps the final cause.
    #[display("all {attempts} attempts failed, last error: {last}")]
    AllAttemptsFailed {
        /// Number of attempts made.
        attempts: u32,
        /// The error from the final attempt.
        last: Box<GateError>,
    },

    /// No configured chain matches the request path.
    #[display("no chain matches path {path}")]
    ChainNotFound {
        /// The inbound request path.
        path: String,
    },

    /// The chain (or manager) has not finished initializing.
    #[display("chain {chain} is not ready")]
    NotReady {
        /// Chain that is not ready.
        chain: String,
    },

    /// Internal invariant violation.
    #[display("internal error: {_0}")]
    Internal(String),
}

impl GateError {
    /// Stable machine-readable kind string, used in JSON error bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RegistryFetch { .. } => "registry_fetch_error",
            Self::NoUpstreamsAvailable { .. } => "no_upstreams_available",
            Self::UpstreamTransport { .. } => "upstream_transport_error",
            Self::UpstreamHttp { .. } => "upstream_http_error",
            Self::AllAttemptsFailed { .. } => "all_attempts_failed",
            Self::ChainNotFound { .. } => "chain_not_found",
            Self::NotReady { .. } => "not_ready",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Whether the balancer should retry this error on another upstream.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamTransport { .. } | Self::UpstreamHttp { .. })
    }

    /// Whether the underlying transport failure was a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTransport { kind: TransportKind::Timeout, .. })
    }

    /// The preserved upstream status and body, if this error carries one.
    ///
    /// Walks through [`GateError::AllAttemptsFailed`] to the final cause.
    #[must_use]
    pub fn upstream_response(&self) -> Option<(u16, &Bytes)> {
        match self {
            Self::UpstreamHttp { status, body, .. } => Some((*status, body)),
            Self::AllAttemptsFailed { last, .. } => last.upstream_response(),
            _ => None,
        }
    }

    /// The final underlying cause, unwrapping retry exhaustion.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::AllAttemptsFailed { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn transport(kind: TransportKind) -> GateError {
        GateError::UpstreamTransport { url: "https://a.example".to_string(), kind }
    }

    fn http(status: u16) -> GateError {
        GateError::UpstreamHttp {
            url: "https://a.example".to_string(),
            status,
            body: Bytes::from_static(b"{}"),
        }
    }

    /// Test that kind strings are stable for each error variant.
    #[rstest]
    #[case::registry(GateError::RegistryFetch { chain: "gaia".into(), reason: "timeout".into() }, "registry_fetch_error")]
    #[case::no_upstreams(GateError::NoUpstreamsAvailable { pool: PoolKind::Regular }, "no_upstreams_available")]
    #[case::transport(transport(TransportKind::ConnectRefused), "upstream_transport_error")]
    #[case::http(http(502), "upstream_http_error")]
    #[case::exhausted(GateError::AllAttemptsFailed { attempts: 3, last: Box::new(http(502)) }, "all_attempts_failed")]
    #[case::not_found(GateError::ChainNotFound { path: "/nope".into() }, "chain_not_found")]
    #[case::not_ready(GateError::NotReady { chain: "gaia".into() }, "not_ready")]
    #[case::internal(GateError::Internal("broken".into()), "internal_error")]
    fn test_kind_strings(#[case] error: GateError, #[case] expected: &str) {
        assert_eq!(error.kind(), expected);
    }

    /// Test retryability per error variant.
    #[rstest]
    #[case::transport(transport(TransportKind::Timeout), true)]
    #[case::http(http(500), true)]
    #[case::no_upstreams(GateError::NoUpstreamsAvailable { pool: PoolKind::Archive }, false)]
    #[case::not_found(GateError::ChainNotFound { path: "/x".into() }, false)]
    #[case::not_ready(GateError::NotReady { chain: "gaia".into() }, false)]
    #[case::internal(GateError::Internal("oops".into()), false)]
    fn test_is_retryable(#[case] error: GateError, #[case] expected: bool) {
        assert_eq!(error.is_retryable(), expected);
    }

    #[test]
    fn test_upstream_response_preserved_through_exhaustion() {
        let err = GateError::AllAttemptsFailed { attempts: 3, last: Box::new(http(502)) };
        let (status, body) = err.upstream_response().expect("should carry upstream response");
        assert_eq!(status, 502);
        assert_eq!(body.as_ref(), b"{}");
    }

    #[test]
    fn test_root_cause_unwraps_nested_exhaustion() {
        let inner = transport(TransportKind::DnsFailure);
        let err = GateError::AllAttemptsFailed { attempts: 2, last: Box::new(inner) };
        assert!(matches!(
            err.root_cause(),
            GateError::UpstreamTransport { kind: TransportKind::DnsFailure, .. }
        ));
    }

    #[test]
    fn test_is_timeout() {
        assert!(transport(TransportKind::Timeout).is_timeout());
        assert!(!transport(TransportKind::ConnectRefused).is_timeout());
        assert!(!http(504).is_timeout());
    }

    /// Test that error Display messages contain expected substrings.
    #[rstest]
    #[case::registry(GateError::RegistryFetch { chain: "gaia".into(), reason: "empty array".into() }, "gaia")]
    #[case::no_upstreams(GateError::NoUpstreamsAvailable { pool: PoolKind::Archive }, "archive")]
    #[case::transport(transport(TransportKind::ConnectRefused), "connection refused")]
    #[case::http(http(429), "429")]
    #[case::not_found(GateError::ChainNotFound { path: "/osmo/status".into() }, "/osmo/status")]
    fn test_error_display(#[case] error: GateError, #[case] expected: &str) {
        assert!(
            error.to_string().contains(expected),
            "Expected '{}' to contain '{}'",
            error,
            expected
        );
    }
}
