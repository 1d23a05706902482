//! Error responses for the HTTP surface.
//!
//! Maps core [`GateError`]s onto HTTP statuses with structured JSON bodies.
//! Upstream HTTP errors are the exception: their status and body pass
//! through to the caller verbatim.

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use cometgate_types::{GateError, TransportKind};
use serde::Serialize;

/// Advisory retry delay for 503 responses, in seconds.
const RETRY_AFTER_SECS: u64 = 5;

/// Structured JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    /// Stable machine-readable error kind.
    error: &'static str,
    /// Human-readable message.
    message: String,
    /// The request path that failed.
    path: &'a str,
    /// RFC 3339 timestamp.
    timestamp: String,
}

/// A core error paired with the request path it occurred on.
#[derive(Debug)]
pub struct ServerError {
    error: GateError,
    path: String,
}

impl ServerError {
    /// Wrap a core error for the given request path.
    #[must_use]
    pub fn new(error: GateError, path: impl Into<String>) -> Self {
        Self { error, path: path.into() }
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self.error.root_cause() {
            GateError::NoUpstreamsAvailable { .. } | GateError::NotReady { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            GateError::ChainNotFound { .. } => StatusCode::NOT_FOUND,
            GateError::UpstreamHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GateError::UpstreamTransport { kind: TransportKind::Timeout, .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }
            GateError::UpstreamTransport { .. } => StatusCode::BAD_GATEWAY,
            GateError::RegistryFetch { .. }
            | GateError::AllAttemptsFailed { .. }
            | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.error, self.path)
    }
}

impl std::error::Error for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Upstream HTTP errors pass through the original status and body.
        if let Some((_, body)) = self.error.upstream_response() {
            let mut response = (status, body.clone()).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            return response;
        }

        let body = ErrorBody {
            error: self.error.kind(),
            message: self.error.to_string(),
            path: &self.path,
            timestamp: Utc::now().to_rfc3339(),
        };
        let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| {
            br#"{"error":"internal_error","message":"error serialization failed"}"#.to_vec()
        });

        let mut response = (status, bytes).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if status == StatusCode::SERVICE_UNAVAILABLE {
            if let Ok(value) = HeaderValue::from_str(&RETRY_AFTER_SECS.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
