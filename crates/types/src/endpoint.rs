//! Upstream endpoint records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registry entry: a normalized base URL plus its contributor name.
///
/// Identity is the normalized URL; the contributor name is informational and
/// does not participate in set comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEndpoint {
    /// Normalized base URL (http/https, no trailing slash).
    pub url: String,
    /// Human-readable contributor name.
    pub name: String,
}

impl RegistryEndpoint {
    /// Create a new registry endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self { url: url.into(), name: name.into() }
    }
}

/// The full health record for one upstream endpoint.
///
/// Created when an endpoint first appears in a registry snapshot and updated
/// after every probe round. Identity is the normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Normalized base URL.
    pub url: String,
    /// Human-readable contributor name.
    pub name: String,
    /// Whether the most recent probe succeeded within the liveness window.
    pub live: bool,
    /// Whether the most recent probe classified this endpoint healthy.
    pub healthy: bool,
    /// Whether this endpoint retains full history (earliest block is 1).
    pub archive: bool,
    /// Last observed block height, if any probe has succeeded.
    pub height: Option<u64>,
    /// Last observed `catching_up` flag.
    pub catching_up: bool,
    /// Last probe response time in milliseconds.
    pub response_time_ms: u64,
    /// Total probe failures observed.
    pub error_count: u64,
    /// Consecutive probe failures; reset on any success.
    pub consecutive_failures: u32,
    /// When this endpoint was last probed.
    pub last_checked: Option<DateTime<Utc>>,
    /// Description of the most recent probe failure.
    pub last_error: Option<String>,
}

impl Endpoint {
    /// Create a fresh, never-probed record for a registry entry.
    #[must_use]
    pub fn from_registry(entry: &RegistryEndpoint) -> Self {
        Self {
            url: entry.url.clone(),
            name: entry.name.clone(),
            live: false,
            healthy: false,
            archive: false,
            height: None,
            catching_up: false,
            response_time_ms: 0,
            error_count: 0,
            consecutive_failures: 0,
            last_checked: None,
            last_error: None,
        }
    }

    /// Whether this endpoint has ever completed a probe.
    #[must_use]
    pub const fn probed(&self) -> bool {
        self.last_checked.is_some()
    }
}
