//! Chain lifecycle state and status/metrics snapshots.

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Endpoint;

/// Lifecycle state of a chain instance.
///
/// `Ready` and `Degraded` flip on crossing the threshold of at least one
/// healthy endpoint. `Stopping` and `Stopped` are terminal.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Instance constructed but not started.
    #[display("uninitialized")]
    Uninitialized,
    /// Initial fetch and probe round in progress.
    #[display("initializing")]
    Initializing,
    /// At least one healthy endpoint.
    #[display("ready")]
    Ready,
    /// Running, but no healthy endpoints.
    #[display("degraded")]
    Degraded,
    /// Shutdown in progress.
    #[display("stopping")]
    Stopping,
    /// Shutdown complete.
    #[display("stopped")]
    Stopped,
}

impl ChainState {
    /// Whether the instance can serve requests in this state.
    #[must_use]
    pub const fn is_serving(&self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }

    /// Whether this state is terminal for the instance.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

/// Point-in-time status snapshot for one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainStatus {
    /// Internal chain key.
    pub chain: String,
    /// Display name.
    pub display_name: String,
    /// Current lifecycle state.
    pub state: ChainState,
    /// Endpoints in the latest registry snapshot.
    pub total_endpoints: usize,
    /// Endpoints currently classified healthy.
    pub healthy_endpoints: usize,
    /// Healthy endpoints with full history.
    pub archive_endpoints: usize,
    /// Median height over live endpoints, 0 if none report.
    pub median_height: u64,
    /// When the last probe round completed.
    pub last_probe: Option<DateTime<Utc>>,
    /// Per-endpoint detail.
    pub endpoints: Vec<Endpoint>,
}

impl ChainStatus {
    /// Whether the chain reports ready (≥ 1 healthy endpoint).
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self.state, ChainState::Ready)
    }
}

/// Request counters and latency for one chain.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ChainMetrics {
    /// Total routed requests.
    pub total_requests: u64,
    /// Requests that returned an upstream response.
    pub successful_requests: u64,
    /// Requests that failed after retries.
    pub failed_requests: u64,
    /// Exponentially-smoothed end-to-end response time.
    pub avg_response_time_ms: f64,
    /// successful / total, 1.0 when no requests yet.
    pub success_rate: f64,
}

/// Aggregate counts across every chain, for the basic health endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ManagerSummary {
    /// Configured chains.
    pub chains_total: usize,
    /// Chains currently ready.
    pub chains_ready: usize,
    /// Endpoints across all chains.
    pub endpoints_total: usize,
    /// Healthy endpoints across all chains.
    pub endpoints_healthy: usize,
    /// True iff every chain reports ready.
    pub ready: bool,
}

/// Aggregate status: summary plus per-chain detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    /// Summary counts.
    pub summary: ManagerSummary,
    /// Per-chain snapshots.
    pub chains: Vec<ChainStatus>,
}
