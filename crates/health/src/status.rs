//! CometBFT `/status` payload shapes.

use serde::{Deserialize, Serialize};

/// Top-level `/status` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// JSON-RPC result wrapper.
    pub result: StatusResult,
}

/// The `result` object of a `/status` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResult {
    /// Node sync state.
    pub sync_info: SyncInfo,
}

/// The `sync_info` object. Heights are decimal strings on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Latest block height as a decimal string.
    pub latest_block_height: String,
    /// Earliest retained block height as a decimal string.
    pub earliest_block_height: String,
    /// Whether the node is still catching up to the chain tip.
    pub catching_up: bool,
}

impl SyncInfo {
    /// Parse the latest height. Any non-integer payload fails the probe.
    ///
    /// # Errors
    ///
    /// Returns the unparseable raw value.
    pub fn latest_height(&self) -> Result<u64, String> {
        self.latest_block_height
            .parse::<u64>()
            .map_err(|_| format!("unparseable latest_block_height: {:?}", self.latest_block_height))
    }
}
