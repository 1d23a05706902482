#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

use std::{collections::HashSet, path::Path, time::Duration};

use eyre::{Context, bail, ensure};
use serde::{Deserialize, Serialize};

/// Default server host address.
pub const DEFAULT_HOST: &str = "0.0.0.0";
/// Default server port.
pub const DEFAULT_PORT: u16 = 3000;
/// Default health probe cadence in milliseconds.
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;
/// Default registry poll cadence in milliseconds.
pub const DEFAULT_REGISTRY_UPDATE_INTERVAL_MS: u64 = 600_000;
/// Minimum allowed registry poll cadence in milliseconds.
pub const MIN_REGISTRY_UPDATE_INTERVAL_MS: u64 = 60_000;
/// Default inclusive max distance from the median height, in blocks.
pub const DEFAULT_SYNC_THRESHOLD_BLOCKS: u64 = 50;
/// Default upstream forward timeout in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
/// Default health probe timeout in milliseconds.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT_MS: u64 = 5_000;
/// Default registry fetch timeout in milliseconds.
pub const DEFAULT_REGISTRY_TIMEOUT_MS: u64 = 10_000;
/// Default registry fetch retries.
pub const DEFAULT_REGISTRY_MAX_RETRIES: u32 = 3;
/// Default upstream forward attempts.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Default base inter-retry delay in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
/// Default metrics listener port.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Front HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: DEFAULT_HOST.to_string(), port: DEFAULT_PORT }
    }
}

/// Engine tunables shared by every chain instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Probe cadence in milliseconds.
    pub health_check_interval_ms: u64,
    /// Registry poll cadence in milliseconds.
    pub registry_update_interval_ms: u64,
    /// Inclusive max |height − median| for an endpoint to count as synced.
    pub sync_threshold_blocks: u64,
    /// Upstream forward timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Health probe timeout in milliseconds.
    pub health_check_timeout_ms: u64,
    /// Registry fetch timeout in milliseconds.
    pub registry_timeout_ms: u64,
    /// Registry fetch retries before giving up.
    pub registry_max_retries: u32,
    /// Upstream forward attempts, capped by the pool size.
    pub retry_attempts: u32,
    /// Base inter-retry delay in milliseconds; grows linearly per attempt.
    pub retry_delay_ms: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            health_check_interval_ms: DEFAULT_HEALTH_CHECK_INTERVAL_MS,
            registry_update_interval_ms: DEFAULT_REGISTRY_UPDATE_INTERVAL_MS,
            sync_threshold_blocks: DEFAULT_SYNC_THRESHOLD_BLOCKS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            health_check_timeout_ms: DEFAULT_HEALTH_CHECK_TIMEOUT_MS,
            registry_timeout_ms: DEFAULT_REGISTRY_TIMEOUT_MS,
            registry_max_retries: DEFAULT_REGISTRY_MAX_RETRIES,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl ProxyConfig {
    /// Probe cadence as a [`Duration`].
    #[must_use]
    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Registry poll cadence as a [`Duration`].
    #[must_use]
    pub const fn registry_update_interval(&self) -> Duration {
        Duration::from_millis(self.registry_update_interval_ms)
    }

    /// Upstream forward timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub const fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Registry fetch timeout as a [`Duration`].
    #[must_use]
    pub const fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }

    /// Base inter-retry delay as a [`Duration`].
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// One proxied chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    /// Internal key, used in logs and operational endpoints.
    pub name: String,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: String,
    /// Remote registry URL listing this chain's endpoints.
    pub registry_url: String,
    /// URL prefix routed to the regular pool, e.g. `/gaia`.
    pub base_prefix: String,
    /// URL prefix routed to the archive pool, e.g. `/gaia/archive`.
    pub archive_prefix: String,
}

/// Prometheus metrics listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Whether the metrics listener is enabled.
    pub enabled: bool,
    /// Host address for the metrics listener.
    pub host: String,
    /// Port for the metrics listener.
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: false, host: DEFAULT_HOST.to_string(), port: DEFAULT_METRICS_PORT }
    }
}

/// Root configuration for the cometgate proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GateConfig {
    /// Front server configuration.
    pub server: ServerConfig,
    /// Engine tunables.
    pub proxy: ProxyConfig,
    /// Metrics listener configuration.
    pub metrics: MetricsConfig,
    /// Proxied chains.
    #[serde(default)]
    pub chains: Vec<ChainConfig>,
}

impl GateConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or if validation
    /// fails.
    ///
    /// # Example
    ///
    /// ```
    /// use cometgate_config::GateConfig;
    ///
    /// let toml = r#"
    /// [[chains]]
    /// name = "gaia"
    /// display_name = "Cosmos Hub"
    /// registry_url = "https://registry.example/gaia.json"
    /// base_prefix = "/gaia"
    /// archive_prefix = "/gaia/archive"
    /// "#;
    ///
    /// let config = GateConfig::parse(toml).unwrap();
    /// assert_eq!(config.chains.len(), 1);
    /// ```
    pub fn parse(s: &str) -> eyre::Result<Self> {
        let config: Self = toml::from_str(s).wrap_err("failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Checks that:
    /// - At least one chain is configured
    /// - Chain names and prefixes are unique
    /// - Prefixes start with `/` and archive prefixes strictly extend base
    ///   prefixes
    /// - Registry URLs are non-empty
    /// - The registry poll cadence respects its minimum
    /// - Ports and retry counts are non-zero
    ///
    /// # Errors
    ///
    /// Returns an error describing any validation failure.
    pub fn validate(&self) -> eyre::Result<()> {
        ensure!(!self.chains.is_empty(), "at least one chain must be configured");

        let mut names = HashSet::new();
        let mut prefixes = HashSet::new();
        for chain in &self.chains {
            ensure!(!chain.name.is_empty(), "chain name must not be empty");
            ensure!(names.insert(&chain.name), "duplicate chain name: {}", chain.name);
            ensure!(
                !chain.registry_url.is_empty(),
                "chain '{}' has empty registry URL",
                chain.name
            );

            for prefix in [&chain.base_prefix, &chain.archive_prefix] {
                ensure!(
                    prefix.starts_with('/') && prefix.len() > 1,
                    "chain '{}' has invalid prefix '{}'",
                    chain.name,
                    prefix
                );
                ensure!(
                    prefixes.insert(prefix),
                    "duplicate route prefix '{}' on chain '{}'",
                    prefix,
                    chain.name
                );
            }

            // Longest-prefix routing stays unambiguous only when the archive
            // prefix extends the base prefix.
            if !chain.archive_prefix.starts_with(chain.base_prefix.as_str()) {
                bail!(
                    "chain '{}': archive prefix '{}' must extend base prefix '{}'",
                    chain.name,
                    chain.archive_prefix,
                    chain.base_prefix
                );
            }
        }

        ensure!(self.server.port > 0, "server port must be greater than 0");
        if self.metrics.enabled {
            ensure!(self.metrics.port > 0, "metrics port must be greater than 0");
        }

        ensure!(
            self.proxy.registry_update_interval_ms >= MIN_REGISTRY_UPDATE_INTERVAL_MS,
            "registry_update_interval_ms must be at least {}",
            MIN_REGISTRY_UPDATE_INTERVAL_MS
        );
        ensure!(self.proxy.retry_attempts > 0, "retry_attempts must be greater than 0");
        ensure!(
            self.proxy.health_check_interval_ms > 0,
            "health_check_interval_ms must be greater than 0"
        );

        Ok(())
    }

    /// Serialize the configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> eyre::Result<String> {
        toml::to_string_pretty(self).wrap_err("failed to serialize configuration to TOML")
    }
}
