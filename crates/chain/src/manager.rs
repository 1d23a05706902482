//! Multi-chain supervision and path routing.

use std::sync::Arc;

use cometgate_config::GateConfig;
use cometgate_types::{ChainMetrics, GateError, ManagerStatus, ManagerSummary, PoolKind};
use futures::future::{join_all, try_join_all};
use tracing::info;

use crate::instance::ChainInstance;

/// A resolved inbound path: the owning chain, the target pool, and the RPC
/// path remainder after the matched prefix.
#[derive(Debug, Clone)]
pub struct ResolvedRoute {
    /// The chain instance owning the matched prefix.
    pub chain: Arc<ChainInstance>,
    /// Archive pool when the archive prefix matched.
    pub pool: PoolKind,
    /// Path remainder after the prefix, e.g. `/status`.
    pub rpc_path: String,
}

/// Owns one [`ChainInstance`] per configured chain.
///
/// Requests for different chains never contend for the same state; each
/// instance runs its own schedulers over its own connection pool.
#[derive(Debug)]
pub struct ChainManager {
    chains: Vec<Arc<ChainInstance>>,
}

impl ChainManager {
    /// Initialize every configured chain in parallel.
    ///
    /// # Errors
    ///
    /// Startup fails if any single instance fails to initialize.
    pub async fn start(config: &GateConfig) -> Result<Self, GateError> {
        let chains = try_join_all(
            config
                .chains
                .iter()
                .map(|chain| ChainInstance::start(chain.clone(), &config.proxy)),
        )
        .await?;

        info!(chains = chains.len(), "all chains initialized");
        Ok(Self { chains })
    }

    /// Every managed chain, in configuration order.
    #[must_use]
    pub fn chains(&self) -> &[Arc<ChainInstance>] {
        &self.chains
    }

    /// Look up a chain by its internal key.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ChainInstance>> {
        self.chains.iter().find(|c| c.name() == name).cloned()
    }

    /// Resolve an inbound path to a chain and pool by longest prefix match.
    ///
    /// Archive prefixes strictly extend base prefixes, so the longer match
    /// selects the archive pool.
    ///
    /// # Errors
    ///
    /// [`GateError::ChainNotFound`] when no configured prefix matches.
    pub fn resolve(&self, path: &str) -> Result<ResolvedRoute, GateError> {
        let mut best: Option<(usize, ResolvedRoute)> = None;

        for chain in &self.chains {
            let config = chain.config();
            let candidates = [
                (config.archive_prefix.as_str(), PoolKind::Archive),
                (config.base_prefix.as_str(), PoolKind::Regular),
            ];
            for (prefix, pool) in candidates {
                if !prefix_matches(path, prefix) {
                    continue;
                }
                if best.as_ref().is_none_or(|(len, _)| prefix.len() > *len) {
                    best = Some((
                        prefix.len(),
                        ResolvedRoute {
                            chain: Arc::clone(chain),
                            pool,
                            rpc_path: path[prefix.len()..].to_string(),
                        },
                    ));
                }
            }
        }

        best.map(|(_, route)| route)
            .ok_or_else(|| GateError::ChainNotFound { path: path.to_string() })
    }

    /// Aggregate status: summary counts plus per-chain detail.
    pub async fn status(&self) -> ManagerStatus {
        let chains = join_all(self.chains.iter().map(|c| c.status())).await;

        let chains_ready = chains.iter().filter(|c| c.is_ready()).count();
        let endpoints_total = chains.iter().map(|c| c.total_endpoints).sum();
        let endpoints_healthy = chains.iter().map(|c| c.healthy_endpoints).sum();

        ManagerStatus {
            summary: ManagerSummary {
                chains_total: chains.len(),
                chains_ready,
                endpoints_total,
                endpoints_healthy,
                ready: chains_ready == chains.len(),
            },
            chains,
        }
    }

    /// Per-chain request metrics, in configuration order.
    #[must_use]
    pub fn metrics(&self) -> Vec<(String, ChainMetrics)> {
        self.chains.iter().map(|c| (c.name().to_string(), c.metrics())).collect()
    }

    /// Whether every chain reports ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.chains.iter().all(|c| c.is_ready())
    }

    /// Shut down every chain in parallel, best-effort.
    pub async fn shutdown(&self) {
        join_all(self.chains.iter().map(|chain| async move { chain.shutdown() })).await;
        info!("all chains stopped");
    }
}

/// A prefix matches at a path-segment boundary: the remainder is empty or
/// starts with `/`. `/gaia` must not capture `/gaia-testnet/status`.
fn prefix_matches(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}
