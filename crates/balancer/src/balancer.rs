//! Upstream selection and retry walk.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use cometgate_types::{Endpoint, GateError, PoolKind};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use tracing::{debug, warn};

use crate::{
    breaker::{BreakerState, CircuitBreaker},
    forward::{Forwarder, ProxyRequest, UpstreamResponse},
    weight::WeightRecord,
};

/// The two pool views read on the hot request path.
///
/// Replaced whole on every health update; a request observes exactly one
/// snapshot for its whole retry walk.
#[derive(Debug, Clone, Default)]
pub struct Pools {
    /// Endpoints eligible for regular traffic.
    pub healthy: Vec<Endpoint>,
    /// Healthy endpoints with full history.
    pub archive: Vec<Endpoint>,
}

/// Retry tunables for the balancer.
#[derive(Debug, Clone)]
pub struct BalancerSettings {
    /// Total tries per request, capped by the pool size.
    pub retry_attempts: u32,
    /// Base inter-retry delay; grows linearly with the attempt number.
    pub retry_delay: Duration,
}

impl Default for BalancerSettings {
    fn default() -> Self {
        Self { retry_attempts: 3, retry_delay: Duration::from_secs(1) }
    }
}

/// A served request: the chosen upstream plus its response.
#[derive(Debug)]
pub struct Selected {
    /// Base URL of the endpoint that served the request.
    pub url: String,
    /// The upstream response, body verbatim.
    pub response: UpstreamResponse,
}

/// Weight and breaker state for one endpoint, co-located per URL.
#[derive(Debug, Default)]
struct EndpointStats {
    weight: WeightRecord,
    breaker: CircuitBreaker,
}

/// Picks an upstream for each request, forwards it, and maintains weights
/// and circuit breakers.
///
/// The first try is a weighted random draw over pool members whose breaker
/// admits traffic; retries walk the pool deterministically from the first
/// pick. When every breaker is open the balancer degrades to plain
/// round-robin so the chain is never completely unreachable.
#[derive(Debug)]
pub struct LoadBalancer {
    chain: String,
    pools: ArcSwap<Pools>,
    stats: Mutex<HashMap<String, EndpointStats>>,
    cursor: AtomicUsize,
    rng: Mutex<SmallRng>,
    forwarder: Forwarder,
    settings: BalancerSettings,
}

impl LoadBalancer {
    /// Create a balancer with empty pools.
    #[must_use]
    pub fn new(chain: impl Into<String>, forwarder: Forwarder, settings: BalancerSettings) -> Self {
        Self {
            chain: chain.into(),
            pools: ArcSwap::from_pointee(Pools::default()),
            stats: Mutex::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            rng: Mutex::new(SmallRng::from_entropy()),
            forwarder,
            settings,
        }
    }

    /// Seed the weighted draw, making selection deterministic.
    #[must_use]
    pub fn with_rng_seed(self, seed: u64) -> Self {
        *self.rng.lock().expect("rng lock") = SmallRng::seed_from_u64(seed);
        self
    }

    /// Atomically replace both pool views.
    pub fn update_pools(&self, healthy: Vec<Endpoint>, archive: Vec<Endpoint>) {
        debug!(
            chain = %self.chain,
            healthy = healthy.len(),
            archive = archive.len(),
            "pools updated"
        );
        self.pools.store(Arc::new(Pools { healthy, archive }));
    }

    /// Current pool snapshot.
    #[must_use]
    pub fn pools(&self) -> Arc<Pools> {
        self.pools.load_full()
    }

    /// Current weight for an endpoint, if it has stats.
    #[must_use]
    pub fn weight_of(&self, url: &str) -> Option<f64> {
        self.stats.lock().expect("stats lock").get(url).map(|s| s.weight.weight())
    }

    /// Current breaker state for an endpoint, if it has stats.
    #[must_use]
    pub fn breaker_state(&self, url: &str) -> Option<BreakerState> {
        self.stats.lock().expect("stats lock").get(url).map(|s| s.breaker.state())
    }

    /// Drop all pools, weights, and breakers. Called on chain shutdown.
    pub fn clear(&self) {
        self.pools.store(Arc::new(Pools::default()));
        self.stats.lock().expect("stats lock").clear();
    }

    /// Route one request through the target pool with retries.
    ///
    /// # Errors
    ///
    /// [`GateError::NoUpstreamsAvailable`] when the pool is empty, otherwise
    /// [`GateError::AllAttemptsFailed`] wrapping the last per-attempt error
    /// once every try is exhausted.
    pub async fn request(
        &self,
        pool_kind: PoolKind,
        request: ProxyRequest,
    ) -> Result<Selected, GateError> {
        let pools = self.pools.load_full();
        let pool: &[Endpoint] = match pool_kind {
            PoolKind::Regular => &pools.healthy,
            PoolKind::Archive => &pools.archive,
        };
        if pool.is_empty() {
            return Err(GateError::NoUpstreamsAvailable { pool: pool_kind });
        }

        let max_attempts = self.settings.retry_attempts.max(1).min(pool.len() as u32);
        let mut base_index = 0;
        let mut last_error: Option<GateError> = None;

        for attempt in 0..max_attempts {
            let (index, endpoint) = if attempt == 0 {
                let picked = self.pick_first(pool);
                base_index = picked.0;
                picked
            } else {
                self.pick_retry(pool, base_index, attempt as usize)
            };

            debug!(
                chain = %self.chain,
                url = %endpoint.url,
                index,
                attempt = attempt + 1,
                "forwarding to upstream"
            );

            match self.forwarder.forward(&endpoint.url, &request).await {
                Ok(response) => {
                    self.record_success(&endpoint.url, response.response_time_ms);
                    return Ok(Selected { url: endpoint.url, response });
                }
                Err(error) => {
                    warn!(
                        chain = %self.chain,
                        url = %endpoint.url,
                        attempt = attempt + 1,
                        %error,
                        "forward attempt failed"
                    );
                    self.record_failure(&endpoint.url);
                    last_error = Some(error);
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(self.settings.retry_delay * (attempt + 1)).await;
                    }
                }
            }
        }

        let last = last_error
            .unwrap_or_else(|| GateError::Internal("retry walk made no attempts".to_string()));
        Err(GateError::AllAttemptsFailed { attempts: max_attempts, last: Box::new(last) })
    }

    /// Weighted random draw over members whose breaker admits traffic.
    ///
    /// Weights are scaled to integers and summed as prefixes, so the draw is
    /// exact and deterministic under a seeded RNG. With every breaker open,
    /// degrades to round-robin over the whole pool.
    fn pick_first(&self, pool: &[Endpoint]) -> (usize, Endpoint) {
        let mut stats = self.stats.lock().expect("stats lock");

        let admissible: Vec<(usize, u64)> = pool
            .iter()
            .enumerate()
            .filter_map(|(i, endpoint)| {
                let entry = stats.entry(endpoint.url.clone()).or_default();
                entry.breaker.can_request().then(|| (i, entry.weight.scaled_weight()))
            })
            .collect();

        if admissible.is_empty() {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
            return (index, pool[index].clone());
        }

        let total: u64 = admissible.iter().map(|(_, w)| w).sum();
        let mut draw = self.rng.lock().expect("rng lock").gen_range(0..total.max(1));
        for (index, weight) in &admissible {
            if draw < *weight {
                self.cursor.fetch_add(1, Ordering::Relaxed);
                return (*index, pool[*index].clone());
            }
            draw -= weight;
        }

        // Rounding left the draw past the last prefix; take the final member.
        let (index, _) = *admissible.last().expect("admissible not empty");
        (index, pool[index].clone())
    }

    /// Deterministic retry pick: `pool[(base + k) mod n]`, skipping members
    /// whose breaker is open. Falls back to the base slot when every member
    /// is skipped.
    fn pick_retry(&self, pool: &[Endpoint], base: usize, k: usize) -> (usize, Endpoint) {
        let len = pool.len();
        let start = (base + k) % len;

        let mut stats = self.stats.lock().expect("stats lock");
        for offset in 0..len {
            let index = (start + offset) % len;
            let entry = stats.entry(pool[index].url.clone()).or_default();
            if entry.breaker.can_request() {
                return (index, pool[index].clone());
            }
        }
        (start, pool[start].clone())
    }

    fn record_success(&self, url: &str, response_time_ms: u64) {
        let mut stats = self.stats.lock().expect("stats lock");
        let entry = stats.entry(url.to_string()).or_default();
        entry.weight.record_success(response_time_ms);
        entry.breaker.on_success();
    }

    fn record_failure(&self, url: &str) {
        let mut stats = self.stats.lock().expect("stats lock");
        let entry = stats.entry(url.to_string()).or_default();
        entry.weight.record_failure();
        entry.breaker.on_failure();
    }
}
