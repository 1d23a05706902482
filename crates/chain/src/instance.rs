//! One chain: poller + monitor + balancer, wired together.

use std::sync::{Arc, Mutex, RwLock};

use cometgate_balancer::{
    BalancerSettings, Forwarder, LoadBalancer, ProxyRequest, Selected,
};
use cometgate_config::{ChainConfig, ProxyConfig};
use cometgate_health::{HealthEvent, HealthMonitor, ProbeSettings};
use cometgate_registry::{RegistryEvent, RegistryPoller, RegistrySettings};
use cometgate_types::{ChainMetrics, ChainState, ChainStatus, GateError, PoolKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// EMA retention factor for end-to-end response times.
const METRICS_EMA_KEEP: f64 = 0.8;

/// Channel depth for registry update events.
const REGISTRY_EVENT_BUFFER: usize = 8;
/// Channel depth for health events.
const HEALTH_EVENT_BUFFER: usize = 32;

#[derive(Debug, Default, Clone, Copy)]
struct MetricsInner {
    total: u64,
    successful: u64,
    failed: u64,
    ema_response_time_ms: f64,
}

/// A running chain: registry ingestion, health classification, and routing
/// for exactly one network.
///
/// Startup order: one synchronous registry fetch (failure aborts
/// initialization), one synchronous probe round, initial pools to the
/// balancer, then the periodic schedulers and the event pump.
#[derive(Debug)]
pub struct ChainInstance {
    config: ChainConfig,
    state: RwLock<ChainState>,
    poller: Arc<RegistryPoller>,
    monitor: Arc<HealthMonitor>,
    balancer: Arc<LoadBalancer>,
    metrics: Mutex<MetricsInner>,
    cancel: CancellationToken,
}

impl ChainInstance {
    /// Build and initialize a chain instance.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be built or the initial registry
    /// fetch fails after its retries.
    pub async fn start(
        config: ChainConfig,
        proxy: &ProxyConfig,
    ) -> Result<Arc<Self>, GateError> {
        // One client per chain keeps connection pools isolated, so a slow
        // chain cannot starve another chain's keep-alive slots.
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GateError::Internal(format!("failed to build HTTP client: {e}")))?;

        let (registry_tx, registry_rx) = mpsc::channel(REGISTRY_EVENT_BUFFER);
        let (health_tx, health_rx) = mpsc::channel(HEALTH_EVENT_BUFFER);

        let registry_settings = RegistrySettings::new(&config.registry_url)
            .with_poll_interval(proxy.registry_update_interval())
            .with_fetch_timeout(proxy.registry_timeout())
            .with_max_retries(proxy.registry_max_retries);
        let poller = Arc::new(RegistryPoller::new(
            &config.name,
            registry_settings,
            client.clone(),
            registry_tx,
        ));

        let probe_settings = ProbeSettings {
            probe_timeout: proxy.health_check_timeout(),
            probe_interval: proxy.health_check_interval(),
            sync_threshold: proxy.sync_threshold_blocks,
        };
        let monitor = Arc::new(HealthMonitor::new(
            &config.name,
            probe_settings,
            client.clone(),
            health_tx,
        ));

        let balancer_settings = BalancerSettings {
            retry_attempts: proxy.retry_attempts,
            retry_delay: proxy.retry_delay(),
        };
        let forwarder = Forwarder::new(client, proxy.request_timeout());
        let balancer =
            Arc::new(LoadBalancer::new(&config.name, forwarder, balancer_settings));

        let instance = Arc::new(Self {
            config,
            state: RwLock::new(ChainState::Initializing),
            poller,
            monitor,
            balancer,
            metrics: Mutex::new(MetricsInner::default()),
            cancel: CancellationToken::new(),
        });

        let endpoints = instance.poller.fetch().await?;
        info!(
            chain = %instance.config.name,
            endpoints = endpoints.len(),
            "initial registry snapshot"
        );

        instance.monitor.set_endpoints(endpoints).await;
        let pools = instance.monitor.probe_all().await;
        instance
            .balancer
            .update_pools(pools.healthy.clone(), pools.archive.clone());
        instance.set_readiness(!pools.healthy.is_empty());

        Arc::clone(&instance).spawn_event_pump(registry_rx, health_rx);
        Arc::clone(&instance.poller).start();
        Arc::clone(&instance.monitor).start();

        info!(
            chain = %instance.config.name,
            healthy = pools.healthy.len(),
            archive = pools.archive.len(),
            median = pools.median_height,
            "chain initialized"
        );
        Ok(instance)
    }

    /// Internal chain key.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Chain configuration.
    #[must_use]
    pub const fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChainState {
        *self.state.read().expect("state lock")
    }

    /// Whether at least one endpoint is currently healthy.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ChainState::Ready
    }

    /// Route one request to this chain's pools.
    ///
    /// The single entry point for traffic: picks an upstream from the
    /// requested pool, forwards, and records request metrics.
    ///
    /// # Errors
    ///
    /// [`GateError::NotReady`] outside the serving states, otherwise the
    /// balancer's errors.
    pub async fn route(
        &self,
        pool: PoolKind,
        request: ProxyRequest,
    ) -> Result<Selected, GateError> {
        if !self.state().is_serving() {
            return Err(GateError::NotReady { chain: self.config.name.clone() });
        }

        let start = std::time::Instant::now();
        let result = self.balancer.request(pool, request).await;
        let elapsed_ms = start.elapsed().as_millis() as f64;

        let mut metrics = self.metrics.lock().expect("metrics lock");
        metrics.total += 1;
        match &result {
            Ok(_) => {
                metrics.successful += 1;
                metrics.ema_response_time_ms = METRICS_EMA_KEEP * metrics.ema_response_time_ms
                    + (1.0 - METRICS_EMA_KEEP) * elapsed_ms;
            }
            Err(_) => metrics.failed += 1,
        }
        result
    }

    /// Point-in-time status snapshot.
    pub async fn status(&self) -> ChainStatus {
        let snapshot = self.monitor.snapshot().await;
        let healthy = snapshot.endpoints.iter().filter(|e| e.healthy).count();
        let archive = snapshot.endpoints.iter().filter(|e| e.healthy && e.archive).count();

        ChainStatus {
            chain: self.config.name.clone(),
            display_name: self.config.display_name.clone(),
            state: self.state(),
            total_endpoints: snapshot.endpoints.len(),
            healthy_endpoints: healthy,
            archive_endpoints: archive,
            median_height: snapshot.median_height,
            last_probe: snapshot.last_probe,
            endpoints: snapshot.endpoints,
        }
    }

    /// Request counters and latency.
    #[must_use]
    pub fn metrics(&self) -> ChainMetrics {
        let inner = *self.metrics.lock().expect("metrics lock");
        ChainMetrics {
            total_requests: inner.total,
            successful_requests: inner.successful,
            failed_requests: inner.failed,
            avg_response_time_ms: inner.ema_response_time_ms,
            success_rate: if inner.total == 0 {
                1.0
            } else {
                inner.successful as f64 / inner.total as f64
            },
        }
    }

    /// Force a registry refresh off-schedule.
    ///
    /// # Errors
    ///
    /// Returns the poller's fetch error; the previous snapshot stays in
    /// effect.
    pub async fn refresh_registry(&self) -> Result<usize, GateError> {
        self.poller.force().await.map(|endpoints| endpoints.len())
    }

    /// Force a probe round off-schedule and publish the resulting pools.
    pub async fn probe_now(&self) {
        let pools = self.monitor.probe_now().await;
        self.balancer.update_pools(pools.healthy.clone(), pools.archive.clone());
        self.set_readiness(!pools.healthy.is_empty());
    }

    /// Stop schedulers and clear state. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.write().expect("state lock");
            if *state == ChainState::Stopped {
                return;
            }
            *state = ChainState::Stopping;
        }

        self.poller.stop();
        self.monitor.stop();
        self.cancel.cancel();
        self.balancer.clear();

        *self.state.write().expect("state lock") = ChainState::Stopped;
        info!(chain = %self.config.name, "chain stopped");
    }

    /// Flip between `Ready` and `Degraded`; terminal states are left alone.
    fn set_readiness(&self, any_healthy: bool) {
        let mut state = self.state.write().expect("state lock");
        let next = if any_healthy { ChainState::Ready } else { ChainState::Degraded };
        if !state.is_terminal() && *state != next {
            info!(chain = %self.config.name, from = %state, to = %next, "chain state changed");
            *state = next;
        }
    }

    /// Forward component events: registry updates feed the monitor, pool
    /// updates feed the balancer and readiness.
    fn spawn_event_pump(
        self: Arc<Self>,
        mut registry_rx: mpsc::Receiver<RegistryEvent>,
        mut health_rx: mpsc::Receiver<HealthEvent>,
    ) {
        let chain = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = chain.cancel.cancelled() => break,
                    event = registry_rx.recv() => match event {
                        Some(RegistryEvent::Updated(endpoints)) => {
                            debug!(
                                chain = %chain.config.name,
                                endpoints = endpoints.len(),
                                "registry update received"
                            );
                            chain.monitor.set_endpoints(endpoints).await;
                        }
                        None => break,
                    },
                    event = health_rx.recv() => match event {
                        Some(HealthEvent::PoolsChanged(update)) => {
                            let any_healthy = !update.healthy.is_empty();
                            chain.balancer.update_pools(update.healthy, update.archive);
                            chain.set_readiness(any_healthy);
                        }
                        Some(HealthEvent::Recovered { url }) => {
                            info!(chain = %chain.config.name, %url, "upstream recovered");
                        }
                        Some(HealthEvent::AllUnhealthy) => {
                            warn!(chain = %chain.config.name, "no healthy upstreams left");
                            chain.set_readiness(false);
                        }
                        None => break,
                    },
                }
            }
            debug!(chain = %chain.config.name, "event pump stopped");
        });
    }
}
