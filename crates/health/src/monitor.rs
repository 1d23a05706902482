//! Endpoint probing, classification, and pool maintenance.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use cometgate_types::{Endpoint, RegistryEndpoint};
use futures::future::join_all;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::status::StatusResponse;

/// Raw `earliest_block_height` value that marks an archive node.
///
/// Compared as a string against the payload field, matching upstream
/// registry conventions; a numeric `1` in the JSON fails the probe parse.
const ARCHIVE_EARLIEST_HEIGHT: &str = "1";

/// Fraction of the probe timeout within which a response counts as live.
const LIVE_WINDOW_FRACTION: f64 = 0.8;

/// Events emitted by the monitor after a probe round.
#[derive(Debug, Clone)]
pub enum HealthEvent {
    /// The pool composition changed: new healthy and archive views.
    PoolsChanged(PoolUpdate),
    /// An endpoint transitioned from unhealthy to healthy.
    Recovered {
        /// URL of the recovered endpoint.
        url: String,
    },
    /// The healthy pool dropped to zero while endpoints are still tracked.
    AllUnhealthy,
}

/// A new pair of pool views plus the median they were gated against.
///
/// Delivered whole so downstream consumers swap pools atomically.
#[derive(Debug, Clone, Default)]
pub struct PoolUpdate {
    /// Endpoints eligible for regular traffic.
    pub healthy: Vec<Endpoint>,
    /// Healthy endpoints with full history.
    pub archive: Vec<Endpoint>,
    /// Median height over live endpoints, 0 if none report.
    pub median_height: u64,
}

/// Tunables for a [`HealthMonitor`].
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Per-probe timeout.
    pub probe_timeout: Duration,
    /// Probe cadence.
    pub probe_interval: Duration,
    /// Inclusive max |height − median| for an endpoint to count as synced.
    pub sync_threshold: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(30),
            sync_threshold: 50,
        }
    }
}

/// Point-in-time view of the monitor's tracked endpoints.
#[derive(Debug, Clone)]
pub struct MonitorSnapshot {
    /// Every tracked endpoint with its latest probe record.
    pub endpoints: Vec<Endpoint>,
    /// Median height from the most recent probe round.
    pub median_height: u64,
    /// When the most recent probe round completed.
    pub last_probe: Option<DateTime<Utc>>,
}

/// Median over reported heights: descending sort, lower-middle index.
///
/// Order-independent; 0 for an empty set. On even counts this lands on the
/// higher of the two middle values, so a pool half of which lags never drags
/// the gate below the leading half.
#[must_use]
pub fn median_height(heights: &[u64]) -> u64 {
    if heights.is_empty() {
        return 0;
    }
    let mut sorted = heights.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted[(sorted.len() - 1) / 2]
}

struct MonitorState {
    endpoints: Vec<Endpoint>,
    median_height: u64,
    last_probe: Option<DateTime<Utc>>,
    /// `(|healthy|, |archive|, median)` of the last emitted update.
    last_signature: Option<(usize, usize, u64)>,
    prev_healthy_count: usize,
}

/// Determines which tracked endpoints are fit to serve traffic.
///
/// Probes run concurrently with fan-out equal to the tracked set size; the
/// round waits for every probe to settle before recomputing pools, so a
/// single slow endpoint delays but never splits an update.
#[derive(Debug)]
pub struct HealthMonitor {
    chain: String,
    settings: ProbeSettings,
    client: reqwest::Client,
    tx: mpsc::Sender<HealthEvent>,
    inner: Mutex<MonitorState>,
    probe_trigger: Notify,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl std::fmt::Debug for MonitorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorState")
            .field("endpoints", &self.endpoints.len())
            .field("median_height", &self.median_height)
            .finish()
    }
}

struct ProbeOutcome {
    url: String,
    elapsed_ms: u64,
    live: bool,
    result: Result<SyncProbe, String>,
}

struct SyncProbe {
    height: u64,
    earliest_raw: String,
    catching_up: bool,
}

impl HealthMonitor {
    /// Create a new monitor for one chain.
    #[must_use]
    pub fn new(
        chain: impl Into<String>,
        settings: ProbeSettings,
        client: reqwest::Client,
        tx: mpsc::Sender<HealthEvent>,
    ) -> Self {
        Self {
            chain: chain.into(),
            settings,
            client,
            tx,
            inner: Mutex::new(MonitorState {
                endpoints: Vec::new(),
                median_height: 0,
                last_probe: None,
                last_signature: None,
                prev_healthy_count: 0,
            }),
            probe_trigger: Notify::new(),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Replace the tracked endpoint set.
    ///
    /// When the URL membership changes, per-URL probe history is discarded
    /// and the next probe round re-emits pools unconditionally. Triggers an
    /// immediate probe round if the monitor is running.
    pub async fn set_endpoints(&self, entries: Vec<RegistryEndpoint>) {
        {
            let mut state = self.inner.lock().await;
            let old: BTreeSet<&str> = state.endpoints.iter().map(|e| e.url.as_str()).collect();
            let new: BTreeSet<&str> = entries.iter().map(|e| e.url.as_str()).collect();

            if old == new {
                // Contributor renames only; keep probe history.
                let names: HashMap<&str, &str> =
                    entries.iter().map(|e| (e.url.as_str(), e.name.as_str())).collect();
                for record in &mut state.endpoints {
                    if let Some(name) = names.get(record.url.as_str()) {
                        record.name = (*name).to_string();
                    }
                }
            } else {
                info!(
                    chain = %self.chain,
                    before = old.len(),
                    after = new.len(),
                    "tracked endpoint set replaced"
                );
                state.endpoints = entries.iter().map(Endpoint::from_registry).collect();
                // Force the next round to publish, even if the counts and
                // median happen to match the previous signature.
                state.last_signature = None;
            }
        }

        if self.is_running() {
            self.probe_trigger.notify_one();
        }
    }

    /// Probe every tracked endpoint concurrently, wait for all to settle,
    /// recompute pools, and emit events for any transitions.
    ///
    /// Returns the recomputed pool views.
    pub async fn probe_all(&self) -> PoolUpdate {
        let urls: Vec<String> = {
            let state = self.inner.lock().await;
            state.endpoints.iter().map(|e| e.url.clone()).collect()
        };

        let outcomes = join_all(urls.iter().map(|url| self.probe_one(url.clone()))).await;

        let (update, events) = self.apply_outcomes(outcomes).await;
        for event in events {
            if self.tx.send(event).await.is_err() {
                debug!(chain = %self.chain, "health event receiver dropped");
            }
        }
        update
    }

    /// Run one probe round off-schedule.
    pub async fn probe_now(&self) -> PoolUpdate {
        debug!(chain = %self.chain, "forced probe round");
        self.probe_all().await
    }

    /// Begin periodic probing, starting immediately.
    ///
    /// The timer is rescheduled after each round completes, so a round that
    /// overruns the interval never piles up ticks.
    pub fn start(self: Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let monitor = self;
        tokio::spawn(async move {
            loop {
                if monitor.cancel.is_cancelled() {
                    break;
                }
                monitor.probe_all().await;
                tokio::select! {
                    () = monitor.cancel.cancelled() => break,
                    () = tokio::time::sleep(monitor.settings.probe_interval) => {}
                    () = monitor.probe_trigger.notified() => {}
                }
            }
            debug!(chain = %monitor.chain, "health monitor stopped");
        });
    }

    /// Cancel the scheduler. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the periodic scheduler is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Current tracked endpoints, median, and last probe time.
    pub async fn snapshot(&self) -> MonitorSnapshot {
        let state = self.inner.lock().await;
        MonitorSnapshot {
            endpoints: state.endpoints.clone(),
            median_height: state.median_height,
            last_probe: state.last_probe,
        }
    }

    async fn probe_one(&self, url: String) -> ProbeOutcome {
        let live_window = self.settings.probe_timeout.mul_f64(LIVE_WINDOW_FRACTION);
        let start = Instant::now();

        let result = self.fetch_status(&url).await;
        let elapsed = start.elapsed();

        ProbeOutcome {
            url,
            elapsed_ms: elapsed.as_millis() as u64,
            live: result.is_ok() && elapsed <= live_window,
            result,
        }
    }

    async fn fetch_status(&self, url: &str) -> Result<SyncProbe, String> {
        let response = self
            .client
            .get(format!("{url}/status"))
            .timeout(self.settings.probe_timeout)
            .send()
            .await
            .map_err(|e| format!("probe failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status endpoint returned HTTP {status}"));
        }

        let body: StatusResponse =
            response.json().await.map_err(|e| format!("invalid status payload: {e}"))?;
        let sync = body.result.sync_info;
        let height = sync.latest_height()?;

        Ok(SyncProbe {
            height,
            earliest_raw: sync.earliest_block_height,
            catching_up: sync.catching_up,
        })
    }

    /// Fold probe outcomes into the tracked records, reclassify, and decide
    /// which events to emit. Returns the new pool views and pending events.
    async fn apply_outcomes(
        &self,
        outcomes: Vec<ProbeOutcome>,
    ) -> (PoolUpdate, Vec<HealthEvent>) {
        let now = Utc::now();
        let mut state = self.inner.lock().await;

        // Pre-round view, for recovery detection.
        let previously: HashMap<String, (bool, bool)> = state
            .endpoints
            .iter()
            .map(|e| (e.url.clone(), (e.healthy, e.probed())))
            .collect();

        for outcome in outcomes {
            // The tracked set may have been replaced mid-round; outcomes for
            // departed URLs are dropped.
            let Some(record) = state.endpoints.iter_mut().find(|e| e.url == outcome.url) else {
                continue;
            };

            record.last_checked = Some(now);
            record.response_time_ms = outcome.elapsed_ms;
            record.live = outcome.live;

            match outcome.result {
                Ok(probe) => {
                    record.height = Some(probe.height);
                    record.catching_up = probe.catching_up;
                    // Archive classification only ever moves on success.
                    record.archive = probe.earliest_raw == ARCHIVE_EARLIEST_HEIGHT;
                    record.consecutive_failures = 0;
                    record.last_error = None;
                }
                Err(reason) => {
                    record.error_count += 1;
                    record.consecutive_failures += 1;
                    record.last_error = Some(reason);
                }
            }
        }

        let heights: Vec<u64> =
            state.endpoints.iter().filter(|e| e.live).filter_map(|e| e.height).collect();
        let median = median_height(&heights);
        let any_reporters = !heights.is_empty();
        let threshold = self.settings.sync_threshold;

        for record in &mut state.endpoints {
            let synced = any_reporters
                && record.height.is_some_and(|h| h.abs_diff(median) <= threshold);
            record.healthy = record.live && !record.catching_up && synced;
        }

        let healthy: Vec<Endpoint> =
            state.endpoints.iter().filter(|e| e.healthy).cloned().collect();
        let archive: Vec<Endpoint> =
            healthy.iter().filter(|e| e.archive).cloned().collect();

        let mut events = Vec::new();
        for endpoint in &healthy {
            if let Some((was_healthy, was_probed)) = previously.get(&endpoint.url) {
                if *was_probed && !was_healthy {
                    info!(chain = %self.chain, url = %endpoint.url, "endpoint recovered");
                    events.push(HealthEvent::Recovered { url: endpoint.url.clone() });
                }
            }
        }

        let update = PoolUpdate { healthy, archive, median_height: median };
        let signature = (update.healthy.len(), update.archive.len(), median);
        if state.last_signature != Some(signature) {
            debug!(
                chain = %self.chain,
                healthy = signature.0,
                archive = signature.1,
                median,
                "pool composition changed"
            );
            state.last_signature = Some(signature);
            events.push(HealthEvent::PoolsChanged(update.clone()));
        }

        if state.prev_healthy_count > 0
            && update.healthy.is_empty()
            && !state.endpoints.is_empty()
        {
            warn!(chain = %self.chain, "all endpoints unhealthy");
            events.push(HealthEvent::AllUnhealthy);
        }

        state.prev_healthy_count = update.healthy.len();
        state.median_height = median;
        state.last_probe = Some(now);

        (update, events)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    #[rstest]
    #[case::empty(&[], 0)]
    #[case::single(&[1000], 1000)]
    #[case::odd(&[1, 9, 5], 5)]
    #[case::even_pair(&[500, 1000], 1000)]
    #[case::even_four(&[1, 2, 3, 4], 3)]
    #[case::duplicates(&[7, 7, 7], 7)]
    fn test_median_height(#[case] heights: &[u64], #[case] expected: u64) {
        assert_eq!(median_height(heights), expected);
    }

    #[test]
    fn test_median_is_order_independent() {
        let a = [9, 1, 5, 3, 7];
        let b = [3, 7, 9, 5, 1];
        assert_eq!(median_height(&a), median_height(&b));
    }

    fn status_body(height: u64, earliest: &str, catching_up: bool) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": -1,
            "result": {
                "sync_info": {
                    "latest_block_height": height.to_string(),
                    "earliest_block_height": earliest,
                    "catching_up": catching_up,
                }
            }
        })
    }

    async fn mock_rpc(height: u64, earliest: &str, catching_up: bool) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(
                height,
                earliest,
                catching_up,
            )))
            .mount(&server)
            .await;
        server
    }

    fn monitor(settings: ProbeSettings) -> (Arc<HealthMonitor>, mpsc::Receiver<HealthEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (
            Arc::new(HealthMonitor::new("gaia", settings, reqwest::Client::new(), tx)),
            rx,
        )
    }

    fn entries(servers: &[&MockServer]) -> Vec<RegistryEndpoint> {
        servers
            .iter()
            .enumerate()
            .map(|(i, s)| RegistryEndpoint::new(s.uri(), format!("team-{i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_probe_classifies_archive_and_healthy() {
        let a = mock_rpc(1000, "1", false).await;

        let (monitor, mut rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&a])).await;
        let update = monitor.probe_all().await;

        assert_eq!(update.healthy.len(), 1);
        assert_eq!(update.archive.len(), 1);
        assert_eq!(update.median_height, 1000);

        match rx.try_recv().unwrap() {
            HealthEvent::PoolsChanged(pools) => {
                assert_eq!(pools.healthy[0].url, a.uri());
                assert!(pools.healthy[0].archive);
            }
            other => panic!("expected PoolsChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sync_gate_excludes_lagging_endpoint() {
        let a = mock_rpc(1000, "900", false).await;
        let b = mock_rpc(500, "1", false).await;

        let (monitor, _rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&a, &b])).await;
        let update = monitor.probe_all().await;

        // Median over {1000, 500} gates on the leading half.
        assert_eq!(update.median_height, 1000);
        assert_eq!(update.healthy.len(), 1);
        assert_eq!(update.healthy[0].url, a.uri());
        // B is live but out of sync; it is not archive-eligible either.
        assert!(update.archive.is_empty());
    }

    #[tokio::test]
    async fn test_catching_up_endpoint_is_unhealthy() {
        let a = mock_rpc(1000, "1", true).await;

        let (monitor, _rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&a])).await;
        let update = monitor.probe_all().await;

        assert!(update.healthy.is_empty());
        let snap = monitor.snapshot().await;
        assert!(snap.endpoints[0].live);
        assert!(snap.endpoints[0].catching_up);
    }

    #[tokio::test]
    async fn test_failed_probe_counts_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (monitor, _rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&server])).await;
        monitor.probe_all().await;
        monitor.probe_all().await;

        let snap = monitor.snapshot().await;
        let record = &snap.endpoints[0];
        assert!(!record.live);
        assert!(!record.healthy);
        assert_eq!(record.error_count, 2);
        assert_eq!(record.consecutive_failures, 2);
        assert!(record.last_error.as_deref().unwrap_or("").contains("500"));
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(100, "1", false)))
            .mount(&server)
            .await;

        let (monitor, _rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&server])).await;
        monitor.probe_all().await;
        monitor.probe_all().await;

        let snap = monitor.snapshot().await;
        assert_eq!(snap.endpoints[0].consecutive_failures, 0);
        assert_eq!(snap.endpoints[0].error_count, 1);
    }

    #[tokio::test]
    async fn test_recovered_event_on_transition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(100, "1", false)))
            .mount(&server)
            .await;

        let (monitor, mut rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&server])).await;
        monitor.probe_all().await;
        monitor.probe_all().await;

        let mut saw_recovered = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, HealthEvent::Recovered { .. }) {
                saw_recovered = true;
            }
        }
        assert!(saw_recovered, "expected a Recovered event after the probe succeeded");
    }

    #[tokio::test]
    async fn test_all_unhealthy_fires_once_per_transition() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(status_body(100, "2", false)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (monitor, mut rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&server])).await;
        monitor.probe_all().await;
        monitor.probe_all().await;
        monitor.probe_all().await;

        let mut all_unhealthy = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, HealthEvent::AllUnhealthy) {
                all_unhealthy += 1;
            }
        }
        assert_eq!(all_unhealthy, 1, "event fires exactly on the transition");
    }

    #[tokio::test]
    async fn test_no_pools_changed_when_signature_stable() {
        let a = mock_rpc(1000, "1", false).await;

        let (monitor, mut rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&a])).await;
        monitor.probe_all().await;
        assert!(rx.try_recv().is_ok());

        monitor.probe_all().await;
        assert!(rx.try_recv().is_err(), "unchanged pools must not re-emit");
    }

    #[tokio::test]
    async fn test_membership_change_discards_history_and_reemits() {
        let a = mock_rpc(1000, "1", false).await;
        let b = mock_rpc(1000, "500", false).await;
        let c = mock_rpc(1000, "500", false).await;

        let (monitor, mut rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(entries(&[&a, &b])).await;
        monitor.probe_all().await;
        while rx.try_recv().is_ok() {}

        // Same counts after the swap; the update must still be published.
        monitor.set_endpoints(entries(&[&a, &c])).await;
        let update = monitor.probe_all().await;

        assert_eq!(update.healthy.len(), 2);
        let urls: Vec<_> = update.healthy.iter().map(|e| e.url.clone()).collect();
        assert!(urls.contains(&c.uri()));
        assert!(!urls.contains(&b.uri()));

        let saw_pools = std::iter::from_fn(|| rx.try_recv().ok())
            .any(|e| matches!(e, HealthEvent::PoolsChanged(_)));
        assert!(saw_pools, "membership change must force a pool update");
    }

    #[tokio::test]
    async fn test_rename_keeps_history() {
        let a = mock_rpc(1000, "1", false).await;

        let (monitor, _rx) = monitor(ProbeSettings::default());
        monitor.set_endpoints(vec![RegistryEndpoint::new(a.uri(), "old")]).await;
        monitor.probe_all().await;

        monitor.set_endpoints(vec![RegistryEndpoint::new(a.uri(), "new")]).await;
        let snap = monitor.snapshot().await;
        assert_eq!(snap.endpoints[0].name, "new");
        assert!(snap.endpoints[0].healthy, "probe history survives a rename");
    }

    #[tokio::test]
    async fn test_empty_tracked_set_yields_empty_pools() {
        let (monitor, mut rx) = monitor(ProbeSettings::default());
        let update = monitor.probe_all().await;

        assert!(update.healthy.is_empty());
        assert_eq!(update.median_height, 0);
        // No AllUnhealthy: nothing was tracked, nothing dropped.
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, HealthEvent::AllUnhealthy));
        }
    }
}
