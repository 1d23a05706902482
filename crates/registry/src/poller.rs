//! Background registry poller.

use std::{
    collections::BTreeSet,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use cometgate_types::{GateError, RegistryEndpoint};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parse::parse_registry;

/// Default registry fetch timeout.
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
/// Default poll cadence.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(600);
/// Default fetch retries per poll.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// First retry backoff; doubles per attempt.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Event emitted by the poller when the endpoint set changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// The set of registry endpoints changed (by URL membership).
    Updated(Vec<RegistryEndpoint>),
}

/// Tunables for a [`RegistryPoller`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Remote registry URL.
    pub url: String,
    /// Poll cadence.
    pub poll_interval: Duration,
    /// Per-request timeout.
    pub fetch_timeout: Duration,
    /// Attempts per poll before reporting failure.
    pub max_retries: u32,
    /// First retry backoff; doubles per attempt.
    pub backoff_base: Duration,
}

impl RegistrySettings {
    /// Create settings with defaults for the given registry URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }

    /// Set the poll cadence.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub const fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the attempts per poll.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the first retry backoff.
    #[must_use]
    pub const fn with_backoff_base(mut self, backoff: Duration) -> Self {
        self.backoff_base = backoff;
        self
    }
}

/// Maintains the current endpoint set for one chain by polling its registry.
///
/// Emits [`RegistryEvent::Updated`] on the update channel whenever a
/// successful poll produces a different URL membership than the previously
/// emitted snapshot. Poll failures keep the previous snapshot in effect.
#[derive(Debug)]
pub struct RegistryPoller {
    chain: String,
    settings: RegistrySettings,
    client: reqwest::Client,
    tx: mpsc::Sender<RegistryEvent>,
    last_urls: Mutex<Option<BTreeSet<String>>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl RegistryPoller {
    /// Create a new poller for one chain.
    ///
    /// The `client` is shared with the rest of the chain instance so all of
    /// a chain's outbound calls reuse one connection pool.
    #[must_use]
    pub fn new(
        chain: impl Into<String>,
        settings: RegistrySettings,
        client: reqwest::Client,
        tx: mpsc::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            chain: chain.into(),
            settings,
            client,
            tx,
            last_urls: Mutex::new(None),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    /// Perform one poll: fetch, parse, and emit an update if the URL
    /// membership changed since the last emitted snapshot.
    ///
    /// Retries up to `max_retries` times with exponential backoff before
    /// giving up.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::RegistryFetch`] when every attempt fails or the
    /// document yields no valid endpoints.
    pub async fn fetch(&self) -> Result<Vec<RegistryEndpoint>, GateError> {
        let mut backoff = self.settings.backoff_base;
        let mut last_reason = String::new();

        for attempt in 1..=self.settings.max_retries.max(1) {
            match self.fetch_once().await {
                Ok(endpoints) => {
                    self.publish(&endpoints).await;
                    return Ok(endpoints);
                }
                Err(reason) => {
                    warn!(
                        chain = %self.chain,
                        attempt,
                        max = self.settings.max_retries,
                        %reason,
                        "registry fetch attempt failed"
                    );
                    last_reason = reason;
                    if attempt < self.settings.max_retries {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }

        Err(GateError::RegistryFetch { chain: self.chain.clone(), reason: last_reason })
    }

    /// Run one `fetch` off-schedule.
    ///
    /// # Errors
    ///
    /// Same as [`RegistryPoller::fetch`].
    pub async fn force(&self) -> Result<Vec<RegistryEndpoint>, GateError> {
        debug!(chain = %self.chain, "forced registry refresh");
        self.fetch().await
    }

    /// Begin periodic polling: one fetch immediately, then one per
    /// `poll_interval`. Errors in periodic fetches are logged and do not
    /// stop the scheduler.
    ///
    /// The timer is rescheduled after each poll completes, so a slow poll
    /// never piles up ticks.
    pub fn start(self: std::sync::Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let poller = self;
        tokio::spawn(async move {
            loop {
                if poller.cancel.is_cancelled() {
                    break;
                }
                if let Err(error) = poller.fetch().await {
                    warn!(
                        chain = %poller.chain,
                        %error,
                        "registry poll failed, keeping previous snapshot"
                    );
                }
                tokio::select! {
                    () = poller.cancel.cancelled() => break,
                    () = tokio::time::sleep(poller.settings.poll_interval) => {}
                }
            }
            debug!(chain = %poller.chain, "registry poller stopped");
        });
    }

    /// Cancel the scheduler. No further events are emitted. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn fetch_once(&self) -> Result<Vec<RegistryEndpoint>, String> {
        let response = self
            .client
            .get(&self.settings.url)
            .timeout(self.settings.fetch_timeout)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("registry returned HTTP {status}"));
        }

        let doc: serde_json::Value =
            response.json().await.map_err(|e| format!("invalid JSON body: {e}"))?;

        let endpoints = parse_registry(&doc);
        if endpoints.is_empty() {
            // An empty result must never replace a populated snapshot.
            return Err("registry yielded no valid endpoints".to_string());
        }
        Ok(endpoints)
    }

    /// Emit an update iff the URL membership differs from the last emitted
    /// snapshot. Contributor-name changes alone do not emit.
    async fn publish(&self, endpoints: &[RegistryEndpoint]) {
        let urls: BTreeSet<String> = endpoints.iter().map(|e| e.url.clone()).collect();

        let changed = {
            let mut last = self.last_urls.lock().expect("registry snapshot lock");
            if last.as_ref() == Some(&urls) {
                false
            } else {
                *last = Some(urls);
                true
            }
        };

        if changed {
            info!(
                chain = %self.chain,
                endpoints = endpoints.len(),
                "registry snapshot changed"
            );
            if self.tx.send(RegistryEvent::Updated(endpoints.to_vec())).await.is_err() {
                debug!(chain = %self.chain, "registry update receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path},
    };

    use super::*;

    fn test_settings(url: String) -> RegistrySettings {
        RegistrySettings::new(url)
            .with_max_retries(2)
            .with_backoff_base(Duration::from_millis(5))
            .with_poll_interval(Duration::from_millis(40))
    }

    fn poller(
        settings: RegistrySettings,
    ) -> (Arc<RegistryPoller>, mpsc::Receiver<RegistryEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let poller =
            Arc::new(RegistryPoller::new("gaia", settings, reqwest::Client::new(), tx));
        (poller, rx)
    }

    async fn mount_registry(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/registry.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_parses_and_emits() {
        let server = MockServer::start().await;
        mount_registry(
            &server,
            json!([
                {"RPC Address": "https://a.example/", "Team or Contributor Name": "Team A"},
                {"RPC Address": "https://b.example", "Team or Contributor Name": "Team B"},
            ]),
        )
        .await;

        let (poller, mut rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        let endpoints = poller.fetch().await.unwrap();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].url, "https://a.example");

        let event = rx.try_recv().unwrap();
        assert_eq!(event, RegistryEvent::Updated(endpoints));
    }

    #[tokio::test]
    async fn test_identical_fetch_emits_once() {
        let server = MockServer::start().await;
        mount_registry(&server, json!([{"rpc": "https://a.example"}])).await;

        let (poller, mut rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        poller.fetch().await.unwrap();
        poller.fetch().await.unwrap();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "second identical fetch must not emit");
    }

    #[tokio::test]
    async fn test_name_change_alone_does_not_emit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/registry.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"rpc": "https://a.example", "name": "old"}])),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_registry(&server, json!([{"rpc": "https://a.example", "name": "new"}])).await;

        let (poller, mut rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        poller.fetch().await.unwrap();
        let renamed = poller.fetch().await.unwrap();

        assert_eq!(renamed[0].name, "new");
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err(), "membership did not change");
    }

    #[tokio::test]
    async fn test_empty_array_is_a_failure_and_keeps_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/registry.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"rpc": "https://a.example"}])),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_registry(&server, json!([])).await;

        let (poller, mut rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        poller.fetch().await.unwrap();
        assert!(rx.try_recv().is_ok());

        let err = poller.fetch().await.unwrap_err();
        assert_eq!(err.kind(), "registry_fetch_error");
        assert!(rx.try_recv().is_err(), "failed poll must not emit");
    }

    #[tokio::test]
    async fn test_http_error_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/registry.json"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let (poller, _rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        let err = poller.fetch().await.unwrap_err();

        assert!(matches!(err, GateError::RegistryFetch { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_force_is_one_fetch() {
        let server = MockServer::start().await;
        mount_registry(&server, json!([{"rpc": "https://a.example"}])).await;

        let (poller, _rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        let endpoints = poller.force().await.unwrap();
        assert_eq!(endpoints.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_cancels_scheduler() {
        let server = MockServer::start().await;
        mount_registry(&server, json!([{"rpc": "https://a.example"}])).await;

        let (poller, mut rx) = poller(test_settings(format!("{}/registry.json", server.uri())));
        Arc::clone(&poller).start();

        // First scheduled fetch emits the initial snapshot.
        let event =
            tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(event, RegistryEvent::Updated(_)));

        poller.stop();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_stop = server.received_requests().await.unwrap().len();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let later = server.received_requests().await.unwrap().len();
        assert_eq!(after_stop, later, "no polls after stop");
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let server = MockServer::start().await;
        mount_registry(&server, json!([{"rpc": "https://a.example"}])).await;

        let (poller, mut rx) = poller(
            test_settings(format!("{}/registry.json", server.uri()))
                .with_poll_interval(Duration::from_secs(60)),
        );
        Arc::clone(&poller).start();
        Arc::clone(&poller).start();

        tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A second scheduler would have produced a second immediate fetch.
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
