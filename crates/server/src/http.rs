//! HTTP handlers: the proxy fallback plus operational endpoints.
//!
//! Every path that is not an operational endpoint falls through to the
//! proxy handler, which resolves the chain by prefix and forwards the
//! request verbatim.

use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use cometgate_balancer::ProxyRequest;
use cometgate_chain::ChainManager;
use cometgate_types::{ChainMetrics, GateError, PoolKind};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    error::ServerError,
    metrics::{record_request, record_request_duration, record_upstream_pick},
};

/// Shared state for all HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The multi-chain manager.
    pub manager: Arc<ChainManager>,
}

/// Create the axum router.
///
/// # Endpoints
///
/// - `GET /health` — summary counts, 503 until every chain is ready
/// - `GET /health/detailed` — aggregate plus per-chain endpoint detail
/// - `GET /metrics` — per-chain request metrics as JSON
/// - `GET /chains/{chain}/status` — one chain's status snapshot
/// - `POST /chains/{chain}/refresh` — force a registry refresh
/// - `POST /chains/{chain}/probe` — force a probe round
/// - anything else — proxied to the chain owning the longest matching prefix
pub fn create_router(manager: Arc<ChainManager>) -> Router {
    let state = AppState { manager };
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_json))
        .route("/chains/{chain}/status", get(chain_status))
        .route("/chains/{chain}/refresh", post(chain_refresh))
        .route("/chains/{chain}/probe", post(chain_probe))
        .fallback(proxy)
        .with_state(state)
}

/// Basic health: 200 with summary counts when every chain is ready,
/// 503 otherwise.
async fn health(State(state): State<AppState>) -> Response {
    let status = state.manager.status().await;
    let code = if status.summary.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, axum::Json(status.summary)).into_response()
}

/// Detailed health: aggregate summary plus per-chain endpoint detail.
async fn health_detailed(State(state): State<AppState>) -> Response {
    let status = state.manager.status().await;
    let code = if status.summary.ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, axum::Json(status)).into_response()
}

#[derive(Debug, Serialize)]
struct MetricsReport {
    totals: ChainMetrics,
    chains: Vec<ChainMetricsEntry>,
}

#[derive(Debug, Serialize)]
struct ChainMetricsEntry {
    chain: String,
    #[serde(flatten)]
    metrics: ChainMetrics,
}

/// Aggregate request metrics as JSON.
async fn metrics_json(State(state): State<AppState>) -> Response {
    let per_chain = state.manager.metrics();

    let mut totals = ChainMetrics::default();
    for (_, metrics) in &per_chain {
        totals.total_requests += metrics.total_requests;
        totals.successful_requests += metrics.successful_requests;
        totals.failed_requests += metrics.failed_requests;
    }
    totals.success_rate = if totals.total_requests == 0 {
        1.0
    } else {
        totals.successful_requests as f64 / totals.total_requests as f64
    };

    let report = MetricsReport {
        totals,
        chains: per_chain
            .into_iter()
            .map(|(chain, metrics)| ChainMetricsEntry { chain, metrics })
            .collect(),
    };
    axum::Json(report).into_response()
}

/// One chain's status snapshot.
async fn chain_status(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Response {
    match state.manager.get(&chain) {
        Some(instance) => axum::Json(instance.status().await).into_response(),
        None => {
            ServerError::new(GateError::ChainNotFound { path: chain }, "/chains").into_response()
        }
    }
}

/// Force a registry refresh for one chain.
async fn chain_refresh(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Response {
    let Some(instance) = state.manager.get(&chain) else {
        return ServerError::new(GateError::ChainNotFound { path: chain }, "/chains")
            .into_response();
    };

    match instance.refresh_registry().await {
        Ok(endpoints) => {
            axum::Json(json!({ "chain": instance.name(), "endpoints": endpoints }))
                .into_response()
        }
        Err(error) => {
            warn!(chain = %instance.name(), %error, "forced refresh failed");
            ServerError::new(error, "/chains").into_response()
        }
    }
}

/// Force a probe round for one chain.
async fn chain_probe(State(state): State<AppState>, Path(chain): Path<String>) -> Response {
    let Some(instance) = state.manager.get(&chain) else {
        return ServerError::new(GateError::ChainNotFound { path: chain }, "/chains")
            .into_response();
    };

    instance.probe_now().await;
    axum::Json(instance.status().await).into_response()
}

/// The proxy fallback: resolve the chain by prefix and forward verbatim.
///
/// Adds observability headers to successful responses:
/// `X-Response-Time` (total ms), `X-Selected-RPC` (chosen upstream),
/// `X-RPC-Response-Time` (forward ms), and `X-Is-Archive`.
async fn proxy(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let start = Instant::now();

    let route = match state.manager.resolve(&path) {
        Ok(route) => route,
        Err(error) => return ServerError::new(error, path).into_response(),
    };
    let chain_name = route.chain.name().to_string();
    let is_archive = route.pool == PoolKind::Archive;

    let request = match method {
        Method::POST => ProxyRequest::Post { body },
        Method::GET => {
            let request_path = match uri.query() {
                Some(query) => format!("{}?{}", route.rpc_path, query),
                None => route.rpc_path.clone(),
            };
            ProxyRequest::Get { request_path }
        }
        other => {
            debug!(method = %other, %path, "unsupported proxy method");
            return StatusCode::METHOD_NOT_ALLOWED.into_response();
        }
    };

    match route.chain.route(route.pool, request).await {
        Ok(selected) => {
            let total_ms = start.elapsed().as_millis() as u64;
            record_request(&chain_name, is_archive, "success");
            record_request_duration(&chain_name, total_ms as f64);
            record_upstream_pick(&chain_name, &selected.url);

            let status =
                StatusCode::from_u16(selected.response.status).unwrap_or(StatusCode::OK);
            let mut response = (status, selected.response.body.clone()).into_response();
            let headers = response.headers_mut();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            insert_header(headers, "x-response-time", &total_ms.to_string());
            insert_header(headers, "x-selected-rpc", &selected.url);
            insert_header(
                headers,
                "x-rpc-response-time",
                &selected.response.response_time_ms.to_string(),
            );
            insert_header(headers, "x-is-archive", if is_archive { "true" } else { "false" });
            response
        }
        Err(error) => {
            record_request(&chain_name, is_archive, "error");
            warn!(chain = %chain_name, %path, %error, "proxy request failed");
            ServerError::new(error, path).into_response()
        }
    }
}

fn insert_header(headers: &mut axum::http::HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use cometgate_config::{ChainConfig, GateConfig, ProxyConfig};
    use serde_json::json;
    use tower::ServiceExt;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method as http_method, path as http_path},
    };

    use super::*;

    async fn mock_rpc_node(height: u64, earliest: &str) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "sync_info": {
                        "latest_block_height": height.to_string(),
                        "earliest_block_height": earliest,
                        "catching_up": false,
                    }
                }
            })))
            .mount(&server)
            .await;
        Mock::given(http_method("POST"))
            .and(http_path("/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(br#"{"jsonrpc":"2.0","id":1,"result":{}}"#.to_vec()),
            )
            .mount(&server)
            .await;
        server
    }

    async fn test_router() -> (Router, MockServer) {
        let node = mock_rpc_node(1000, "1").await;
        let registry = MockServer::start().await;
        Mock::given(http_method("GET"))
            .and(http_path("/registry.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"RPC Address": node.uri()}])),
            )
            .mount(&registry)
            .await;

        let config = GateConfig {
            chains: vec![ChainConfig {
                name: "gaia".to_string(),
                display_name: "Cosmos Hub".to_string(),
                registry_url: format!("{}/registry.json", registry.uri()),
                base_prefix: "/gaia".to_string(),
                archive_prefix: "/gaia/archive".to_string(),
            }],
            proxy: ProxyConfig {
                health_check_interval_ms: 60_000,
                registry_update_interval_ms: 600_000,
                request_timeout_ms: 2_000,
                health_check_timeout_ms: 2_000,
                registry_timeout_ms: 2_000,
                registry_max_retries: 1,
                retry_delay_ms: 10,
                ..Default::default()
            },
            ..Default::default()
        };

        let manager = Arc::new(ChainManager::start(&config).await.unwrap());
        (create_router(manager), node)
    }

    fn get_request(path: &str) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::builder()
            .method("GET")
            .uri(path)
            .body(axum::body::Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_ready() {
        let (router, _node) = test_router().await;
        let response = router.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["chains_total"], 1);
        assert_eq!(json["chains_ready"], 1);
        assert_eq!(json["ready"], true);
    }

    #[tokio::test]
    async fn test_proxy_get_sets_observability_headers() {
        let (router, node) = test_router().await;
        let response = router.oneshot(get_request("/gaia/status")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers.get("x-selected-rpc").unwrap(), node.uri().as_str());
        assert_eq!(headers.get("x-is-archive").unwrap(), "false");
        assert!(headers.contains_key("x-response-time"));
        assert!(headers.contains_key("x-rpc-response-time"));
    }

    #[tokio::test]
    async fn test_proxy_post_forwards_body() {
        let (router, _node) = test_router().await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/gaia/")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"status"}"#))
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        assert_eq!(body.as_ref(), br#"{"jsonrpc":"2.0","id":1,"result":{}}"#);
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_404_with_error_body() {
        let (router, _node) = test_router().await;
        let response = router.oneshot(get_request("/unknown/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "chain_not_found");
        assert_eq!(json["path"], "/unknown/status");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let (router, _node) = test_router().await;
        let request = axum::http::Request::builder()
            .method("DELETE")
            .uri("/gaia/status")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_chain_status_endpoint() {
        let (router, _node) = test_router().await;
        let response = router.oneshot(get_request("/chains/gaia/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["chain"], "gaia");
        assert_eq!(json["state"], "ready");
        assert_eq!(json["healthy_endpoints"], 1);
    }

    #[tokio::test]
    async fn test_chain_status_unknown_chain_is_404() {
        let (router, _node) = test_router().await;
        let response = router.oneshot(get_request("/chains/nope/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_aggregates() {
        let (router, _node) = test_router().await;

        // Drive one successful proxy request first.
        let response =
            router.clone().oneshot(get_request("/gaia/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["totals"]["total_requests"], 1);
        assert_eq!(json["chains"][0]["chain"], "gaia");
        assert_eq!(json["chains"][0]["successful_requests"], 1);
    }

    #[tokio::test]
    async fn test_forced_refresh_endpoint() {
        let (router, _node) = test_router().await;
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/chains/gaia/refresh")
            .body(axum::body::Body::empty())
            .unwrap();

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["chain"], "gaia");
        assert_eq!(json["endpoints"], 1);
    }
}
