#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/cometgate/cometgate/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod error;
pub use error::ServerError;

mod http;
pub use http::{AppState, create_router};

mod metrics;
pub use metrics::{
    GateMetrics, metrics_handler, record_request, record_request_duration, record_upstream_pick,
};

/// Re-exported router type for downstream binaries.
pub use axum::Router;
